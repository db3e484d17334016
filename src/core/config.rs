//! Immutable process configuration, built once from environment variables
//! and passed by reference. No dotenv loading, no global state.

use crate::core::error::{DiagError, DiagResult};

pub const DEFAULT_SKYSQL_BASE_URL: &str = "https://api.skysql.com";
pub const MANAGED_HOST_SUFFIX: &str = ".skysql.com";

/// TLS policy for database connections. Managed-service hosts require full
/// certificate and hostname verification; there is no downgrade path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Disabled,
    VerifyIdentity,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
}

impl OpenAiConfig {
    pub fn from_env() -> DiagResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| DiagError::NotConfigured("OPENAI_API_KEY is not set".into()))?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        Ok(Self { api_key, model })
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl DbConfig {
    pub fn from_env() -> DiagResult<Self> {
        let mut missing = Vec::new();
        let mut var = |name: &'static str| match std::env::var(name) {
            Ok(v) if !v.is_empty() => v,
            _ => {
                missing.push(name);
                String::new()
            }
        };
        let host = var("DB_HOST");
        let user = var("DB_USER");
        let password = var("DB_PASSWORD");
        let database = var("DB_DATABASE");
        if !missing.is_empty() {
            return Err(DiagError::NotConfigured(format!(
                "missing DB config env vars: {}",
                missing.join(", ")
            )));
        }
        let port = std::env::var("DB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306);
        Ok(Self {
            host,
            port,
            user,
            password,
            database,
        })
    }

    /// Managed-service hosts get full TLS verification, everything else is
    /// plain TCP (local/dev instances typically have no certs).
    pub fn tls_mode(&self) -> TlsMode {
        if self.host.to_lowercase().ends_with(MANAGED_HOST_SUFFIX) {
            TlsMode::VerifyIdentity
        } else {
            TlsMode::Disabled
        }
    }
}

/// Credentials for the managed-service observability API. Both fields are
/// optional: when absent, remote log and metrics features are inert.
#[derive(Debug, Clone, Default)]
pub struct SkySqlConfig {
    pub api_key: Option<String>,
    pub service_id: Option<String>,
    pub base_url: String,
}

impl SkySqlConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("SKYSQL_API_KEY").ok().filter(|v| !v.is_empty()),
            service_id: std::env::var("SKYSQL_SERVICE_ID")
                .ok()
                .filter(|v| !v.is_empty()),
            base_url: std::env::var("SKYSQL_LOG_API_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_SKYSQL_BASE_URL.to_string()),
        }
    }

    pub fn require_key(&self) -> DiagResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| DiagError::NotConfigured("SKYSQL_API_KEY is not set".into()))
    }
}

/// Everything the runtime needs, constructed once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai: OpenAiConfig,
    pub db: DbConfig,
    pub skysql: SkySqlConfig,
}

impl AppConfig {
    pub fn from_env() -> DiagResult<Self> {
        Ok(Self {
            openai: OpenAiConfig::from_env()?,
            db: DbConfig::from_env()?,
            skysql: SkySqlConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(host: &str) -> DbConfig {
        DbConfig {
            host: host.to_string(),
            port: 3306,
            user: "u".into(),
            password: "p".into(),
            database: "d".into(),
        }
    }

    #[test]
    fn managed_hosts_require_verified_tls() {
        assert_eq!(
            db("dbpgp40039323.sysp0000.db2.skysql.com").tls_mode(),
            TlsMode::VerifyIdentity
        );
        assert_eq!(
            db("DBPGF0001.SYSP0000.DB1.SKYSQL.COM").tls_mode(),
            TlsMode::VerifyIdentity
        );
    }

    #[test]
    fn local_hosts_skip_tls() {
        assert_eq!(db("localhost").tls_mode(), TlsMode::Disabled);
        assert_eq!(db("10.0.0.12").tls_mode(), TlsMode::Disabled);
        // suffix must match the whole label chain, not a substring
        assert_eq!(db("skysql.com.evil.example").tls_mode(), TlsMode::Disabled);
    }
}
