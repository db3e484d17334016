//! Error taxonomy shared across the gateway, tool runtime and workflows.

use thiserror::Error;

pub type DiagResult<T> = Result<T, DiagError>;

#[derive(Debug, Error)]
pub enum DiagError {
    /// Query shape is not one of SELECT/SHOW/DESCRIBE/DESC/EXPLAIN.
    #[error("refusing to execute non read-only SQL: {0}")]
    UnsafeQuery(String),

    #[error("invalid tool arguments: {0}")]
    BadArgs(String),

    #[error("input blocked by guardrail: {0}")]
    InputBlocked(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("database connection lost: {0}")]
    ConnectionLost(String),

    #[error("database authentication failed: {0}")]
    AuthFailed(String),

    #[error("database schema not found: {0}")]
    SchemaMissing(String),

    #[error("database error {code}: {message}")]
    Backend { code: String, message: String },

    /// Performance instrumentation is disabled; callers degrade.
    #[error("performance instrumentation is disabled on this server")]
    InstrumentationDisabled,

    #[error("observability API rejected the key (401)")]
    Unauthorized,

    #[error("observability API denied access (403)")]
    Forbidden,

    /// Feature needs credentials that are not configured.
    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("payload too large: {got} bytes exceeds cap of {cap} bytes")]
    TooLarge { got: u64, cap: u64 },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl DiagError {
    /// Short machine-readable kind, recorded in invocation records.
    pub fn kind(&self) -> &'static str {
        match self {
            DiagError::UnsafeQuery(_) => "unsafe_query",
            DiagError::BadArgs(_) => "bad_args",
            DiagError::InputBlocked(_) => "input_blocked",
            DiagError::Timeout(_) => "timeout",
            DiagError::Cancelled => "cancelled",
            DiagError::ConnectionLost(_) => "connection_lost",
            DiagError::AuthFailed(_) => "auth_failed",
            DiagError::SchemaMissing(_) => "schema_missing",
            DiagError::Backend { .. } => "backend_error",
            DiagError::InstrumentationDisabled => "instrumentation_disabled",
            DiagError::Unauthorized => "unauthorized",
            DiagError::Forbidden => "forbidden",
            DiagError::NotConfigured(_) => "not_configured",
            DiagError::TooLarge { .. } => "too_large",
            DiagError::FileNotFound(_) => "file_not_found",
            DiagError::PermissionDenied(_) => "permission_denied",
            DiagError::UnknownTool(_) => "unknown_tool",
            DiagError::BudgetExceeded(_) => "budget_exceeded",
            DiagError::Llm(_) => "llm_error",
            DiagError::Io(_) => "io_error",
            DiagError::Http(_) => "http_error",
        }
    }

    /// Errors a workflow should treat as "feature unavailable" evidence
    /// rather than a reason to stop.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            DiagError::InstrumentationDisabled
                | DiagError::SchemaMissing(_)
                | DiagError::NotConfigured(_)
        )
    }
}

/// Map a sqlx error onto the taxonomy. MySQL error codes for access denied
/// and unknown database get their own kinds so workflows can react.
pub fn classify_sqlx(err: sqlx::Error) -> DiagError {
    match &err {
        sqlx::Error::PoolTimedOut => DiagError::Timeout("connection pool acquire".into()),
        sqlx::Error::Io(e) => DiagError::ConnectionLost(e.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            match code.as_str() {
                "1044" | "1045" => DiagError::AuthFailed(db.message().to_string()),
                "1049" => DiagError::SchemaMissing(db.message().to_string()),
                // 1969: max_statement_time exceeded; 3024: MySQL equivalent
                "1969" | "3024" => DiagError::Timeout("statement timeout".into()),
                _ => DiagError::Backend {
                    code,
                    message: db.message().to_string(),
                },
            }
        }
        _ => DiagError::Backend {
            code: String::new(),
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degradable_kinds_are_limited() {
        assert!(DiagError::InstrumentationDisabled.is_degradable());
        assert!(DiagError::SchemaMissing("sys".into()).is_degradable());
        assert!(DiagError::NotConfigured("SKYSQL_API_KEY".into()).is_degradable());
        assert!(!DiagError::Timeout("q".into()).is_degradable());
        assert!(!DiagError::UnsafeQuery("DELETE".into()).is_degradable());
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(DiagError::UnknownTool("x".into()).kind(), "unknown_tool");
        assert_eq!(
            DiagError::Backend {
                code: "1064".into(),
                message: "syntax".into()
            }
            .kind(),
            "backend_error"
        );
    }
}
