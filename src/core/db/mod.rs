//! Read-only database gateway: pooled execution with row/byte caps and
//! session statement timeouts, round-robin replica probing, and a memoized
//! capability probe.

pub mod probe;
pub mod validate;

use std::time::{Duration, Instant};

use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, ConnectOptions, Connection, MySqlConnection, Row, TypeInfo};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::core::config::{DbConfig, TlsMode};
use crate::core::error::{classify_sqlx, DiagError, DiagResult};

pub use probe::{ProbeScan, PROBE_COUNT_DEFAULT, PROBE_COUNT_MAX};

pub const ROW_CAP_DEFAULT: usize = 100;
pub const ROW_CAP_MAX: usize = 10_000;
pub const QUERY_TIMEOUT_DEFAULT_SECS: u64 = 10;
pub const QUERY_TIMEOUT_MAX_SECS: u64 = 60;
/// Absolute budget for a serialized query result.
pub const RESULT_BYTE_CAP: usize = 64 * 1024;

const POOL_SIZE: u32 = 8;
const ACQUIRE_DEADLINE_SECS: u64 = 5;
const CONN_MAX_LIFETIME_SECS: u64 = 30 * 60;

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    pub database: Option<String>,
    pub max_rows: usize,
    pub timeout_secs: u64,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            database: None,
            max_rows: ROW_CAP_DEFAULT,
            timeout_secs: QUERY_TIMEOUT_DEFAULT_SECS,
        }
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.clamp(1, ROW_CAP_MAX);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs.clamp(1, QUERY_TIMEOUT_MAX_SECS);
        self
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl QueryResult {
    /// Rows as column-keyed objects, the shape tool results are fed to the
    /// reasoning service in.
    pub fn rows_as_objects(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|cells| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(cells.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerCapabilities {
    pub version: String,
    pub family: String,
    pub performance_schema: bool,
    /// primary / replica / unknown, from read-only and binlog variables.
    pub role_hint: String,
}

pub struct DbGateway {
    cfg: DbConfig,
    pool: MySqlPool,
    capabilities: OnceCell<ServerCapabilities>,
}

pub(crate) fn connect_options(cfg: &DbConfig) -> MySqlConnectOptions {
    let ssl_mode = match cfg.tls_mode() {
        TlsMode::VerifyIdentity => MySqlSslMode::VerifyIdentity,
        TlsMode::Disabled => MySqlSslMode::Disabled,
    };
    MySqlConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.user)
        .password(&cfg.password)
        .database(&cfg.database)
        .charset("utf8mb4")
        .ssl_mode(ssl_mode)
}

impl DbGateway {
    pub fn connect(cfg: DbConfig) -> Self {
        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_SIZE)
            .acquire_timeout(Duration::from_secs(ACQUIRE_DEADLINE_SECS))
            .max_lifetime(Duration::from_secs(CONN_MAX_LIFETIME_SECS))
            .connect_lazy_with(connect_options(&cfg));
        info!(host = %cfg.host, port = cfg.port, tls = ?cfg.tls_mode(), "database gateway ready");
        Self {
            cfg,
            pool,
            capabilities: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.cfg
    }

    /// Validate, execute and cap a read-only query.
    pub async fn run_readonly(&self, req: &QueryRequest) -> DiagResult<QueryResult> {
        validate::ensure_readonly(&req.sql)?;
        let mut conn = self.pool.acquire().await.map_err(classify_sqlx)?;

        if let Err(e) = session_setup(&mut conn, req).await {
            let _ = conn.detach().close().await;
            return Err(e);
        }

        let started = Instant::now();
        // grace over the server-side statement timeout so the server wins
        let deadline = Duration::from_secs(req.timeout_secs + 2);
        let fetched = tokio::time::timeout(
            deadline,
            collect_rows(&mut conn, &req.sql, req.max_rows),
        )
        .await;

        match fetched {
            Ok(Ok((columns, rows, truncated))) => {
                let row_count = rows.len();
                debug!(rows = row_count, truncated, "query finished");
                Ok(QueryResult {
                    columns,
                    rows,
                    row_count,
                    truncated,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                // never return a failed connection to the pool
                let _ = conn.detach().close().await;
                Err(e)
            }
            Err(_) => {
                let _ = conn.detach().close().await;
                Err(DiagError::Timeout(format!(
                    "query exceeded {}s",
                    req.timeout_secs
                )))
            }
        }
    }

    /// Probe and memoize server capabilities. The memo lives until `close`.
    pub async fn server_capabilities(&self) -> DiagResult<ServerCapabilities> {
        let caps = self
            .capabilities
            .get_or_try_init(|| async {
                let version: (String,) = sqlx::query_as("SELECT VERSION()")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(classify_sqlx)?;
                let family = if version.0.to_lowercase().contains("mariadb") {
                    "mariadb"
                } else {
                    "mysql"
                };
                // the probe statement is not stable across versions; any
                // failure means instrumentation is unavailable, not fatal
                let performance_schema =
                    match sqlx::query_as::<_, (i64,)>("SELECT @@performance_schema")
                        .fetch_one(&self.pool)
                        .await
                    {
                        Ok((v,)) => v != 0,
                        Err(e) => {
                            warn!("performance_schema probe failed: {e}");
                            false
                        }
                    };
                let role_hint = match sqlx::query_as::<_, (i64, i64)>(
                    "SELECT @@read_only, @@log_bin",
                )
                .fetch_one(&self.pool)
                .await
                {
                    Ok((read_only, log_bin)) => {
                        if read_only == 0 && log_bin == 1 {
                            "primary"
                        } else if read_only == 1 {
                            "replica"
                        } else {
                            "unknown"
                        }
                    }
                    Err(_) => "unknown",
                };
                Ok::<_, DiagError>(ServerCapabilities {
                    version: version.0,
                    family: family.to_string(),
                    performance_schema,
                    role_hint: role_hint.to_string(),
                })
            })
            .await?;
        Ok(caps.clone())
    }

    /// One fresh, pool-independent connection; the probe scan needs each
    /// statement to hit the load balancer as a new session.
    pub(crate) async fn fresh_connection(&self) -> DiagResult<MySqlConnection> {
        let opts = connect_options(&self.cfg);
        tokio::time::timeout(Duration::from_secs(ACQUIRE_DEADLINE_SECS + 5), opts.connect())
            .await
            .map_err(|_| DiagError::Timeout("fresh connection".into()))?
            .map_err(classify_sqlx)
    }

    /// Discover replicas behind a round-robin proxy. See [`probe`].
    pub async fn run_readonly_probe(
        &self,
        sql: &str,
        probe_count: usize,
        require_primary: bool,
    ) -> DiagResult<ProbeScan> {
        validate::ensure_readonly(sql)?;
        probe::scan(self, sql, probe_count, require_primary).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn session_setup(
    conn: &mut sqlx::pool::PoolConnection<sqlx::MySql>,
    req: &QueryRequest,
) -> DiagResult<()> {
    sqlx::query("SET SESSION TRANSACTION READ ONLY")
        .execute(&mut **conn)
        .await
        .map_err(classify_sqlx)?;
    // MariaDB takes seconds; the MySQL equivalent is ignored there
    sqlx::query(&format!(
        "SET SESSION max_statement_time = {}",
        req.timeout_secs
    ))
    .execute(&mut **conn)
    .await
    .map_err(classify_sqlx)?;
    if let Some(db) = &req.database {
        sqlx::query(&format!("USE `{}`", db.replace('`', "")))
            .execute(&mut **conn)
            .await
            .map_err(classify_sqlx)?;
    }
    Ok(())
}

/// Stream rows up to the cap, stopping early on row count or byte budget.
async fn collect_rows(
    conn: &mut sqlx::pool::PoolConnection<sqlx::MySql>,
    sql: &str,
    max_rows: usize,
) -> DiagResult<(Vec<String>, Vec<Vec<Value>>, bool)> {
    let mut stream = sqlx::query(sql).fetch(&mut **conn);
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut truncated = false;
    let mut budget = RESULT_BYTE_CAP;

    while let Some(row) = stream.try_next().await.map_err(classify_sqlx)? {
        if columns.is_empty() {
            columns = row.columns().iter().map(|c| c.name().to_string()).collect();
        }
        if rows.len() >= max_rows {
            truncated = true;
            break;
        }
        let cells = decode_row(&row);
        let cost = serde_json::to_string(&cells).map(|s| s.len()).unwrap_or(0);
        if cost > budget {
            truncated = true;
            break;
        }
        budget -= cost;
        rows.push(cells);
    }
    Ok((columns, rows, truncated))
}

pub(crate) fn decode_row(row: &MySqlRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|idx| decode_cell(row, idx))
        .collect()
}

/// Best-effort typed decoding; anything exotic falls back to a string, then
/// to lossy bytes.
fn decode_cell(row: &MySqlRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name().to_uppercase();
    match type_name.as_str() {
        "NULL" => Value::Null,
        "BOOLEAN" | "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row
            .try_get::<Option<u64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(v as f64))
            .unwrap_or(Value::Null),
        "DOUBLE" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map(|v| Value::String(v.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null),
        _ => match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(s)) => Value::String(s),
            Ok(None) => Value::Null,
            Err(_) => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
                .unwrap_or(Value::Null),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_and_clamps() {
        let req = QueryRequest::new("SELECT 1");
        assert_eq!(req.max_rows, ROW_CAP_DEFAULT);
        assert_eq!(req.timeout_secs, QUERY_TIMEOUT_DEFAULT_SECS);

        let req = QueryRequest::new("SELECT 1")
            .with_max_rows(1_000_000)
            .with_timeout_secs(600);
        assert_eq!(req.max_rows, ROW_CAP_MAX);
        assert_eq!(req.timeout_secs, QUERY_TIMEOUT_MAX_SECS);
    }

    #[test]
    fn rows_as_objects_preserves_column_order() {
        let result = QueryResult {
            columns: vec!["b".into(), "a".into()],
            rows: vec![vec![Value::from(1), Value::from(2)]],
            row_count: 1,
            truncated: false,
            elapsed_ms: 3,
        };
        let objs = result.rows_as_objects();
        let keys: Vec<&String> = objs[0].keys().collect();
        assert_eq!(keys, ["b", "a"]);
    }
}
