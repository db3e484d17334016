//! Database-reading tools: ad-hoc read-only SQL, the processlist snapshot
//! and the replication surface.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::db::{QueryRequest, ROW_CAP_DEFAULT};
use crate::core::error::{DiagError, DiagResult};

use super::{ParamKind, ParamSpec, ToolCaps, ToolContext, ToolHandler, ToolRegistry, ToolSpec};

fn arg_str(args: &Map<String, Value>, name: &str) -> Option<String> {
    args.get(name).and_then(Value::as_str).map(str::to_string)
}

fn arg_i64(args: &Map<String, Value>, name: &str) -> Option<i64> {
    args.get(name).and_then(Value::as_i64)
}

fn arg_f64(args: &Map<String, Value>, name: &str) -> Option<f64> {
    args.get(name).and_then(Value::as_f64)
}

fn arg_bool(args: &Map<String, Value>, name: &str) -> Option<bool> {
    args.get(name).and_then(Value::as_bool)
}

/// Run a validated read-only statement and shape the result the way the
/// reasoning service expects: rows as objects plus cap metadata.
pub(super) async fn run_query(
    ctx: &ToolContext,
    sql: &str,
    max_rows: usize,
    timeout_secs: u64,
    database: Option<String>,
) -> DiagResult<Value> {
    let req = QueryRequest::new(sql)
        .with_database(database)
        .with_max_rows(max_rows)
        .with_timeout_secs(timeout_secs);
    let result = ctx.gateway.run_readonly(&req).await?;
    let note = if result.truncated {
        format!(
            "Result set limited to {} rows; more rows may exist.",
            result.row_count
        )
    } else {
        String::new()
    };
    Ok(json!({
        "rows": result.rows_as_objects(),
        "row_count": result.row_count,
        "columns": result.columns,
        "truncated": result.truncated,
        "elapsed_ms": result.elapsed_ms,
        "note": note,
    }))
}

struct ExecuteSql;

#[async_trait]
impl ToolHandler for ExecuteSql {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        let sql = arg_str(args, "sql").ok_or_else(|| DiagError::BadArgs("sql".into()))?;
        let max_rows = arg_i64(args, "max_rows").unwrap_or(ROW_CAP_DEFAULT as i64) as usize;
        let timeout = arg_i64(args, "timeout_seconds").unwrap_or(10) as u64;
        let database = arg_str(args, "database");
        run_query(ctx, &sql, max_rows, timeout, database).await
    }
}

struct GetProcesslist;

#[async_trait]
impl ToolHandler for GetProcesslist {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        let include_sleeping = arg_bool(args, "include_sleeping").unwrap_or(false);
        let min_time = arg_f64(args, "min_time_seconds").unwrap_or(0.0);
        let max_rows = arg_i64(args, "max_rows").unwrap_or(100) as usize;

        let mut sql = String::from(
            "SELECT ID, USER, HOST, DB, COMMAND, TIME, STATE, INFO \
             FROM information_schema.processlist WHERE 1=1",
        );
        if !include_sleeping {
            sql.push_str(" AND COMMAND != 'Sleep'");
        }
        if min_time > 0.0 {
            sql.push_str(&format!(" AND TIME >= {}", min_time as i64));
        }
        sql.push_str(" ORDER BY TIME DESC");

        let mut result = run_query(ctx, &sql, max_rows, 10, None).await?;
        if let Some(obj) = result.as_object_mut() {
            obj.insert("available".into(), json!(true));
            obj.insert("source".into(), json!("information_schema"));
        }
        Ok(result)
    }
}

struct GetAllReplicaStatus;

#[async_trait]
impl ToolHandler for GetAllReplicaStatus {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        let probe_count = arg_i64(args, "probe_count").unwrap_or(10) as usize;
        // rows only make sense from the primary's vantage point; replicas
        // are skipped and retried on a fresh connection
        let scan = ctx
            .gateway
            .run_readonly_probe("SHOW ALL SLAVES STATUS", probe_count, true)
            .await?;
        Ok(json!({
            "replicas": scan.replicas,
            "count": scan.unique_count,
            "executions": scan.executions,
            "max_expected": scan.max_expected,
            "note": scan.note,
            "routing": {
                "primary_hits": scan.primary_hits,
                "replica_hits": scan.replica_hits,
                "failed_probes": scan.failed_probes,
            },
        }))
    }
}

struct GetMasterStatus;

#[async_trait]
impl ToolHandler for GetMasterStatus {
    async fn call(&self, ctx: &ToolContext, _args: &Map<String, Value>) -> DiagResult<Value> {
        let result = run_query(ctx, "SHOW MASTER STATUS", 10, 10, None).await?;
        let rows = result["rows"].as_array().cloned().unwrap_or_default();
        if rows.is_empty() {
            return Ok(json!({
                "available": false,
                "status": Value::Null,
                "note": "SHOW MASTER STATUS returned no rows; binary logging may be disabled \
                         or this server is not a replication source.",
            }));
        }
        Ok(json!({
            "available": true,
            "status": rows[0],
            "note": "The load balancer routes this statement to the primary.",
        }))
    }
}

struct GetReplicationConfiguration;

#[async_trait]
impl ToolHandler for GetReplicationConfiguration {
    async fn call(&self, ctx: &ToolContext, _args: &Map<String, Value>) -> DiagResult<Value> {
        let sql = "SELECT VARIABLE_NAME, VARIABLE_VALUE \
                   FROM information_schema.GLOBAL_VARIABLES \
                   WHERE VARIABLE_NAME IN ( \
                     'server_id', 'log_bin', 'binlog_format', 'sync_binlog', \
                     'expire_logs_days', 'gtid_domain_id', 'gtid_strict_mode', \
                     'read_only', 'super_read_only', 'relay_log', 'relay_log_recovery') \
                   ORDER BY VARIABLE_NAME";
        let result = run_query(ctx, sql, 50, 10, None).await?;
        let mut config = Map::new();
        for row in result["rows"].as_array().cloned().unwrap_or_default() {
            if let (Some(name), Some(value)) = (
                row.get("VARIABLE_NAME").and_then(Value::as_str),
                row.get("VARIABLE_VALUE"),
            ) {
                config.insert(name.to_string(), value.clone());
            }
        }
        let get = |k: &str| config.get(k).and_then(Value::as_str).unwrap_or("");
        let is_replica = get("read_only") == "ON" || get("super_read_only") == "ON";
        let is_master = get("log_bin") == "ON";
        let gtid = get("gtid_domain_id");
        let gtid_enabled = !gtid.is_empty() && gtid != "0";
        Ok(json!({
            "configuration": config,
            "is_replica": is_replica,
            "is_master": is_master,
            "gtid_enabled": gtid_enabled,
        }))
    }
}

struct GetServerCapabilities;

#[async_trait]
impl ToolHandler for GetServerCapabilities {
    async fn call(&self, ctx: &ToolContext, _args: &Map<String, Value>) -> DiagResult<Value> {
        let caps = ctx.gateway.server_capabilities().await?;
        Ok(serde_json::to_value(caps).unwrap_or(Value::Null))
    }
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec::new(
            "execute_sql",
            "Execute a read-only SQL statement (SELECT, SHOW, DESCRIBE, EXPLAIN) against the \
             configured database. Use for configuration checks, information_schema and \
             performance_schema queries, EXPLAIN plans and schema inspection.",
            vec![
                ParamSpec::required("sql", ParamKind::String, "Read-only SQL statement"),
                ParamSpec::optional(
                    "max_rows",
                    ParamKind::Integer,
                    "Maximum rows to return",
                    json!(100),
                ),
                ParamSpec::optional(
                    "timeout_seconds",
                    ParamKind::Integer,
                    "Per-query timeout in seconds",
                    json!(10),
                ),
                ParamSpec::nullable("database", ParamKind::String, "Database to switch to first"),
            ],
            ToolCaps::DB,
        )
        .with_timeout(70),
        Arc::new(ExecuteSql),
    );

    registry.register(
        ToolSpec::new(
            "get_processlist",
            "Snapshot currently executing sessions from information_schema.processlist, \
             longest-running first.",
            vec![
                ParamSpec::optional(
                    "include_sleeping",
                    ParamKind::Boolean,
                    "Include idle (Sleep) connections",
                    json!(false),
                ),
                ParamSpec::optional(
                    "min_time_seconds",
                    ParamKind::Float,
                    "Only sessions running at least this long",
                    json!(0.0),
                ),
                ParamSpec::optional("max_rows", ParamKind::Integer, "Row cap", json!(100)),
            ],
            ToolCaps::DB,
        ),
        Arc::new(GetProcesslist),
    );

    registry.register(
        ToolSpec::new(
            "get_all_replica_status",
            "Discover replica status rows behind the connection load balancer by running \
             SHOW ALL SLAVES STATUS on several fresh connections and deduplicating by \
             replica identity.",
            vec![ParamSpec::optional(
                "probe_count",
                ParamKind::Integer,
                "Number of probe executions (max 20)",
                json!(10),
            )],
            ToolCaps::DB,
        )
        .with_timeout(120),
        Arc::new(GetAllReplicaStatus),
    );

    registry.register(
        ToolSpec::new(
            "get_master_status",
            "Binary log position and GTID state of the replication source.",
            vec![],
            ToolCaps::DB,
        ),
        Arc::new(GetMasterStatus),
    );

    registry.register(
        ToolSpec::new(
            "get_replication_configuration",
            "Replication-related server variables (server_id, binlog, GTID, read-only) \
             with derived role flags.",
            vec![],
            ToolCaps::DB,
        ),
        Arc::new(GetReplicationConfiguration),
    );

    registry.register(
        ToolSpec::new(
            "get_server_capabilities",
            "Server version, family, role hint and whether performance instrumentation \
             is enabled.",
            vec![],
            ToolCaps::DB,
        ),
        Arc::new(GetServerCapabilities),
    );
}
