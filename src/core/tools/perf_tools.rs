//! Performance-schema and status-variable tools.
//!
//! Every tool here degrades cleanly: when instrumentation is unavailable the
//! caller gets `InstrumentationDisabled` and is expected to fall back to
//! `execute_sql` against information_schema.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::error::{DiagError, DiagResult};

use super::db_tools::run_query;
use super::{ParamKind, ParamSpec, ToolCaps, ToolContext, ToolHandler, ToolRegistry, ToolSpec};

async fn require_instrumentation(ctx: &ToolContext) -> DiagResult<()> {
    let caps = ctx.gateway.server_capabilities().await?;
    if caps.performance_schema {
        Ok(())
    } else {
        Err(DiagError::InstrumentationDisabled)
    }
}

struct GetSysMetrics;

#[async_trait]
impl ToolHandler for GetSysMetrics {
    async fn call(&self, ctx: &ToolContext, _args: &Map<String, Value>) -> DiagResult<Value> {
        let sql = "SELECT VARIABLE_NAME AS variable_name, VARIABLE_VALUE AS variable_value, \
                          'status' AS type \
                   FROM information_schema.GLOBAL_STATUS \
                   WHERE VARIABLE_NAME IN ( \
                     'Threads_connected', 'Threads_running', 'Max_used_connections', \
                     'Questions', 'Queries', 'Slow_queries', \
                     'Innodb_row_lock_current_waits', 'Innodb_row_lock_time_avg', \
                     'Created_tmp_tables', 'Created_tmp_disk_tables', \
                     'Table_locks_waited', 'Aborted_connects', \
                     'Connection_errors_max_connections') \
                   UNION ALL \
                   SELECT VARIABLE_NAME, VARIABLE_VALUE, 'variable' \
                   FROM information_schema.GLOBAL_VARIABLES \
                   WHERE VARIABLE_NAME IN ( \
                     'max_connections', 'max_connect_errors', \
                     'innodb_buffer_pool_size', 'tmp_table_size', 'max_heap_table_size') \
                   ORDER BY type, variable_name";
        let mut result = run_query(ctx, sql, 200, 10, None).await?;
        if let Some(obj) = result.as_object_mut() {
            obj.insert("source".into(), json!("information_schema"));
        }
        Ok(result)
    }
}

struct GetInnodbLockWaits;

#[async_trait]
impl ToolHandler for GetInnodbLockWaits {
    async fn call(&self, ctx: &ToolContext, _args: &Map<String, Value>) -> DiagResult<Value> {
        let detailed = "SELECT NOW() AS observed_at, \
                 r.trx_id AS waiting_trx_id, r.trx_mysql_thread_id AS waiting_pid, \
                 r.trx_query AS waiting_query, r.trx_started AS waiting_trx_started, \
                 TIMESTAMPDIFF(SECOND, r.trx_started, NOW()) AS waiting_trx_age_sec, \
                 b.trx_id AS blocking_trx_id, b.trx_mysql_thread_id AS blocking_pid, \
                 b.trx_query AS blocking_query, b.trx_started AS blocking_trx_started, \
                 TIMESTAMPDIFF(SECOND, b.trx_started, NOW()) AS blocking_trx_age_sec \
               FROM information_schema.innodb_lock_waits w \
               JOIN information_schema.innodb_trx r ON r.trx_id = w.requesting_trx_id \
               JOIN information_schema.innodb_trx b ON b.trx_id = w.blocking_trx_id \
               ORDER BY r.trx_started LIMIT 50";
        match run_query(ctx, detailed, 50, 10, None).await {
            Ok(result) => Ok(result),
            Err(e) if !e.is_degradable() => {
                // the join depends on privileges; fall back to the bare view
                let simple = "SELECT requesting_trx_id AS waiting_trx_id, requested_lock_id, \
                                     blocking_trx_id, blocking_lock_id \
                              FROM information_schema.innodb_lock_waits LIMIT 50";
                run_query(ctx, simple, 50, 10, None).await
            }
            Err(e) => Err(e),
        }
    }
}

struct GetTableLockWaits;

#[async_trait]
impl ToolHandler for GetTableLockWaits {
    async fn call(&self, ctx: &ToolContext, _args: &Map<String, Value>) -> DiagResult<Value> {
        require_instrumentation(ctx).await?;
        let sql = "SELECT ml.object_schema, ml.object_name, ml.object_type, ml.lock_type, \
                          ml.lock_duration, ml.lock_status, \
                          t.PROCESSLIST_ID AS waiting_pid, t.PROCESSLIST_USER AS waiting_user, \
                          t.PROCESSLIST_TIME AS waiting_time, t.PROCESSLIST_STATE AS waiting_state, \
                          t.PROCESSLIST_INFO AS waiting_query \
                   FROM performance_schema.metadata_locks ml \
                   JOIN performance_schema.threads t ON ml.owner_thread_id = t.thread_id \
                   WHERE ml.lock_status = 'PENDING' \
                   ORDER BY t.PROCESSLIST_TIME DESC LIMIT 50";
        run_query(ctx, sql, 50, 10, None).await
    }
}

struct GetIoByFileLatency;

#[async_trait]
impl ToolHandler for GetIoByFileLatency {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        require_instrumentation(ctx).await?;
        let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(20);
        let sql = format!(
            "SELECT file_name AS file, \
                    SUM(count_read + count_write + count_misc) AS total_ops, \
                    SUM(sum_timer_read + sum_timer_write + sum_timer_misc) / 1000000000000 AS total_latency_sec, \
                    SUM(count_read) AS count_read, \
                    SUM(sum_timer_read) / 1000000000000 AS read_latency_sec, \
                    SUM(count_write) AS count_write, \
                    SUM(sum_timer_write) / 1000000000000 AS write_latency_sec \
             FROM performance_schema.file_summary_by_instance \
             GROUP BY file_name ORDER BY total_latency_sec DESC LIMIT {limit}"
        );
        run_query(ctx, &sql, limit as usize, 10, None).await
    }
}

struct GetStatementAnalysis;

#[async_trait]
impl ToolHandler for GetStatementAnalysis {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        require_instrumentation(ctx).await?;
        let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(20);
        let sql = format!(
            "SELECT DIGEST_TEXT AS query, SCHEMA_NAME AS db, COUNT_STAR AS exec_count, \
                    SUM_TIMER_WAIT / 1000000000000 AS total_latency_sec, \
                    AVG_TIMER_WAIT / 1000000000000 AS avg_latency_sec, \
                    MAX_TIMER_WAIT / 1000000000000 AS max_latency_sec, \
                    SUM_LOCK_TIME / 1000000000000 AS lock_latency_sec, \
                    SUM_ROWS_SENT AS rows_sent, SUM_ROWS_EXAMINED AS rows_examined, \
                    SUM_CREATED_TMP_TABLES AS tmp_tables, \
                    SUM_CREATED_TMP_DISK_TABLES AS tmp_disk_tables, \
                    SUM_NO_INDEX_USED AS full_scans \
             FROM performance_schema.events_statements_summary_by_digest \
             WHERE DIGEST_TEXT IS NOT NULL \
             ORDER BY SUM_TIMER_WAIT DESC LIMIT {limit}"
        );
        run_query(ctx, &sql, limit as usize, 10, None).await
    }
}

struct GetPerfMetricsForThread;

#[async_trait]
impl ToolHandler for GetPerfMetricsForThread {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        require_instrumentation(ctx).await?;
        let thread_id = args
            .get("thread_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| DiagError::BadArgs("thread_id".into()))?;
        let mapping = format!(
            "SELECT thread_id FROM performance_schema.threads \
             WHERE processlist_id = {thread_id} LIMIT 1"
        );
        let mapped = run_query(ctx, &mapping, 1, 5, None).await?;
        let rows = mapped["rows"].as_array().cloned().unwrap_or_default();
        let Some(perf_id) = rows
            .first()
            .and_then(|r| r.get("thread_id"))
            .and_then(Value::as_i64)
        else {
            return Ok(json!({
                "available": false,
                "metrics": Value::Null,
                "note": format!("no performance_schema thread for processlist id {thread_id}; \
                                 the session may have ended"),
            }));
        };
        // MariaDB has no cpu_time column; TIMER_WAIT - LOCK_TIME approximates
        // time not spent waiting on locks
        let sql = format!(
            "SELECT SQL_TEXT AS sql_text, \
                    TIMER_WAIT / 1000000000000 AS timer_wait_sec, \
                    LOCK_TIME / 1000000000000 AS lock_time_sec, \
                    (TIMER_WAIT - LOCK_TIME) / 1000000000000 AS approximate_cpu_time_sec, \
                    ROWS_EXAMINED AS rows_examined, ROWS_SENT AS rows_sent, \
                    CREATED_TMP_TABLES AS created_tmp_tables, \
                    CREATED_TMP_DISK_TABLES AS created_tmp_disk_tables, \
                    SELECT_SCAN AS select_scan, SELECT_FULL_JOIN AS select_full_join, \
                    SORT_MERGE_PASSES AS sort_merge_passes, SORT_ROWS AS sort_rows, \
                    NO_INDEX_USED AS no_index_used, NO_GOOD_INDEX_USED AS no_good_index_used \
             FROM performance_schema.events_statements_current \
             WHERE THREAD_ID = {perf_id} LIMIT 1"
        );
        let result = run_query(ctx, &sql, 1, 5, None).await?;
        let rows = result["rows"].as_array().cloned().unwrap_or_default();
        Ok(json!({
            "available": !rows.is_empty(),
            "metrics": rows.first().cloned().unwrap_or(Value::Null),
        }))
    }
}

struct GetPerfMetricsForQuery;

#[async_trait]
impl ToolHandler for GetPerfMetricsForQuery {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        require_instrumentation(ctx).await?;
        let query_text = args
            .get("query_text")
            .and_then(Value::as_str)
            .ok_or_else(|| DiagError::BadArgs("query_text".into()))?;
        let database = args.get("database").and_then(Value::as_str);

        // match the digest on a literal-stripped prefix of the query
        let sample: String = query_text
            .trim()
            .chars()
            .take(50)
            .collect::<String>()
            .replace('\'', "''");
        let mut conditions = vec![format!("DIGEST_TEXT LIKE '%{sample}%'")];
        if let Some(db) = database {
            conditions.push(format!("SCHEMA_NAME = '{}'", db.replace('\'', "''")));
        }
        let sql = format!(
            "SELECT DIGEST_TEXT AS digest_text, COUNT_STAR AS exec_count, \
                    SUM_TIMER_WAIT / 1000000000000 AS total_timer_wait_sec, \
                    AVG_TIMER_WAIT / 1000000000000 AS avg_timer_wait_sec, \
                    SUM_LOCK_TIME / 1000000000000 AS total_lock_time_sec, \
                    AVG_LOCK_TIME / 1000000000000 AS avg_lock_time_sec, \
                    (SUM_TIMER_WAIT - SUM_LOCK_TIME) / 1000000000000 AS total_approximate_cpu_time_sec, \
                    (AVG_TIMER_WAIT - AVG_LOCK_TIME) / 1000000000000 AS avg_approximate_cpu_time_sec, \
                    SUM_ROWS_EXAMINED AS total_rows_examined, AVG_ROWS_EXAMINED AS avg_rows_examined, \
                    SUM_ROWS_SENT AS total_rows_sent, \
                    SUM_CREATED_TMP_TABLES AS total_created_tmp_tables, \
                    SUM_CREATED_TMP_DISK_TABLES AS total_created_tmp_disk_tables, \
                    SUM_SELECT_SCAN AS total_select_scan, \
                    SUM_SELECT_FULL_JOIN AS total_select_full_join, \
                    SUM_NO_INDEX_USED AS total_no_index_used, \
                    SUM_NO_GOOD_INDEX_USED AS total_no_good_index_used \
             FROM performance_schema.events_statements_summary_by_digest \
             WHERE {} ORDER BY SUM_TIMER_WAIT DESC LIMIT 1",
            conditions.join(" AND ")
        );
        let result = run_query(ctx, &sql, 1, 5, None).await?;
        let rows = result["rows"].as_array().cloned().unwrap_or_default();
        Ok(json!({
            "available": !rows.is_empty(),
            "metrics": rows.first().cloned().unwrap_or(Value::Null),
            "note": if rows.is_empty() {
                "no digest matched this query pattern; it may not have run recently"
            } else {
                ""
            },
        }))
    }
}

struct GetBufferPoolStatistics;

#[async_trait]
impl ToolHandler for GetBufferPoolStatistics {
    async fn call(&self, ctx: &ToolContext, _args: &Map<String, Value>) -> DiagResult<Value> {
        let sql = "SELECT POOL_ID, POOL_SIZE, FREE_BUFFERS, DATABASE_PAGES, \
                          MODIFIED_DATABASE_PAGES, PENDING_READS, \
                          NUMBER_PAGES_READ, NUMBER_PAGES_CREATED, NUMBER_PAGES_WRITTEN, \
                          PAGES_READ_RATE, PAGES_WRITTEN_RATE, NUMBER_PAGES_GET, HIT_RATE, \
                          NUMBER_PAGES_READ_AHEAD, NUMBER_READ_AHEAD_EVICTED \
                   FROM information_schema.INNODB_BUFFER_POOL_STATS";
        let result = run_query(ctx, sql, 10, 10, None).await?;
        let rows = result["rows"].as_array().cloned().unwrap_or_default();
        if rows.is_empty() {
            return Ok(json!({
                "available": false,
                "stats": Value::Null,
                "note": "buffer pool statistics unavailable; non-InnoDB engine or missing privilege",
            }));
        }
        let stats = if rows.len() == 1 {
            rows[0].clone()
        } else {
            aggregate_pools(&rows)
        };
        Ok(json!({"available": true, "stats": stats}))
    }
}

/// Sum numeric columns across buffer pool instances.
fn aggregate_pools(rows: &[Value]) -> Value {
    let mut out = Map::new();
    if let Some(first) = rows.first().and_then(Value::as_object) {
        for key in first.keys() {
            if key == "POOL_ID" {
                out.insert(key.clone(), json!("ALL"));
                continue;
            }
            let mut sum = 0.0;
            let mut numeric = false;
            for row in rows {
                if let Some(v) = row.get(key).and_then(Value::as_f64) {
                    sum += v;
                    numeric = true;
                }
            }
            if numeric {
                out.insert(key.clone(), json!(sum));
            } else if let Some(v) = first.get(key) {
                out.insert(key.clone(), v.clone());
            }
        }
    }
    Value::Object(out)
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec::new(
            "get_sys_metrics",
            "System-wide health metrics from information_schema GLOBAL_STATUS and \
             GLOBAL_VARIABLES: connections, query counters, lock waits, temp tables.",
            vec![],
            ToolCaps::DB,
        ),
        Arc::new(GetSysMetrics),
    );

    registry.register(
        ToolSpec::new(
            "get_innodb_lock_waits",
            "Current InnoDB lock waits with waiting and blocking transactions, their \
             queries and ages.",
            vec![],
            ToolCaps::DB,
        ),
        Arc::new(GetInnodbLockWaits),
    );

    registry.register(
        ToolSpec::new(
            "get_table_lock_waits",
            "Pending table-level (metadata) lock waits from performance_schema.",
            vec![],
            ToolCaps::DB,
        ),
        Arc::new(GetTableLockWaits),
    );

    registry.register(
        ToolSpec::new(
            "get_io_by_file_latency",
            "Files ranked by total I/O latency, for spotting disk hot spots.",
            vec![ParamSpec::optional(
                "limit",
                ParamKind::Integer,
                "Maximum files to return",
                json!(20),
            )],
            ToolCaps::DB,
        ),
        Arc::new(GetIoByFileLatency),
    );

    registry.register(
        ToolSpec::new(
            "get_statement_analysis",
            "Most expensive statement digests by total latency, with lock time, rows \
             examined and temp-table counters.",
            vec![ParamSpec::optional(
                "limit",
                ParamKind::Integer,
                "Maximum digests to return",
                json!(20),
            )],
            ToolCaps::DB,
        ),
        Arc::new(GetStatementAnalysis),
    );

    registry.register(
        ToolSpec::new(
            "get_performance_metrics_for_thread",
            "Performance-schema metrics (wall time, lock time, approximate CPU time, \
             rows, temp tables, index usage) for one running session.",
            vec![ParamSpec::required(
                "thread_id",
                ParamKind::Integer,
                "Processlist ID of the session",
            )],
            ToolCaps::DB,
        ),
        Arc::new(GetPerfMetricsForThread),
    );

    registry.register(
        ToolSpec::new(
            "get_performance_metrics_for_query",
            "Aggregated digest metrics for a query pattern: execution count, average \
             and total latency, lock time, approximate CPU time, temp tables.",
            vec![
                ParamSpec::required(
                    "query_text",
                    ParamKind::String,
                    "SQL text to match against normalized digests",
                ),
                ParamSpec::nullable("database", ParamKind::String, "Schema filter"),
            ],
            ToolCaps::DB,
        ),
        Arc::new(GetPerfMetricsForQuery),
    );

    registry.register(
        ToolSpec::new(
            "get_buffer_pool_statistics",
            "InnoDB buffer pool statistics including hit rate and page I/O; works even \
             without performance instrumentation.",
            vec![],
            ToolCaps::DB,
        ),
        Arc::new(GetBufferPoolStatistics),
    );
}
