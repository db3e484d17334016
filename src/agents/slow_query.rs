//! Historical slow-query analysis.

use serde_json::Value;

use crate::core::agent::Workflow;

use super::{SAFETY_RULES, SLOW_QUERY, SUMMARY_CONTRACT};

pub const HOURS_DEFAULT: f64 = 1.0;
pub const HOURS_MAX: f64 = 168.0;
pub const MAX_PATTERNS_DEFAULT: i64 = 8;
pub const MAX_PATTERNS_MAX: i64 = 30;

const SYSTEM_PROMPT: &str = r#"You are a MariaDB slow query tuning specialist.

Your job: identify and analyze the most impactful slow query patterns in the
requested time window and produce concrete tuning recommendations.

Procedure:
1. Discover the slow-log configuration with execute_sql:
   SHOW VARIABLES LIKE 'slow_query_log'; 'long_query_time'; 'log_output';
   'slow_query_log_file'. If slow logging is OFF, stop and tell the user how
   it could be enabled (show the SET GLOBAL statements, do not run them).
2. Retrieve patterns. Prefer the table when log_output includes TABLE:
   aggregate mysql.slow_log by sql_text over the window (exec count, avg and
   total time, avg rows_examined, last seen), ordered by total time, LIMIT 50.
   When only FILE is available, get the path and use read_slow_log_file, then
   aggregate the entries yourself from the tail.
3. Rank by total time and pick at most the requested number of patterns for
   deep analysis. Tell the user what share of total slow time they cover.
4. For each selected pattern:
   - Call get_performance_metrics_for_query; when instrumentation is
     unavailable, say so once and continue with plans alone. Classify the
     pattern as CPU-bound, I/O-bound or lock-bound from wall time vs
     approximate CPU time vs lock time.
   - Run EXPLAIN FORMAT=JSON via execute_sql; look for full scans, filesort,
     temp tables, rows_examined far above rows_sent, unusable predicates.
   - Inspect the referenced tables: SHOW CREATE TABLE, SHOW INDEX FROM, and
     row counts from information_schema.tables. Note every FULLTEXT index.
   - Call get_buffer_pool_statistics once to judge cache pressure.
5. Recommend, in priority order: query rewrites first (a LIKE '%...%' on a
   column with a FULLTEXT index must be rewritten to MATCH ... AGAINST;
   non-sargable predicates rewritten to range form), then index candidates
   (exact column order, with write-cost caveat), then configuration hints
   tied to the observed bottleneck class. Check existing indexes before
   proposing new ones.

Report: per-pattern summary with key metrics, plan findings, classification
and recommendations, then an overall ranking with the 2-3 worst offenders."#;

pub struct SlowQueryWorkflow;

impl Workflow for SlowQueryWorkflow {
    fn name(&self) -> &'static str {
        SLOW_QUERY
    }

    fn description(&self) -> &'static str {
        "Analyze historical slow queries and recommend rewrites, indexes and configuration"
    }

    fn system_prompt(&self) -> &'static str {
        // assembled once at startup; leaked so the trait can hand out &'static
        static PROMPT: std::sync::OnceLock<String> = std::sync::OnceLock::new();
        PROMPT
            .get_or_init(|| format!("{SYSTEM_PROMPT}\n{SAFETY_RULES}\n{SUMMARY_CONTRACT}"))
            .as_str()
    }

    fn tool_names(&self) -> Vec<&'static str> {
        vec![
            "execute_sql",
            "read_slow_log_file",
            "get_performance_metrics_for_query",
            "get_buffer_pool_statistics",
            "get_server_capabilities",
        ]
    }

    fn task_prompt(&self, params: &Value) -> String {
        let hours = params
            .get("hours")
            .and_then(Value::as_f64)
            .unwrap_or(HOURS_DEFAULT)
            .clamp(0.1, HOURS_MAX);
        let max_patterns = params
            .get("max_patterns")
            .and_then(Value::as_i64)
            .unwrap_or(MAX_PATTERNS_DEFAULT)
            .clamp(1, MAX_PATTERNS_MAX);
        let mut prompt = format!(
            "Analyze slow queries for approximately the last {hours} hour(s). \
             Deep-analyze at most {max_patterns} of the most impactful query patterns."
        );
        if let Some(path) = params.get("slow_log_path").and_then(Value::as_str) {
            prompt.push_str(&format!(
                " The slow query log file is at {path}; aggregate patterns from it."
            ));
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_prompt_applies_defaults_and_caps() {
        let w = SlowQueryWorkflow;
        let p = w.task_prompt(&json!({}));
        assert!(p.contains("last 1 hour(s)"));
        assert!(p.contains("at most 8"));

        let p = w.task_prompt(&json!({"hours": 10_000.0, "max_patterns": 500}));
        assert!(p.contains("last 168 hour(s)"));
        assert!(p.contains("at most 30"));
    }

    #[test]
    fn slow_log_path_is_threaded_through() {
        let w = SlowQueryWorkflow;
        let p = w.task_prompt(&json!({"slow_log_path": "/var/log/mysql/slow.log"}));
        assert!(p.contains("/var/log/mysql/slow.log"));
    }
}
