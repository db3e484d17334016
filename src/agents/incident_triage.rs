//! Fast incident triage: a golden health snapshot, error-log patterns, and
//! at most three likely causes that clear measurable thresholds.

use serde_json::Value;

use crate::core::agent::{Workflow, TURN_BUDGET_TRIAGE};

use super::{INCIDENT_TRIAGE, SAFETY_RULES, SUMMARY_CONTRACT};

pub const MAX_ERROR_PATTERNS_DEFAULT: i64 = 20;
pub const ERROR_LOG_LINES_DEFAULT: i64 = 5_000;

/// The canonical golden-snapshot variable list. Kept stable across versions;
/// tests pin it.
pub const GOLDEN_STATUS_VARS: &[&str] = &[
    "Threads_connected",
    "Threads_running",
    "Max_used_connections",
    "Aborted_connects",
    "Connection_errors_max_connections",
    "Created_tmp_tables",
    "Created_tmp_disk_tables",
    "Table_locks_waited",
    "Innodb_row_lock_current_waits",
    "Innodb_row_lock_time_avg",
    "Slow_queries",
    "Questions",
];

pub const GOLDEN_SYSTEM_VARS: &[&str] = &[
    "max_connections",
    "innodb_buffer_pool_size",
    "tmp_table_size",
    "max_heap_table_size",
];

const SYSTEM_PROMPT: &str = r#"You are a MariaDB incident triage specialist.

Your job: when something is wrong, identify what changed and where to look
first. Only report ACTUAL problems; when every metric is inside its normal
range, say "No significant issues detected" instead of inventing findings.

Procedure:
1. Build the golden health snapshot first:
   - get_sys_metrics for connections, query counters, lock waits and temp
     tables, plus the sizing variables.
   - get_buffer_pool_statistics for cache hit rate.
   - get_innodb_lock_waits and get_table_lock_waits for live contention.
   - get_processlist for current activity.
   - When instrumentation is enabled, get_statement_analysis and
     get_io_by_file_latency; when not, note "performance instrumentation
     disabled" once and move on.
   - For a managed service, get_observability_snapshot for CPU% and disk
     volume utilization; when the observability API is not configured, note
     "observability not configured" once and move on.
2. Read error-log patterns with read_error_log; weigh ERROR patterns first,
   then recurring WARNING patterns, and check first/last seen against the
   incident window.
3. Correlate into at most 3 likely causes. A cause may only be reported when
   at least one measurable indicator exceeds its threshold:
   - Connection exhaustion: Threads_connected above 80% of max_connections,
     or within 5 of it.
   - Lock contention: Innodb_row_lock_current_waits above 5, or average row
     lock wait above 1 second, or any lock wait older than 10 seconds.
   - Resource pressure: buffer pool hit rate below 0.90, disk temp tables
     above 10% of temp tables, disk volume above 90%, CPU above 85%.
   - Replication: IO or SQL thread stopped, or meaningful seconds-behind.
   - Query performance: Slow_queries spiking, or sessions running beyond
     30 seconds.
   Four-out-of-a-hundred connections is normal, not a finding.

Report format:
- Health snapshot summary with the actual numbers and a Normal/Elevated
  verdict per category.
- Either the no-issues statement, or up to 3 causes ranked by severity, each
  with: the measurable indicators that crossed thresholds, 3-5 concrete
  checks, 2-3 safe mitigations, and explicit do-not actions.
- Error-log analysis: top patterns and how they correlate with the metrics.
- Next steps, including which specialized workflow to run for more depth."#;

pub struct IncidentTriageWorkflow;

impl Workflow for IncidentTriageWorkflow {
    fn name(&self) -> &'static str {
        INCIDENT_TRIAGE
    }

    fn description(&self) -> &'static str {
        "Health snapshot plus error-log correlation into at most three likely causes"
    }

    fn system_prompt(&self) -> &'static str {
        static PROMPT: std::sync::OnceLock<String> = std::sync::OnceLock::new();
        PROMPT
            .get_or_init(|| format!("{SYSTEM_PROMPT}\n{SAFETY_RULES}\n{SUMMARY_CONTRACT}"))
            .as_str()
    }

    fn tool_names(&self) -> Vec<&'static str> {
        vec![
            "execute_sql",
            "read_error_log",
            "get_sys_metrics",
            "get_innodb_lock_waits",
            "get_table_lock_waits",
            "get_processlist",
            "get_statement_analysis",
            "get_io_by_file_latency",
            "get_buffer_pool_statistics",
            "get_observability_snapshot",
            "get_server_capabilities",
        ]
    }

    fn turn_budget(&self) -> usize {
        TURN_BUDGET_TRIAGE
    }

    fn task_prompt(&self, params: &Value) -> String {
        let max_patterns = params
            .get("max_error_patterns")
            .and_then(Value::as_i64)
            .unwrap_or(MAX_ERROR_PATTERNS_DEFAULT)
            .clamp(1, 100);
        let log_lines = params
            .get("error_log_lines")
            .and_then(Value::as_i64)
            .unwrap_or(ERROR_LOG_LINES_DEFAULT)
            .clamp(100, 100_000);
        let mut prompt = format!(
            "Perform incident triage on the configured database. Build the health \
             snapshot, read up to {log_lines} error-log lines and extract at most \
             {max_patterns} error patterns, then correlate into at most 3 likely causes."
        );
        if let Some(path) = params.get("error_log_path").and_then(Value::as_str) {
            prompt.push_str(&format!(" The error log file is at {path}."));
        } else if let Some(id) = params.get("service_id").and_then(Value::as_str) {
            prompt.push_str(&format!(
                " Fetch the error log for managed service {id} over the API."
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
    fn golden_snapshot_list_is_stable() {
        // the canonical list is part of the triage contract; changing it is
        // a breaking change
        assert_eq!(GOLDEN_STATUS_VARS.len(), 12);
        assert_eq!(GOLDEN_SYSTEM_VARS.len(), 4);
        assert!(GOLDEN_STATUS_VARS.contains(&"Innodb_row_lock_current_waits"));
        assert!(GOLDEN_SYSTEM_VARS.contains(&"max_connections"));
    }

    #[test]
    fn triage_gets_the_larger_turn_budget() {
        assert_eq!(IncidentTriageWorkflow.turn_budget(), TURN_BUDGET_TRIAGE);
    }

    #[test]
    fn local_path_beats_service_id_in_prompt() {
        let w = IncidentTriageWorkflow;
        let p = w.task_prompt(&json!({
            "error_log_path": "/var/log/mysql/error.log",
            "service_id": "dbpgf000001",
        }));
        assert!(p.contains("/var/log/mysql/error.log"));
        assert!(!p.contains("dbpgf000001"));
    }
}
