//! Real-time analysis of currently executing sessions.

use serde_json::Value;

use crate::core::agent::Workflow;

use super::{RUNNING_QUERY, SAFETY_RULES, SUMMARY_CONTRACT};

pub const MIN_TIME_DEFAULT: f64 = 1.0;
pub const MAX_QUERIES_DEFAULT: i64 = 20;

const SYSTEM_PROMPT: &str = r#"You are a MariaDB running-query analysis specialist.

Your job: snapshot the sessions executing right now, find the problematic
ones and say what to do about each.

Procedure:
1. Call get_processlist with the requested threshold (exclude Sleep sessions
   unless asked otherwise). If nothing matches, say so and suggest lowering
   the threshold or including sleeping connections.
2. Identify problem sessions: long runners, sessions in lock-wait states, and
   anything with an unusually high TIME value.
3. Map blocking relationships with get_innodb_lock_waits: a session is a
   blocker when another session waits on a lock it holds. Always separate
   blockers from victims.
4. For each problem session with SQL text available:
   - Get an execution plan by re-preparing the statement with
     EXPLAIN FORMAT=JSON through execute_sql, schema-qualified. Never re-run
     the statement itself.
   - Call get_performance_metrics_for_thread with the session id; when
     instrumentation is unavailable, note it once and continue. Classify the
     session as CPU-bound, I/O-bound or lock-bound.
   - Inspect referenced tables with SHOW CREATE TABLE / SHOW INDEX FROM and
     information_schema.tables row counts; note FULLTEXT indexes and LIKE
     patterns that could use them.
5. Call get_buffer_pool_statistics once for cache context.

Report: per-session diagnosis ordered by impact, with blocking chains drawn
out, then prioritized remediation: kill candidates (with the exact session
id and what terminating it would abort), index or rewrite candidates, and
resource advice. Killing a session is always a suggestion, never an action."#;

pub struct RunningQueryWorkflow;

impl Workflow for RunningQueryWorkflow {
    fn name(&self) -> &'static str {
        RUNNING_QUERY
    }

    fn description(&self) -> &'static str {
        "Analyze currently executing queries, lock waits and blocking chains"
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
            "get_processlist",
            "get_innodb_lock_waits",
            "get_performance_metrics_for_thread",
            "get_buffer_pool_statistics",
            "get_server_capabilities",
        ]
    }

    fn task_prompt(&self, params: &Value) -> String {
        let min_time = params
            .get("min_time_seconds")
            .and_then(Value::as_f64)
            .unwrap_or(MIN_TIME_DEFAULT)
            .max(0.0);
        let include_sleeping = params
            .get("include_sleeping")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let max_queries = params
            .get("max_queries")
            .and_then(Value::as_i64)
            .unwrap_or(MAX_QUERIES_DEFAULT)
            .clamp(1, 100);
        format!(
            "Analyze currently running queries that have been executing for at \
             least {min_time} second(s). {} Analyze at most {max_queries} sessions \
             in detail, longest-running and blocking sessions first.",
            if include_sleeping {
                "Include sleeping/idle connections."
            } else {
                "Exclude sleeping/idle connections."
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_exclude_sleeping_sessions() {
        let w = RunningQueryWorkflow;
        let p = w.task_prompt(&json!({}));
        assert!(p.contains("at least 1 second(s)"));
        assert!(p.contains("Exclude sleeping"));
        assert!(p.contains("at most 20"));
    }

    #[test]
    fn include_sleeping_flag_is_respected() {
        let w = RunningQueryWorkflow;
        let p = w.task_prompt(&json!({"include_sleeping": true, "min_time_seconds": 5.0}));
        assert!(p.contains("Include sleeping"));
        assert!(p.contains("at least 5 second(s)"));
    }
}
