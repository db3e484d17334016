//! General-purpose read-only SQL inspector. Exists so textual
//! recommendations from other workflows ("check information_schema.x") can
//! be followed up mechanically.

use serde_json::Value;

use crate::core::agent::Workflow;

use super::{INSPECTOR, SAFETY_RULES, SUMMARY_CONTRACT};

const SYSTEM_PROMPT: &str = r#"You are a MariaDB database inspector, a
general-purpose read-only SQL agent.

Your job: execute the requested read-only statement and present the result
clearly.

Procedure:
1. Run the statement with execute_sql, honoring the requested row cap and
   timeout. Only SELECT, SHOW, DESCRIBE and EXPLAIN shapes are executable;
   if the statement is anything else, report that it was refused and why.
2. Present the result as a markdown table with the column headers in their
   original order. Mention explicitly when the result was truncated.
3. Add one short paragraph of context derived from the result: what the
   columns mean, notable values or anomalies, and an interpretation when one
   is warranted. If the result is empty, explain the likely reason.

Keep it to one query unless a follow-up is clearly needed to interpret the
result (for example resolving a variable the first result referenced)."#;

pub struct InspectorWorkflow;

impl Workflow for InspectorWorkflow {
    fn name(&self) -> &'static str {
        INSPECTOR
    }

    fn description(&self) -> &'static str {
        "Execute one read-only SQL statement and present the result with context"
    }

    fn system_prompt(&self) -> &'static str {
        static PROMPT: std::sync::OnceLock<String> = std::sync::OnceLock::new();
        PROMPT
            .get_or_init(|| format!("{SYSTEM_PROMPT}\n{SAFETY_RULES}\n{SUMMARY_CONTRACT}"))
            .as_str()
    }

    fn tool_names(&self) -> Vec<&'static str> {
        vec!["execute_sql", "get_server_capabilities"]
    }

    fn task_prompt(&self, params: &Value) -> String {
        let sql = params.get("sql").and_then(Value::as_str).unwrap_or("");
        let max_rows = params
            .get("max_rows")
            .and_then(Value::as_i64)
            .unwrap_or(100)
            .clamp(1, 10_000);
        let timeout = params
            .get("timeout_seconds")
            .and_then(Value::as_i64)
            .unwrap_or(10)
            .clamp(1, 60);
        format!(
            "Execute this read-only SQL and present the results with context:\n\n\
             {sql}\n\nUse max_rows={max_rows} and timeout_seconds={timeout}."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sql_and_limits_reach_the_prompt() {
        let w = InspectorWorkflow;
        let p = w.task_prompt(&json!({"sql": "SELECT 1", "max_rows": 5}));
        assert!(p.contains("SELECT 1"));
        assert!(p.contains("max_rows=5"));
        assert!(p.contains("timeout_seconds=10"));
    }
}
