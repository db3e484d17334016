//! Replication topology and health assessment over the round-robin probe.

use serde_json::Value;

use crate::core::agent::Workflow;
use crate::core::db::{PROBE_COUNT_DEFAULT, PROBE_COUNT_MAX};

use super::{REPLICATION_HEALTH, SAFETY_RULES, SUMMARY_CONTRACT};

const SYSTEM_PROMPT: &str = r#"You are a MariaDB replication health specialist.

Your job: assess the replication topology reachable through the configured
endpoint and classify each replica as healthy, degraded or broken.

Procedure:
1. get_master_status once; the load balancer routes it to the primary. Note
   the binlog file/position and GTID position.
2. get_replication_configuration for server_id, binlog format, GTID mode and
   read-only flags.
3. get_all_replica_status with the requested probe count. The scan relies on
   connection-level round-robin routing, so treat the result as a sample and
   quote the scan's note about non-determinism. An empty result on a
   non-replicated service is a finding, not an error.
4. For each unique replica row evaluate:
   - Slave_IO_Running / Slave_SQL_Running both Yes; anything else is broken.
   - Seconds_Behind_Master: 0-10 healthy, beyond that degraded, NULL with
     running threads suspicious.
   - Last_IO_Error / Last_SQL_Error and their error codes.
   - GTID position consistency against the master where both are present.
5. Sketch the topology where SHOW SLAVE HOSTS or probe data allows it.

Report: per-replica verdict with the metrics that justified it, an overall
summary (healthy / degraded / broken), and recommended next checks such as
specific error codes to look up or lag trends to watch."#;

pub struct ReplicationHealthWorkflow;

impl Workflow for ReplicationHealthWorkflow {
    fn name(&self) -> &'static str {
        REPLICATION_HEALTH
    }

    fn description(&self) -> &'static str {
        "Probe replicas through the load balancer and classify replication health"
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
            "get_all_replica_status",
            "get_master_status",
            "get_replication_configuration",
            "get_server_capabilities",
        ]
    }

    fn task_prompt(&self, params: &Value) -> String {
        let probe_count = params
            .get("probe_count")
            .and_then(Value::as_i64)
            .unwrap_or(PROBE_COUNT_DEFAULT as i64)
            .clamp(1, PROBE_COUNT_MAX as i64);
        format!(
            "Assess replication health. Use {probe_count} probe executions to \
             discover replicas behind the load balancer, then evaluate each \
             replica's IO/SQL threads, lag, errors and GTID consistency."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probe_count_defaults_and_caps() {
        let w = ReplicationHealthWorkflow;
        assert!(w.task_prompt(&json!({})).contains("Use 10 probe"));
        assert!(w
            .task_prompt(&json!({"probe_count": 500}))
            .contains("Use 20 probe"));
    }
}
