//! The five diagnostic workflows, registered by name.

pub mod incident_triage;
pub mod inspector;
pub mod replication_health;
pub mod running_query;
pub mod slow_query;

use std::sync::Arc;

use crate::core::agent::WorkflowRegistry;

pub const SLOW_QUERY: &str = "slow_query";
pub const RUNNING_QUERY: &str = "running_query";
pub const INCIDENT_TRIAGE: &str = "incident_triage";
pub const REPLICATION_HEALTH: &str = "replication_health";
pub const INSPECTOR: &str = "inspector";

pub fn build_registry() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    registry.register(Arc::new(slow_query::SlowQueryWorkflow));
    registry.register(Arc::new(running_query::RunningQueryWorkflow));
    registry.register(Arc::new(incident_triage::IncidentTriageWorkflow));
    registry.register(Arc::new(replication_health::ReplicationHealthWorkflow));
    registry.register(Arc::new(inspector::InspectorWorkflow));
    registry
}

/// Shared trailer asking for the machine-readable summary block.
pub(crate) const SUMMARY_CONTRACT: &str = "
Finish your final reply with a fenced ```json block containing a machine
summary: {\"severity\": \"low|medium|high|critical\", \"findings\": [{\"title\",
\"severity\", \"category\", \"indicators\": [..], \"actions\": [..]}],
\"do_not\": [..]}. Use category values \"query-performance\",
\"lock-contention\" or \"replication\" where one applies. The block must be
the last thing in the reply.";

/// Shared safety rules; every workflow is strictly read-only.
pub(crate) const SAFETY_RULES: &str = "
Safety rules:
- Use ONLY the provided tools for database data; never invent tool results.
- Everything is read-only. Never execute DDL, DML or configuration changes;
  present any mutation as a suggestion with its impact.
- If a tool reports a feature as unavailable, that is a capability gap, not
  a database problem; continue with a degraded analysis and say so.
- If a tool fails, explain the failure and continue gracefully with what you
  have.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_all_five_workflows() {
        let registry = build_registry();
        for name in [
            SLOW_QUERY,
            RUNNING_QUERY,
            INCIDENT_TRIAGE,
            REPLICATION_HEALTH,
            INSPECTOR,
        ] {
            assert!(registry.get(name).is_some(), "missing workflow {name}");
        }
        assert_eq!(registry.names().len(), 5);
    }

    #[test]
    fn workflows_only_reference_registered_tools() {
        let registry = build_registry();
        let mut tools = crate::core::tools::ToolRegistry::new();
        crate::core::tools::db_tools::register(&mut tools);
        crate::core::tools::log_tools::register(&mut tools);
        crate::core::tools::perf_tools::register(&mut tools);
        crate::core::tools::metrics_tools::register(&mut tools);
        for name in registry.names() {
            let workflow = registry.get(name).unwrap();
            for tool in workflow.tool_names() {
                assert!(
                    tools.spec(tool).is_some(),
                    "workflow {name} references unknown tool {tool}"
                );
            }
        }
    }
}
