//! Per-process telemetry: tool invocation records and LLM usage records,
//! appended in call-return order and aggregated over the call tree.
//!
//! Persistence is best-effort newline-delimited JSON; a failed write never
//! surfaces to the caller.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

pub const LOG_FILE: &str = ".observability_log.json";

/// Attribution tag for usage records: the orchestrator itself or a workflow.
pub const SELF_ATTRIBUTION: &str = "self";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Ok,
    Failed,
    GuardrailRejected,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub root_id: String,
    pub parent_id: Option<String>,
    pub tool: String,
    pub args: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: InvocationOutcome,
    /// Failure kind when outcome is not Ok.
    pub error_kind: Option<String>,
    pub result_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsage {
    pub root_id: String,
    pub attribution: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub round_trips: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Tool(ToolInvocation),
    Llm(LlmUsage),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub round_trips: u64,
    pub tool_invocations: u64,
    pub failed_invocations: u64,
}

impl UsageTotals {
    fn add_llm(&mut self, u: &LlmUsage) {
        self.input_tokens += u.input_tokens;
        self.output_tokens += u.output_tokens;
        self.total_tokens += u.total_tokens;
        self.round_trips += u.round_trips;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedTotals {
    pub grand: UsageTotals,
    pub by_attribution: BTreeMap<String, UsageTotals>,
}

pub struct ObservabilitySink {
    records: Mutex<Vec<TelemetryRecord>>,
    log_path: Option<PathBuf>,
}

impl ObservabilitySink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            log_path: Some(PathBuf::from(LOG_FILE)),
        }
    }

    /// A sink that never touches disk; used in tests.
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            log_path: None,
        }
    }

    pub fn new_invocation_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn append(&self, record: TelemetryRecord) {
        self.persist(&record);
        self.records
            .lock()
            .expect("telemetry sink poisoned")
            .push(record);
    }

    fn persist(&self, record: &TelemetryRecord) {
        let Some(path) = &self.log_path else { return };
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                warn!("telemetry record not serializable: {e}");
                return;
            }
        };
        let appended = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = appended {
            warn!("failed to persist telemetry record: {e}");
        }
    }

    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .expect("telemetry sink poisoned")
            .clone()
    }

    /// Sum every record whose root is `root_id`; the grand total equals the
    /// sum of the per-attribution breakdown.
    pub fn aggregate(&self, root_id: &str) -> AggregatedTotals {
        let records = self.records.lock().expect("telemetry sink poisoned");
        let mut out = AggregatedTotals::default();
        for record in records.iter() {
            match record {
                TelemetryRecord::Llm(u) if u.root_id == root_id => {
                    out.grand.add_llm(u);
                    out.by_attribution
                        .entry(u.attribution.clone())
                        .or_default()
                        .add_llm(u);
                }
                TelemetryRecord::Tool(t) if t.root_id == root_id => {
                    out.grand.tool_invocations += 1;
                    if t.outcome != InvocationOutcome::Ok {
                        out.grand.failed_invocations += 1;
                    }
                }
                _ => {}
            }
        }
        out
    }
}

impl Default for ObservabilitySink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(root: &str, who: &str, input: u64, output: u64) -> LlmUsage {
        LlmUsage {
            root_id: root.into(),
            attribution: who.into(),
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
            round_trips: 1,
            at: Utc::now(),
        }
    }

    #[test]
    fn totals_equal_sum_of_attributions() {
        let sink = ObservabilitySink::in_memory();
        sink.append(TelemetryRecord::Llm(usage("r1", SELF_ATTRIBUTION, 100, 10)));
        sink.append(TelemetryRecord::Llm(usage("r1", "incident_triage", 200, 20)));
        sink.append(TelemetryRecord::Llm(usage("r1", "running_query", 300, 30)));
        sink.append(TelemetryRecord::Llm(usage("other-root", "slow_query", 999, 99)));

        let agg = sink.aggregate("r1");
        assert_eq!(agg.grand.input_tokens, 600);
        assert_eq!(agg.grand.output_tokens, 60);
        assert_eq!(agg.grand.round_trips, 3);
        let attributed: u64 = agg
            .by_attribution
            .values()
            .map(|t| t.total_tokens)
            .sum();
        assert_eq!(attributed, agg.grand.total_tokens);
        assert_eq!(agg.by_attribution.len(), 3);
    }

    #[test]
    fn tool_records_count_without_double_counting_tokens() {
        let sink = ObservabilitySink::in_memory();
        let now = Utc::now();
        sink.append(TelemetryRecord::Tool(ToolInvocation {
            id: "i1".into(),
            root_id: "r1".into(),
            parent_id: None,
            tool: "execute_sql".into(),
            args: serde_json::json!({"sql": "SELECT 1"}),
            started_at: now,
            finished_at: now,
            outcome: InvocationOutcome::Ok,
            error_kind: None,
            result_bytes: 64,
        }));
        sink.append(TelemetryRecord::Tool(ToolInvocation {
            id: "i2".into(),
            root_id: "r1".into(),
            parent_id: Some("i1".into()),
            tool: "read_error_log".into(),
            args: serde_json::Value::Null,
            started_at: now,
            finished_at: now,
            outcome: InvocationOutcome::Timeout,
            error_kind: Some("timeout".into()),
            result_bytes: 0,
        }));
        let agg = sink.aggregate("r1");
        assert_eq!(agg.grand.tool_invocations, 2);
        assert_eq!(agg.grand.failed_invocations, 1);
        assert_eq!(agg.grand.total_tokens, 0);
    }

    #[test]
    fn snapshot_preserves_append_order() {
        let sink = ObservabilitySink::in_memory();
        sink.append(TelemetryRecord::Llm(usage("r", "a", 1, 1)));
        sink.append(TelemetryRecord::Llm(usage("r", "b", 2, 2)));
        let snap = sink.snapshot();
        assert_eq!(snap.len(), 2);
        match &snap[0] {
            TelemetryRecord::Llm(u) => assert_eq!(u.attribution, "a"),
            _ => panic!("unexpected record"),
        }
    }
}
