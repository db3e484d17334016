//! Workflow reports: markdown for humans plus a machine-readable summary the
//! orchestrator can route on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalState {
    Complete,
    PartialBudget,
    PartialError,
}

impl TerminalState {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalState::Complete => "complete",
            TerminalState::PartialBudget => "partial-budget",
            TerminalState::PartialError => "partial-error",
        }
    }
}

/// Cause categories the orchestrator chains on.
pub const CATEGORY_QUERY_PERFORMANCE: &str = "query-performance";
pub const CATEGORY_LOCK_CONTENTION: &str = "lock-contention";
pub const CATEGORY_REPLICATION: &str = "replication";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub do_not: Vec<String>,
}

impl ReportSummary {
    /// Category of the highest-ranked finding, used for conditional chaining.
    pub fn top_category(&self) -> Option<&str> {
        self.findings.iter().find_map(|f| f.category.as_deref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub workflow: String,
    pub markdown: String,
    pub summary: Option<ReportSummary>,
    pub state: TerminalState,
    pub turns_used: usize,
    /// Tool name and error kind when the run ended on a tool failure.
    pub failed_tool: Option<(String, String)>,
}

impl AgentReport {
    pub fn is_partial(&self) -> bool {
        self.state != TerminalState::Complete
    }
}

/// Workflows are asked to end their reply with a fenced ```json summary
/// block; parse the last one, tolerating its absence.
pub fn parse_summary(markdown: &str) -> Option<ReportSummary> {
    let mut last: Option<&str> = None;
    let mut rest = markdown;
    while let Some(start) = rest.find("```json") {
        let body = &rest[start + 7..];
        if let Some(end) = body.find("```") {
            last = Some(body[..end].trim());
            rest = &body[end + 3..];
        } else {
            break;
        }
    }
    serde_json::from_str(last?).ok()
}

/// The markdown body with the trailing machine summary stripped.
pub fn strip_summary_block(markdown: &str) -> String {
    if let Some(start) = markdown.rfind("```json") {
        let tail = &markdown[start..];
        if tail.trim_end().ends_with("```") {
            return markdown[..start].trim_end().to_string();
        }
    }
    markdown.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"## Findings

Lock contention on `orders`.

```json
{"severity": "high", "findings": [{"title": "Lock contention",
  "category": "lock-contention",
  "indicators": ["Innodb_row_lock_current_waits=12"],
  "actions": ["inspect blocking session 42"]}],
 "do_not": ["do not kill sessions blindly"]}
```"#;

    #[test]
    fn summary_block_parses() {
        let summary = parse_summary(REPORT).unwrap();
        assert_eq!(summary.severity.as_deref(), Some("high"));
        assert_eq!(summary.top_category(), Some("lock-contention"));
        assert_eq!(summary.do_not.len(), 1);
    }

    #[test]
    fn missing_block_is_none() {
        assert!(parse_summary("plain text, no machine summary").is_none());
        assert!(parse_summary("```json not closed").is_none());
    }

    #[test]
    fn strip_removes_only_the_trailing_block() {
        let stripped = strip_summary_block(REPORT);
        assert!(stripped.contains("Lock contention on"));
        assert!(!stripped.contains("```json"));
    }

    #[test]
    fn malformed_summary_is_tolerated() {
        assert!(parse_summary("```json\n{not valid}\n```").is_none());
    }
}
