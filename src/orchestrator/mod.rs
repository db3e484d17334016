//! Entry point: routes a free-form request to one or more workflows, runs
//! them sequentially under budgets, aggregates telemetry across the call
//! tree and synthesizes a unified report.

pub mod router;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::INCIDENT_TRIAGE;
use crate::core::agent::report::AgentReport;
use crate::core::agent::{RunOptions, WorkflowRegistry, WorkflowRunner};
use crate::core::error::{DiagError, DiagResult};
use crate::core::llm::{ChatMessage, LlmTurn};
use crate::core::observability::{
    AggregatedTotals, LlmUsage, ObservabilitySink, TelemetryRecord, SELF_ATTRIBUTION,
};

use router::{chain_for_category, route, Route, CLARIFYING_QUESTION};

/// Wall-clock budget for each child workflow.
pub const CHILD_DEADLINE_DEFAULT: Duration = Duration::from_secs(300);

pub struct Orchestrator {
    pub runner: WorkflowRunner,
    pub workflows: WorkflowRegistry,
    pub sink: Arc<ObservabilitySink>,
    pub child_deadline: Duration,
}

#[derive(Debug)]
pub struct OrchestratorResponse {
    pub root_id: String,
    pub markdown: String,
    pub reports: Vec<AgentReport>,
    pub totals: AggregatedTotals,
    /// True when the response is a clarifying question, not a diagnosis.
    pub clarification: bool,
}

impl Orchestrator {
    /// Run one named workflow directly (the programmatic per-workflow entry
    /// point). Attribution is `self`: the workflow is the whole request.
    pub async fn run_workflow(
        &self,
        name: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> DiagResult<OrchestratorResponse> {
        let workflow = self
            .workflows
            .get(name)
            .ok_or_else(|| DiagError::UnknownTool(format!("workflow {name}")))?;
        let root_id = ObservabilitySink::new_invocation_id();
        let report = self
            .runner
            .run(
                workflow.as_ref(),
                &params,
                &RunOptions {
                    root_id: root_id.clone(),
                    attribution: SELF_ATTRIBUTION.to_string(),
                    cancel,
                    deadline: Some(self.child_deadline),
                },
            )
            .await;
        let totals = self.sink.aggregate(&root_id);
        let markdown = assemble_single(&report, &totals);
        Ok(OrchestratorResponse {
            root_id,
            markdown,
            reports: vec![report],
            totals,
            clarification: false,
        })
    }

    /// Handle a free-form request: route, run, maybe chain once, synthesize.
    pub async fn handle(
        &self,
        request: &str,
        cancel: CancellationToken,
    ) -> DiagResult<OrchestratorResponse> {
        let root_id = ObservabilitySink::new_invocation_id();
        info!(root = %root_id, "orchestrator request: {request}");

        let plan = match route(request) {
            Route::Clarify => {
                return Ok(OrchestratorResponse {
                    root_id,
                    markdown: CLARIFYING_QUESTION.to_string(),
                    reports: Vec::new(),
                    totals: AggregatedTotals::default(),
                    clarification: true,
                })
            }
            Route::Direct(name) => (name, false),
            Route::TriageThenChain => (INCIDENT_TRIAGE, true),
        };

        let mut reports = Vec::new();
        let first = self
            .run_child(plan.0, self.params_for(plan.0, request), &root_id, &cancel)
            .await?;
        reports.push(first);

        // conditional chaining: one hop at most, driven by the triage
        // summary's top cause category
        if plan.1 && !cancel.is_cancelled() {
            let category = reports[0]
                .summary
                .as_ref()
                .and_then(|s| s.top_category())
                .map(str::to_string);
            if let Some(next) = category.as_deref().and_then(chain_for_category) {
                info!(workflow = next, "chaining on triage category {category:?}");
                let params = if next == crate::agents::SLOW_QUERY {
                    json!({"hours": 1.0})
                } else {
                    json!({})
                };
                // a failed first hop never blocks the chain attempt
                match self.run_child(next, params, &root_id, &cancel).await {
                    Ok(report) => reports.push(report),
                    Err(e) => warn!("chained workflow {next} failed to start: {e}"),
                }
            }
        }

        let markdown = self.synthesize(request, &reports, &root_id).await;
        let totals = self.sink.aggregate(&root_id);
        let markdown = format!("{markdown}\n\n{}", telemetry_section(&totals));
        Ok(OrchestratorResponse {
            root_id,
            markdown,
            reports,
            totals,
            clarification: false,
        })
    }

    fn params_for(&self, workflow: &str, request: &str) -> Value {
        if workflow == crate::agents::INSPECTOR {
            json!({"sql": request})
        } else {
            json!({})
        }
    }

    async fn run_child(
        &self,
        name: &str,
        params: Value,
        root_id: &str,
        cancel: &CancellationToken,
    ) -> DiagResult<AgentReport> {
        let workflow = self
            .workflows
            .get(name)
            .ok_or_else(|| DiagError::UnknownTool(format!("workflow {name}")))?;
        Ok(self
            .runner
            .run(
                workflow.as_ref(),
                &params,
                &RunOptions {
                    root_id: root_id.to_string(),
                    attribution: name.to_string(),
                    cancel: cancel.clone(),
                    deadline: Some(self.child_deadline),
                },
            )
            .await)
    }

    /// Combine child reports. A single report passes through with headers;
    /// multiple reports get an LLM-written executive summary and correlation,
    /// attributed to the orchestrator itself.
    async fn synthesize(&self, request: &str, reports: &[AgentReport], root_id: &str) -> String {
        if reports.len() == 1 {
            let r = &reports[0];
            return format!(
                "# Diagnostic report: {}\n\n_Terminal state: {}_\n\n{}",
                r.workflow,
                r.state.as_str(),
                r.markdown
            );
        }

        let mut body = String::new();
        for r in reports {
            body.push_str(&format!(
                "\n\n## {} (state: {})\n\n{}",
                r.workflow,
                r.state.as_str(),
                r.markdown
            ));
        }

        let correlated = self.correlate(request, reports, root_id).await;
        let mut out = String::from("# Diagnostic report\n");
        match correlated {
            Some(synthesis) => {
                out.push_str("\n## Executive summary\n\n");
                out.push_str(&synthesis);
            }
            None => {
                out.push_str("\n## Executive summary\n\nMultiple workflows ran; see the \
                              per-workflow findings below.");
            }
        }
        out.push_str("\n\n# Per-workflow findings");
        out.push_str(&body);
        out
    }

    /// One reasoning round trip over the child reports: executive summary,
    /// correlated findings, prioritized recommendations, next steps.
    async fn correlate(
        &self,
        request: &str,
        reports: &[AgentReport],
        root_id: &str,
    ) -> Option<String> {
        let mut prompt = format!(
            "A user asked: {request:?}. The following diagnostic workflow reports were \
             produced, in order. Write (1) a 2-3 sentence executive summary, (2) \
             correlated findings across the reports, (3) prioritized recommendations, \
             (4) next steps. Be concrete, reference the workflows by name, and do not \
             invent data that is not in the reports.\n"
        );
        for r in reports {
            prompt.push_str(&format!(
                "\n--- report from {} (state {}) ---\n{}\n",
                r.workflow,
                r.state.as_str(),
                r.markdown
            ));
        }
        let messages = [
            ChatMessage::system(
                "You synthesize database diagnostic reports into one concise, \
                 actionable response. Markdown. No tool calls.",
            ),
            ChatMessage::user(prompt),
        ];
        match self.runner.llm.generate(&messages, &[]).await {
            Ok(output) => {
                self.sink.append(TelemetryRecord::Llm(LlmUsage {
                    root_id: root_id.to_string(),
                    attribution: SELF_ATTRIBUTION.to_string(),
                    input_tokens: output.usage.input_tokens,
                    output_tokens: output.usage.output_tokens,
                    total_tokens: output.usage.total_tokens,
                    round_trips: 1,
                    at: chrono::Utc::now(),
                }));
                match output.turn {
                    LlmTurn::Text(text) if !text.trim().is_empty() => {
                        Some(crate::core::guardrails::sanitize_output(&text))
                    }
                    _ => None,
                }
            }
            Err(e) => {
                warn!("synthesis call failed, falling back to mechanical assembly: {e}");
                None
            }
        }
    }
}

fn assemble_single(report: &AgentReport, totals: &AggregatedTotals) -> String {
    format!(
        "# Diagnostic report: {}\n\n_Terminal state: {}_\n\n{}\n\n{}",
        report.workflow,
        report.state.as_str(),
        report.markdown,
        telemetry_section(totals)
    )
}

fn telemetry_section(totals: &AggregatedTotals) -> String {
    let mut out = String::from("## Telemetry\n\n");
    out.push_str(&format!(
        "- Round trips: {}\n- Input tokens: {}\n- Output tokens: {}\n- Total tokens: {}\n\
         - Tool invocations: {} ({} failed)\n",
        totals.grand.round_trips,
        totals.grand.input_tokens,
        totals.grand.output_tokens,
        totals.grand.total_tokens,
        totals.grand.tool_invocations,
        totals.grand.failed_invocations,
    ));
    if totals.by_attribution.len() > 1 {
        out.push_str("\nPer-workflow breakdown:\n");
        for (who, t) in &totals.by_attribution {
            out.push_str(&format!(
                "- {who}: {} round trips, {} tokens\n",
                t.round_trips, t.total_tokens
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::report::TerminalState;

    fn report(workflow: &str, state: TerminalState) -> AgentReport {
        AgentReport {
            workflow: workflow.into(),
            markdown: format!("findings from {workflow}"),
            summary: None,
            state,
            turns_used: 3,
            failed_tool: None,
        }
    }

    #[test]
    fn single_report_passes_through_with_headers() {
        let totals = AggregatedTotals::default();
        let out = assemble_single(&report("slow_query", TerminalState::Complete), &totals);
        assert!(out.contains("# Diagnostic report: slow_query"));
        assert!(out.contains("_Terminal state: complete_"));
        assert!(out.contains("findings from slow_query"));
        assert!(out.contains("## Telemetry"));
    }

    #[test]
    fn telemetry_section_includes_breakdown_when_multiple_attributions() {
        let mut totals = AggregatedTotals::default();
        totals.grand.round_trips = 5;
        totals.grand.total_tokens = 1000;
        totals.by_attribution.insert(
            "incident_triage".into(),
            crate::core::observability::UsageTotals {
                round_trips: 3,
                total_tokens: 600,
                ..Default::default()
            },
        );
        totals.by_attribution.insert(
            "running_query".into(),
            crate::core::observability::UsageTotals {
                round_trips: 2,
                total_tokens: 400,
                ..Default::default()
            },
        );
        let section = telemetry_section(&totals);
        assert!(section.contains("Per-workflow breakdown"));
        assert!(section.contains("incident_triage: 3 round trips"));
    }
}
