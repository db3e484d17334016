//! The bounded reasoning loop every diagnostic workflow runs on, plus the
//! workflow state machine and registry.

pub mod report;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::error::DiagError;
use crate::core::guardrails;
use crate::core::llm::{ChatMessage, LlmProvider, LlmTurn};
use crate::core::observability::{LlmUsage, ObservabilitySink, TelemetryRecord};
use crate::core::tools::{ToolContext, ToolRegistry};

use report::{parse_summary, strip_summary_block, AgentReport, TerminalState};

pub const TURN_BUDGET_DEFAULT: usize = 20;
pub const TURN_BUDGET_TRIAGE: usize = 30;

/// Loop state: planning → invoking-tool → interpreting → (planning | done |
/// aborted-budget | aborted-error). Terminal states always emit a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Planning,
    InvokingTool,
    Interpreting,
    Done,
    AbortedBudget,
    AbortedError,
}

pub fn can_transition(from: WorkflowState, to: WorkflowState) -> bool {
    use WorkflowState::*;
    match from {
        Planning => matches!(to, InvokingTool | Done | AbortedBudget | AbortedError),
        InvokingTool => matches!(to, Interpreting | AbortedError),
        Interpreting => matches!(to, Planning | Done | AbortedBudget | AbortedError),
        Done | AbortedBudget | AbortedError => false,
    }
}

/// A named diagnostic workflow: prompt, tool surface and budget.
pub trait Workflow: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn system_prompt(&self) -> &'static str;
    fn tool_names(&self) -> Vec<&'static str>;
    fn turn_budget(&self) -> usize {
        TURN_BUDGET_DEFAULT
    }
    /// Build the opening task message from caller parameters.
    fn task_prompt(&self, params: &Value) -> String;
}

/// Workflows are resolved by name at call time, so a workflow can recommend
/// another without any structural cycle.
#[derive(Default)]
pub struct WorkflowRegistry {
    entries: HashMap<&'static str, Arc<dyn Workflow>>,
    order: Vec<&'static str>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        let name = workflow.name();
        assert!(
            !self.entries.contains_key(name),
            "duplicate workflow name: {name}"
        );
        self.order.push(name);
        self.entries.insert(name, workflow);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Workflow>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> &[&'static str] {
        &self.order
    }
}

/// Shared machinery for running one workflow to a terminal state.
pub struct WorkflowRunner {
    pub llm: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolRegistry>,
    pub tool_ctx: Arc<ToolContext>,
    pub sink: Arc<ObservabilitySink>,
}

pub struct RunOptions {
    pub root_id: String,
    /// Attribution tag for telemetry; usually the workflow name.
    pub attribution: String,
    pub cancel: CancellationToken,
    pub deadline: Option<Duration>,
}

impl WorkflowRunner {
    pub async fn run(
        &self,
        workflow: &dyn Workflow,
        params: &Value,
        opts: &RunOptions,
    ) -> AgentReport {
        let started = Instant::now();
        let catalog = self.tools.catalog(&workflow.tool_names());
        let mut messages = vec![
            ChatMessage::system(workflow.system_prompt()),
            ChatMessage::user(workflow.task_prompt(params)),
        ];

        let mut state = WorkflowState::Planning;
        let mut turns = 0usize;
        let mut failed_tool: Option<(String, String)> = None;
        let mut last_text = String::new();
        let budget = workflow.turn_budget();

        info!(workflow = workflow.name(), budget, "workflow started");

        loop {
            debug_assert!(matches!(
                state,
                WorkflowState::Planning | WorkflowState::Interpreting
            ));
            if opts.cancel.is_cancelled() {
                state = WorkflowState::AbortedError;
                failed_tool.get_or_insert(("(cancelled)".into(), "cancelled".into()));
                break;
            }
            if let Some(deadline) = opts.deadline {
                if started.elapsed() >= deadline {
                    state = WorkflowState::AbortedBudget;
                    break;
                }
            }
            if turns >= budget {
                state = WorkflowState::AbortedBudget;
                break;
            }
            turns += 1;

            let output = tokio::select! {
                _ = opts.cancel.cancelled() => Err(DiagError::Cancelled),
                out = self.llm.generate(&messages, &catalog) => out,
            };
            let output = match output {
                Ok(o) => o,
                Err(e) => {
                    warn!(workflow = workflow.name(), "reasoning call failed: {e}");
                    failed_tool = Some(("(reasoning)".into(), e.kind().into()));
                    state = WorkflowState::AbortedError;
                    break;
                }
            };
            self.sink.append(TelemetryRecord::Llm(LlmUsage {
                root_id: opts.root_id.clone(),
                attribution: opts.attribution.clone(),
                input_tokens: output.usage.input_tokens,
                output_tokens: output.usage.output_tokens,
                total_tokens: output.usage.total_tokens,
                round_trips: 1,
                at: Utc::now(),
            }));

            match output.turn {
                LlmTurn::Text(text) => {
                    last_text = text;
                    state = WorkflowState::Done;
                    break;
                }
                LlmTurn::ToolCalls(calls) => {
                    state = WorkflowState::InvokingTool;
                    messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
                    // tool calls within a workflow are strictly serialized
                    for call in calls {
                        let result = self
                            .tools
                            .dispatch(
                                &call.name,
                                &call.arguments,
                                &self.tool_ctx,
                                &self.sink,
                                &opts.root_id,
                                None,
                                &opts.cancel,
                            )
                            .await;
                        let feedback = match result {
                            Ok(value) => value.to_string(),
                            Err(e) if e.is_degradable() => {
                                // degraded feature is evidence, not failure
                                format!("{{\"available\": false, \"note\": \"{e}\"}}")
                            }
                            Err(DiagError::Cancelled) => {
                                messages.push(ChatMessage::tool_result(
                                    call.id.clone(),
                                    "{\"cancelled\": true}",
                                ));
                                failed_tool = Some((call.name.clone(), "cancelled".into()));
                                state = WorkflowState::AbortedError;
                                break;
                            }
                            Err(e) => {
                                // any other tool error ends the workflow with
                                // an error report
                                warn!(
                                    workflow = workflow.name(),
                                    tool = %call.name,
                                    "terminating on tool error: {e}"
                                );
                                failed_tool = Some((call.name.clone(), e.kind().into()));
                                state = WorkflowState::AbortedError;
                                break;
                            }
                        };
                        messages.push(ChatMessage::tool_result(call.id.clone(), feedback));
                    }
                    if state == WorkflowState::AbortedError {
                        break;
                    }
                    state = WorkflowState::Interpreting;
                }
            }
        }

        self.finish(workflow, state, turns, last_text, failed_tool)
    }

    fn finish(
        &self,
        workflow: &dyn Workflow,
        state: WorkflowState,
        turns: usize,
        last_text: String,
        failed_tool: Option<(String, String)>,
    ) -> AgentReport {
        let terminal = match state {
            WorkflowState::Done => TerminalState::Complete,
            WorkflowState::AbortedBudget => TerminalState::PartialBudget,
            _ => TerminalState::PartialError,
        };
        let summary = parse_summary(&last_text);
        let mut markdown = guardrails::sanitize_output(&strip_summary_block(&last_text));
        match terminal {
            TerminalState::PartialBudget => {
                markdown.push_str(
                    "\n\n> **Partial analysis:** the turn budget was exhausted before the \
                     workflow completed; findings above cover only what was examined.",
                );
            }
            TerminalState::PartialError => {
                if let Some((tool, kind)) = &failed_tool {
                    markdown.push_str(&format!(
                        "\n\n> **Incomplete:** tool `{tool}` failed with `{kind}`. \
                         The inspector workflow can be used to examine the underlying \
                         tables directly.",
                    ));
                }
            }
            TerminalState::Complete => {}
        }
        info!(
            workflow = workflow.name(),
            state = terminal.as_str(),
            turns,
            "workflow finished"
        );
        AgentReport {
            workflow: workflow.name().to_string(),
            markdown,
            summary,
            state: terminal,
            turns_used: turns,
            failed_tool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let path = [
            (WorkflowState::Planning, WorkflowState::InvokingTool),
            (WorkflowState::InvokingTool, WorkflowState::Interpreting),
            (WorkflowState::Interpreting, WorkflowState::Planning),
            (WorkflowState::Planning, WorkflowState::Done),
        ];
        for (from, to) in path {
            assert!(
                can_transition(from, to),
                "expected transition {:?} -> {:?} to be allowed",
                from,
                to
            );
        }
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [
            WorkflowState::Done,
            WorkflowState::AbortedBudget,
            WorkflowState::AbortedError,
        ] {
            for to in [
                WorkflowState::Planning,
                WorkflowState::InvokingTool,
                WorkflowState::Interpreting,
            ] {
                assert!(!can_transition(terminal, to));
            }
        }
    }

    #[test]
    fn tool_invocation_cannot_skip_interpretation() {
        assert!(!can_transition(
            WorkflowState::InvokingTool,
            WorkflowState::Done
        ));
        assert!(!can_transition(
            WorkflowState::InvokingTool,
            WorkflowState::Planning
        ));
    }
}
