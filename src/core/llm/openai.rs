//! OpenAI chat-completions provider with function-calling tools.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::config::OpenAiConfig;
use crate::core::error::{DiagError, DiagResult};

use super::{estimate_usage, ChatMessage, LlmOutput, LlmProvider, LlmTurn, TokenUsage, ToolCallRequest};

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const LLM_DEADLINE_SECS: u64 = 90;

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    /// JSON object, wire-encoded as a string.
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

pub struct OpenAiProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(cfg: &OpenAiConfig) -> DiagResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LLM_DEADLINE_SECS))
            .build()?;
        Ok(Self {
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage], tools: &[Value]) -> DiagResult<LlmOutput> {
        let req = OpenAiRequest {
            model: &self.model,
            messages,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
        };
        let res = self
            .client
            .post(COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DiagError::Timeout("LLM request".into())
                } else {
                    DiagError::Http(e)
                }
            })?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DiagError::Llm(format!(
                "{status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        let parsed: OpenAiResponse = res.json().await?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| DiagError::Llm("response contained no choices".into()))?;

        let turn = match message.tool_calls {
            Some(calls) if !calls.is_empty() => {
                let requests = calls
                    .into_iter()
                    .map(|c| {
                        let arguments = serde_json::from_str(&c.function.arguments)
                            .unwrap_or(Value::Object(Default::default()));
                        ToolCallRequest {
                            id: c.id,
                            name: c.function.name,
                            arguments,
                        }
                    })
                    .collect();
                LlmTurn::ToolCalls(requests)
            }
            _ => LlmTurn::Text(message.content.unwrap_or_default()),
        };

        let usage = match parsed.usage {
            Some(u) => TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
                estimated: false,
            },
            None => {
                let response_chars = match &turn {
                    LlmTurn::Text(t) => t.chars().count(),
                    LlmTurn::ToolCalls(calls) => calls
                        .iter()
                        .map(|c| c.arguments.to_string().chars().count())
                        .sum(),
                };
                estimate_usage(messages, response_chars)
            }
        };
        debug!(
            model = %self.model,
            input = usage.input_tokens,
            output = usage.output_tokens,
            "llm round trip"
        );
        Ok(LlmOutput { turn, usage })
    }
}
