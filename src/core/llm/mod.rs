//! Reasoning-service abstraction.
//!
//! The provider is authoritative only about which tool to call next; all
//! data flows through tool results. A reply is either plain text or a tool
//! call request against the registered catalog.

pub mod openai;

use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::core::error::DiagResult;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// Assistant turn that requested tool calls; echoed back verbatim so the
    /// service can pair it with the tool results that follow.
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant".into(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON argument object as supplied by the service.
    pub arguments: Value,
}

/// Wire shape when echoing a tool call back to the service: the arguments
/// object is re-encoded as a string, the way the service sent it.
impl Serialize for ToolCallRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry(
            "function",
            &serde_json::json!({
                "name": self.name,
                "arguments": self.arguments.to_string(),
            }),
        )?;
        map.end()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub estimated: bool,
}

/// One reasoning round trip: either a final text or tool call requests.
#[derive(Debug, Clone)]
pub enum LlmTurn {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
}

#[derive(Debug, Clone)]
pub struct LlmOutput {
    pub turn: LlmTurn,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model(&self) -> &str;

    /// One round trip. `tools` is the JSON-shaped catalog of callable tools;
    /// empty means text-only.
    async fn generate(&self, messages: &[ChatMessage], tools: &[Value]) -> DiagResult<LlmOutput>;
}

pub(crate) fn estimate_tokens_from_chars(char_count: usize) -> u64 {
    (char_count as u64).div_ceil(4)
}

/// Fallback accounting when the service omits usage numbers.
pub(crate) fn estimate_usage(messages: &[ChatMessage], response_chars: usize) -> TokenUsage {
    let input_chars: usize = messages
        .iter()
        .map(|m| m.content.as_deref().map(|c| c.chars().count()).unwrap_or(0))
        .sum();
    let input_tokens = estimate_tokens_from_chars(input_chars);
    let output_tokens = estimate_tokens_from_chars(response_chars);
    TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens + output_tokens,
        estimated: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_messages_carry_their_call_id() {
        let msg = ChatMessage::tool_result("call_1", "{\"rows\": []}");
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn usage_estimation_rounds_up() {
        let msgs = vec![ChatMessage::user("abcde")];
        let usage = estimate_usage(&msgs, 3);
        assert_eq!(usage.input_tokens, 2);
        assert_eq!(usage.output_tokens, 1);
        assert!(usage.estimated);
    }
}
