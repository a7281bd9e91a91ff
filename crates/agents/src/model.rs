use {async_trait::async_trait, conduit_mcp::FailureKind, serde_json::Value};

use crate::error::Result;

// ── Typed chat messages ─────────────────────────────────────────────────────

/// One entry of the conversation transcript.
///
/// The transcript is append-only: messages are never edited once pushed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    /// Assistant turn. `tool_calls` is empty for a final answer.
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    /// Results for every call of the preceding assistant turn, in call order.
    ToolResults {
        results: Vec<ToolCallResult>,
    },
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Create an assistant message with text only (no tool calls).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: vec![],
        }
    }

    /// Create an assistant message with tool calls (and optional text).
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content,
            tool_calls,
        }
    }

    pub fn tool_results(results: Vec<ToolCallResult>) -> Self {
        Self::ToolResults { results }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Correlation id assigned by the model.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Outcome of one tool call as reported back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
    /// Set when the call failed before the tool produced a result.
    pub failure: Option<FailureKind>,
}

impl ToolCallResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
            failure: None,
        }
    }

    /// The tool ran and reported an error itself (`isError: true`).
    pub fn tool_error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
            failure: None,
        }
    }

    /// The call could not be completed. Rendered as `[<kind>] <message>`.
    pub fn failure(tool_call_id: impl Into<String>, kind: FailureKind, message: &str) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: format!("[{kind}] {message}"),
            is_error: true,
            failure: Some(kind),
        }
    }
}

// ── Provider interface ──────────────────────────────────────────────────────

/// Request/response LLM backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier (e.g. "us.anthropic.claude-3-7-sonnet-20250219-v1:0").
    fn id(&self) -> &str;

    /// Send the full transcript and tool catalog. `tools` entries carry
    /// `name`, `description` and `parameters` (a JSON schema).
    async fn complete(&self, messages: &[ChatMessage], tools: &[Value])
    -> Result<CompletionResponse>;
}

/// Raw response from a provider; may mix text and tool calls.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_message_text() {
        let msg = ChatMessage::assistant("Hi there");
        assert!(
            matches!(msg, ChatMessage::Assistant { content: Some(t), tool_calls } if t == "Hi there" && tool_calls.is_empty())
        );
    }

    #[test]
    fn failure_results_carry_kind_prefix() {
        let result = ToolCallResult::failure("call_1", FailureKind::Auth, "token refresh failed");
        assert_eq!(result.content, "[auth_error] token refresh failed");
        assert!(result.is_error);
        assert_eq!(result.failure, Some(FailureKind::Auth));
    }

    #[test]
    fn tool_errors_are_not_failures() {
        let result = ToolCallResult::tool_error("call_1", "city not found");
        assert!(result.is_error);
        assert!(result.failure.is_none());
    }
}
