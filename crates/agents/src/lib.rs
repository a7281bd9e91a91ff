//! LLM side of the conduit runtime: provider abstraction, retrying client,
//! and the chat session that routes tool calls to MCP servers.

pub mod error;
pub mod llm_client;
pub mod model;
pub mod providers;
pub mod session;

pub use {
    error::{Error, Result},
    llm_client::{LlmClient, LlmTurn, RetryPolicy},
    model::{ChatMessage, CompletionResponse, LlmProvider, ToolCall, ToolCallResult, Usage},
    providers::{BedrockProvider, build_provider},
    session::{ChatSession, FailureReason, SessionOptions, SessionOutcome, SessionState},
};
