//! Trait abstractions for the MCP channel and server layers.

use std::time::Duration;

use {async_trait::async_trait, serde_json::Value};

use crate::{
    error::Result,
    types::{JsonRpcResponse, ToolDefinition, ToolsCallResult, TransportResult},
};

/// Channel layer for MCP communication (JSON-RPC).
///
/// Implemented over child process pipes, Lambda invocations and streamable
/// HTTP. Dropping a pending `request` future abandons the request and releases
/// whatever it held.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if the underlying connection/process is still alive.
    async fn is_alive(&self) -> bool;

    /// Kill/close the underlying connection/process.
    async fn kill(&self);
}

/// Opens a fresh channel to one server. Called on every (re)connect.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self) -> Result<std::sync::Arc<dyn McpTransport>>;

    /// Short human-readable target, used in logs.
    fn describe(&self) -> String;
}

/// One MCP server as the orchestration layer sees it.
///
/// All methods take `&self` so a server can be shared across concurrent
/// tool calls.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// The configured, process-unique server name.
    fn server_name(&self) -> &str;

    /// Establish the channel and complete the MCP handshake.
    /// A no-op when already connected.
    async fn connect(&self) -> TransportResult<()>;

    /// Tools advertised by the server, in server order.
    async fn list_tools(&self) -> TransportResult<Vec<ToolDefinition>>;

    /// Invoke a tool, giving up after `timeout`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> TransportResult<ToolsCallResult>;

    /// Release the channel. Safe to call at any point, including after a
    /// failed or partial `connect`.
    async fn disconnect(&self);
}
