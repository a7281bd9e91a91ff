//! MCP client: manages the protocol handshake and tool interactions with a single MCP server.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, info, warn},
};

use crate::{
    error::Error,
    traits::{ChannelConnector, McpTransport, ServerTransport},
    types::{
        ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, McpTransportError,
        PROTOCOL_VERSION, ToolDefinition, ToolsCallParams, ToolsCallResult, ToolsListParams,
        ToolsListResult, TransportResult,
    },
};

/// Upper bound on `initialize` + `notifications/initialized`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// An MCP client for one configured server, over any channel.
///
/// The channel is opened lazily by [`ServerTransport::connect`] and can be
/// reopened after [`ServerTransport::disconnect`].
pub struct McpClient {
    server_name: String,
    connector: Box<dyn ChannelConnector>,
    channel: RwLock<Option<Arc<dyn McpTransport>>>,
    connect_lock: Mutex<()>,
    /// Present when the server cannot handle interleaved requests.
    call_gate: Option<Mutex<()>>,
    handshake_timeout: Duration,
}

impl McpClient {
    pub fn new(server_name: impl Into<String>, connector: Box<dyn ChannelConnector>) -> Self {
        Self {
            server_name: server_name.into(),
            connector,
            channel: RwLock::new(None),
            connect_lock: Mutex::new(()),
            call_gate: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Allow at most one in-flight tool call on this server.
    #[must_use]
    pub fn with_serialized_calls(mut self) -> Self {
        self.call_gate = Some(Mutex::new(()));
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.channel.read().await.is_some()
    }

    async fn channel(&self) -> TransportResult<Arc<dyn McpTransport>> {
        self.channel.read().await.clone().ok_or_else(|| {
            McpTransportError::Connection(format!(
                "MCP server '{}' is not connected",
                self.server_name
            ))
        })
    }

    async fn handshake(&self, channel: &Arc<dyn McpTransport>) -> TransportResult<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "conduit".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = channel
            .request("initialize", Some(to_params(&params)?))
            .await
            .map_err(Error::into_transport_error)?;

        let result: InitializeResult = parse_result(resp.result, "initialize")?;
        info!(
            server = %self.server_name,
            protocol = %result.protocol_version,
            server_info = %result.server_info.name,
            "MCP server initialized"
        );

        channel
            .notify("notifications/initialized", None)
            .await
            .map_err(Error::into_transport_error)
    }
}

fn to_params<T: serde::Serialize>(params: &T) -> TransportResult<Value> {
    serde_json::to_value(params).map_err(|e| McpTransportError::Protocol(e.to_string()))
}

fn parse_result<T: serde::de::DeserializeOwned>(
    result: Option<Value>,
    method: &str,
) -> TransportResult<T> {
    let value = result
        .ok_or_else(|| McpTransportError::Protocol(format!("{method} returned no result")))?;
    serde_json::from_value(value)
        .map_err(|e| McpTransportError::Protocol(format!("malformed {method} result: {e}")))
}

#[async_trait]
impl ServerTransport for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn connect(&self) -> TransportResult<()> {
        let _connecting = self.connect_lock.lock().await;

        let existing = self.channel.read().await.clone();
        if let Some(channel) = existing {
            if channel.is_alive().await {
                return Ok(());
            }
            debug!(server = %self.server_name, "discarding dead MCP channel");
            self.channel.write().await.take();
            channel.kill().await;
        }

        info!(
            server = %self.server_name,
            target = %self.connector.describe(),
            "connecting to MCP server"
        );
        let channel = self
            .connector
            .open()
            .await
            .map_err(|e| e.into_transport_error().into_connection_error())?;

        match tokio::time::timeout(self.handshake_timeout, self.handshake(&channel)).await {
            Ok(Ok(())) => {
                *self.channel.write().await = Some(channel);
                Ok(())
            },
            Ok(Err(e)) => {
                warn!(server = %self.server_name, error = %e, "MCP initialize handshake failed");
                channel.kill().await;
                Err(e.into_connection_error())
            },
            Err(_) => {
                warn!(server = %self.server_name, "MCP initialize handshake timed out");
                channel.kill().await;
                Err(McpTransportError::Connection(format!(
                    "handshake with '{}' did not finish within {:?}",
                    self.server_name, self.handshake_timeout
                )))
            },
        }
    }

    async fn list_tools(&self) -> TransportResult<Vec<ToolDefinition>> {
        let channel = self.channel().await?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        loop {
            let params = to_params(&ToolsListParams {
                cursor: cursor.clone(),
            })?;
            let resp = channel
                .request("tools/list", Some(params))
                .await
                .map_err(Error::into_transport_error)?;
            let page: ToolsListResult = parse_result(resp.result, "tools/list")?;

            tools.extend(
                page.tools
                    .into_iter()
                    .map(|def| ToolDefinition::from_mcp(&self.server_name, def)),
            );

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(McpTransportError::Protocol(format!(
                            "tools/list repeated cursor '{next}'"
                        )));
                    }
                    cursor = Some(next);
                },
                _ => break,
            }
        }

        debug!(server = %self.server_name, count = tools.len(), "fetched MCP tools");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> TransportResult<ToolsCallResult> {
        let channel = self.channel().await?;
        let params = to_params(&ToolsCallParams {
            name: name.into(),
            arguments,
        })?;

        // The timeout starts once this call owns the channel.
        let _turn = match &self.call_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        let call = channel.request("tools/call", Some(params));

        let resp = match tokio::time::timeout(timeout, call).await {
            Ok(resp) => resp.map_err(Error::into_transport_error)?,
            Err(_) => {
                return Err(McpTransportError::Timeout(format!(
                    "tool '{name}' on '{}' did not answer within {timeout:?}",
                    self.server_name
                )));
            },
        };

        parse_result(resp.result, "tools/call")
    }

    async fn disconnect(&self) {
        let channel = self.channel.write().await.take();
        if let Some(channel) = channel {
            debug!(server = %self.server_name, "disconnecting MCP server");
            channel.kill().await;
        }
    }
}
