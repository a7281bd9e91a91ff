//! McpManager: lifecycle management for multiple MCP server connections.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use {
    conduit_config::SessionConfig,
    futures::future::join_all,
    serde_json::Value,
    tracing::{info, warn},
};

use crate::{
    registry::ToolRegistry,
    traits::ServerTransport,
    types::{McpTransportError, ToolDefinition, ToolsCallResult, TransportResult},
};

/// Retry and health policy for managed servers.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub tool_attempts: u32,
    pub tool_retry_delay: Duration,
    /// Protocol violations after which a server is treated as unavailable.
    pub protocol_error_threshold: u32,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(1),
            tool_attempts: 2,
            tool_retry_delay: Duration::from_secs(1),
            protocol_error_threshold: 3,
        }
    }
}

impl ManagerOptions {
    pub fn from_session(session: &SessionConfig) -> Self {
        Self {
            connect_attempts: session.connect_attempts.max(1),
            tool_attempts: session.tool_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Outcome of connecting every configured server.
#[derive(Debug, Default)]
pub struct StartReport {
    /// Servers whose tools made it into the registry, in configuration order.
    pub connected: Vec<String>,
    pub failed: Vec<(String, McpTransportError)>,
}

#[derive(Default)]
struct ServerHealth {
    protocol_errors: AtomicU32,
}

/// Owns every configured server and the tool catalog built from them.
pub struct McpManager {
    servers: Vec<Arc<dyn ServerTransport>>,
    by_name: HashMap<String, usize>,
    health: HashMap<String, ServerHealth>,
    connected: HashSet<String>,
    registry: ToolRegistry,
    options: ManagerOptions,
}

impl McpManager {
    pub fn new(servers: Vec<Arc<dyn ServerTransport>>, options: ManagerOptions) -> Self {
        let by_name = servers
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.server_name().to_string(), idx))
            .collect();
        let health = servers
            .iter()
            .map(|s| (s.server_name().to_string(), ServerHealth::default()))
            .collect();
        Self {
            servers,
            by_name,
            health,
            connected: HashSet::new(),
            registry: ToolRegistry::new(),
            options,
        }
    }

    /// Connect all servers concurrently and build the tool registry.
    ///
    /// A server that cannot be connected after all attempts is left out of
    /// the catalog; the others are still usable.
    pub async fn start_all(&mut self) -> StartReport {
        let options = &self.options;
        let outcomes = join_all(
            self.servers
                .iter()
                .map(|server| connect_with_retry(Arc::clone(server), options)),
        )
        .await;

        let mut report = StartReport::default();
        let mut registry = ToolRegistry::new();
        let mut connected = HashSet::new();

        for (server, outcome) in self.servers.iter().zip(outcomes) {
            let name = server.server_name().to_string();
            match outcome {
                Ok(tools) => {
                    info!(server = %name, tools = tools.len(), "MCP server started with tools");
                    registry.register(&name, tools);
                    connected.insert(name.clone());
                    report.connected.push(name);
                },
                Err(e) => {
                    warn!(server = %name, kind = %e.kind(), error = %e, "MCP server unavailable for this session");
                    report.failed.push((name, e));
                },
            }
        }

        info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            tools = registry.len(),
            "MCP servers started"
        );
        self.registry = registry;
        self.connected = connected;
        report
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.all_definitions()
    }

    pub fn is_connected(&self, server: &str) -> bool {
        self.connected.contains(server)
    }

    /// Whether repeated protocol errors have taken `server` out of service.
    pub fn is_unavailable(&self, server: &str) -> bool {
        self.health.get(server).is_some_and(|h| {
            h.protocol_errors.load(Ordering::SeqCst) >= self.options.protocol_error_threshold
        })
    }

    /// Route a call by exposed tool name and invoke it on the owning server.
    ///
    /// Channel-level failures are retried; tool-level errors are not.
    pub async fn call_tool(
        &self,
        exposed_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> TransportResult<ToolsCallResult> {
        let (server_name, tool) = self.registry.resolve(exposed_name)?;
        let server = self
            .by_name
            .get(server_name)
            .map(|&idx| &self.servers[idx])
            .ok_or_else(|| McpTransportError::UnknownTool(exposed_name.to_string()))?;

        if self.is_unavailable(server_name) {
            return Err(McpTransportError::Connection(format!(
                "MCP server '{server_name}' was taken out of service after repeated protocol errors"
            )));
        }

        let attempts = self.options.tool_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match server.call_tool(tool, arguments.clone(), timeout).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if matches!(err, McpTransportError::Protocol(_)) {
                self.record_protocol_error(server_name);
            }

            if !err.is_retryable() || attempt >= attempts {
                return Err(err);
            }
            warn!(
                server = %server_name,
                tool = %tool,
                attempt,
                error = %err,
                "MCP tool call failed, retrying"
            );
            attempt += 1;
            tokio::time::sleep(self.options.tool_retry_delay).await;
        }
    }

    fn record_protocol_error(&self, server: &str) {
        let Some(health) = self.health.get(server) else {
            return;
        };
        let count = health.protocol_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count == self.options.protocol_error_threshold {
            warn!(
                server = %server,
                count,
                "MCP server marked unavailable after repeated protocol errors"
            );
        }
    }

    /// Disconnect every server, connected or not.
    pub async fn disconnect_all(&self) {
        join_all(self.servers.iter().map(|server| server.disconnect())).await;
        info!(servers = self.servers.len(), "MCP servers disconnected");
    }
}

async fn connect_with_retry(
    server: Arc<dyn ServerTransport>,
    options: &ManagerOptions,
) -> TransportResult<Vec<ToolDefinition>> {
    let attempts = options.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = match server.connect().await {
            Ok(()) => server.list_tools().await,
            Err(e) => Err(e),
        };
        let err = match outcome {
            Ok(tools) => return Ok(tools),
            Err(err) => err,
        };

        // Release whatever the failed attempt acquired.
        server.disconnect().await;
        if attempt >= attempts {
            return Err(err);
        }
        warn!(
            server = %server.server_name(),
            attempt,
            error = %err,
            "failed to start MCP server, retrying"
        );
        attempt += 1;
        tokio::time::sleep(options.connect_retry_delay).await;
    }
}
