//! Stdio transport: spawn a child process and communicate via JSON-RPC over stdin/stdout.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use {
    async_trait::async_trait,
    conduit_config::StdioServerConfig,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, Command},
        sync::{Mutex, oneshot},
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Context, Result},
    traits::{ChannelConnector, McpTransport},
    types::{
        JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpTransportError, ServerMessage,
    },
};

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// Stdio-based transport for an MCP server process.
///
/// Messages are newline-delimited JSON. Responses are matched to requests by
/// id, so several requests may be outstanding at once.
pub struct StdioTransport {
    server_name: String,
    child: Mutex<Child>,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    /// Set once the server's stdout reaches EOF.
    closed: Arc<AtomicBool>,
    /// Handle to the reader task so we can abort on kill.
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Removes a pending entry when the waiting request goes away, whether it
/// completed, timed out or was cancelled.
struct PendingGuard {
    pending: PendingMap,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl StdioTransport {
    /// Spawn the server process and start the reader loop.
    pub async fn spawn(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>> {
        info!(
            server = %server_name,
            command = %command,
            args = ?args,
            "spawning MCP server process"
        );

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn MCP server: {command}"))?;

        let stdin = child.stdin.take().context("failed to capture stdin")?;
        let stdout = child.stdout.take().context("failed to capture stdout")?;
        let stderr = child.stderr.take();

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // Forward server stderr into our logs.
        if let Some(stderr) = stderr {
            let server = server_name.to_string();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                debug!(server = %server, stderr = %trimmed, "MCP server stderr");
                            }
                        },
                    }
                }
            });
        }

        let handle = {
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            let stdin = Arc::clone(&stdin);
            let server = server_name.to_string();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => {
                            debug!(server = %server, "MCP server stdout closed");
                            break;
                        },
                        Ok(_) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            trace!(server = %server, raw = %trimmed, "MCP server -> client");
                            let Some(reply) = dispatch_line(&server, trimmed, &pending) else {
                                continue;
                            };
                            let written = match serde_json::to_string(&reply) {
                                Ok(payload) => write_frame(&stdin, &payload).await,
                                Err(e) => Err(std::io::Error::other(e)),
                            };
                            if let Err(e) = written {
                                warn!(server = %server, error = %e, "failed to answer MCP server request");
                            }
                        },
                        Err(e) => {
                            warn!(server = %server, error = %e, "error reading from MCP server stdout");
                            break;
                        },
                    }
                }
                closed.store(true, Ordering::SeqCst);
                // Dropping the senders wakes every waiter with an error.
                pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            })
        };

        Ok(Arc::new(Self {
            server_name: server_name.to_string(),
            child: Mutex::new(child),
            stdin,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader_handle: Mutex::new(Some(handle)),
        }))
    }

    async fn write_line(&self, payload: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpTransportError::Transport(format!(
                "MCP server '{}' has exited",
                self.server_name
            ))
            .into());
        }
        write_frame(&self.stdin, payload).await.map_err(|e| {
            McpTransportError::Transport(format!(
                "failed to write to MCP server '{}': {e}",
                self.server_name
            ))
            .into()
        })
    }
}

async fn write_frame(stdin: &Mutex<ChildStdin>, payload: &str) -> std::io::Result<()> {
    let mut stdin = stdin.lock().await;
    stdin.write_all(payload.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Route one line from the server. Responses go to the request waiting on
/// their id; server requests yield the reply to write back.
fn dispatch_line(server: &str, line: &str, pending: &PendingMap) -> Option<JsonRpcResponse> {
    match ServerMessage::parse(line) {
        Some(ServerMessage::Response(resp)) => {
            let key = resp.id.to_string();
            let waiter = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(resp);
                },
                None => warn!(server = %server, id = %key, "received response for unknown request id"),
            }
            None
        },
        Some(ServerMessage::Request { id, method }) => {
            debug!(server = %server, method = %method, id = %id, "MCP server request");
            Some(JsonRpcResponse::reply_to_server(id, &method))
        },
        Some(ServerMessage::Notification { method }) => {
            trace!(server = %server, method = %method, "MCP server notification");
            None
        },
        None => {
            debug!(server = %server, line = %line, "MCP server sent non-JSON-RPC line");
            None
        },
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let key = req.id.to_string();

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), tx);
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key,
        };

        let payload = serde_json::to_string(&req)?;
        debug!(server = %self.server_name, method = %method, id = %id, "client -> MCP server");
        self.write_line(&payload).await?;

        let resp = rx.await.map_err(|_| {
            McpTransportError::Transport(format!(
                "MCP server '{}' exited before answering '{method}'",
                self.server_name
            ))
        })?;

        if let Some(ref err) = resp.error {
            return Err(McpTransportError::Rpc {
                code: err.code,
                message: err.message.clone(),
            }
            .into());
        }

        Ok(resp)
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        };
        let payload = serde_json::to_string(&notif)?;
        trace!(server = %self.server_name, method = %method, "client -> MCP server (notification)");
        self.write_line(&payload).await
    }

    async fn is_alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn kill(&self) {
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}

/// Spawns a fresh process for each connect.
pub struct StdioConnector {
    server_name: String,
    config: StdioServerConfig,
}

impl StdioConnector {
    pub fn new(server_name: impl Into<String>, config: StdioServerConfig) -> Self {
        Self {
            server_name: server_name.into(),
            config,
        }
    }
}

#[async_trait]
impl ChannelConnector for StdioConnector {
    async fn open(&self) -> Result<Arc<dyn McpTransport>> {
        let transport = StdioTransport::spawn(
            &self.server_name,
            &self.config.command,
            &self.config.args,
            &self.config.env,
        )
        .await?;
        Ok(transport)
    }

    fn describe(&self) -> String {
        format!("stdio:{}", self.config.command)
    }
}
