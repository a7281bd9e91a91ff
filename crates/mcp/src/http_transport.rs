//! Streamable HTTP transport for remote MCP servers.
//!
//! Every JSON-RPC message is a POST to the server URL. Responses arrive either
//! as a JSON body or as a short `text/event-stream`. Request authentication is
//! pluggable: SigV4 for Lambda function URLs, OAuth bearer tokens otherwise.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    conduit_oauth::TokenCache,
    conduit_sigv4::SigV4Signer,
    reqwest::{Client, StatusCode, header::HeaderValue},
    secrecy::{ExposeSecret, Secret},
    tokio::sync::RwLock,
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Context, Result},
    traits::{ChannelConnector, McpTransport},
    types::{
        JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpTransportError, PROTOCOL_VERSION,
        ServerMessage,
    },
};

const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const STREAMABLE_ACCEPT_HEADER: &str = "application/json, text/event-stream";

/// Default per-request timeout for HTTP transports.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Authenticates outgoing requests for an [`HttpTransport`].
#[async_trait]
pub trait HttpAuth: Send + Sync {
    /// Add credentials to a fully built request. Returns the bearer token that
    /// was attached, if any, so a rejection can be attributed to it.
    async fn authorize(&self, request: &mut reqwest::Request) -> Result<Option<Secret<String>>>;

    /// Called once after a 401. Returns `true` when replaying the request with
    /// fresh credentials might succeed.
    async fn on_unauthorized(&self, used: Option<&Secret<String>>) -> bool;

    fn scheme(&self) -> &'static str;
}

/// SigV4 signing for IAM-authenticated Lambda function URLs.
pub struct SigV4Auth {
    signer: SigV4Signer,
}

impl SigV4Auth {
    pub fn new(signer: SigV4Signer) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl HttpAuth for SigV4Auth {
    async fn authorize(&self, request: &mut reqwest::Request) -> Result<Option<Secret<String>>> {
        self.signer.sign(request).await.map_err(|e| {
            McpTransportError::Auth(format!(
                "failed to sign request for {}: {e}",
                self.signer.region()
            ))
        })?;
        Ok(None)
    }

    async fn on_unauthorized(&self, _used: Option<&Secret<String>>) -> bool {
        // Signatures are computed per request; a replay would be rejected the same way.
        false
    }

    fn scheme(&self) -> &'static str {
        "sigv4"
    }
}

/// OAuth bearer tokens from a client-credentials token cache.
pub struct OAuthBearer {
    tokens: Arc<TokenCache>,
}

impl OAuthBearer {
    pub fn new(tokens: Arc<TokenCache>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl HttpAuth for OAuthBearer {
    async fn authorize(&self, request: &mut reqwest::Request) -> Result<Option<Secret<String>>> {
        let token = self.tokens.access_token().await.map_err(|e| {
            McpTransportError::Auth(format!("failed to obtain OAuth access token: {e}"))
        })?;
        let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| McpTransportError::Auth("access token is not a valid header value".into()))?;
        request
            .headers_mut()
            .insert(reqwest::header::AUTHORIZATION, value);
        Ok(Some(token))
    }

    async fn on_unauthorized(&self, used: Option<&Secret<String>>) -> bool {
        if let Some(token) = used {
            self.tokens.invalidate(token).await;
        }
        true
    }

    fn scheme(&self) -> &'static str {
        "oauth"
    }
}

/// Streamable HTTP channel to one MCP server.
pub struct HttpTransport<A: HttpAuth> {
    client: Client,
    url: String,
    next_id: AtomicU64,
    auth: Arc<A>,
    /// Session identifier issued by the server, echoed on every request.
    session_id: RwLock<Option<String>>,
    closed: AtomicBool,
}

/// Lambda function URL transport.
pub type FunctionUrlTransport = HttpTransport<SigV4Auth>;

/// OAuth-protected streamable HTTP transport.
pub type OAuthHttpTransport = HttpTransport<OAuthBearer>;

impl<A: HttpAuth> HttpTransport<A> {
    pub fn new(url: &str, auth: Arc<A>) -> Result<Self> {
        Self::with_timeout(url, auth, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(url: &str, auth: Arc<A>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for MCP transport")?;

        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            auth,
            session_id: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Build and authenticate one POST carrying `payload`.
    async fn build_post(&self, payload: &[u8]) -> Result<(reqwest::Request, Option<Secret<String>>)> {
        let mut req = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("accept", STREAMABLE_ACCEPT_HEADER)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);

        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }

        let mut request = req.body(payload.to_vec()).build()?;
        let used = self.auth.authorize(&mut request).await?;
        Ok((request, used))
    }

    async fn store_session_id_from_response(&self, response: &reqwest::Response) {
        let Some(raw) = response.headers().get(MCP_SESSION_ID_HEADER) else {
            return;
        };
        let Ok(session_id) = raw.to_str() else {
            return;
        };
        if session_id.trim().is_empty() {
            return;
        }

        let mut slot = self.session_id.write().await;
        let session_id = session_id.to_string();
        if slot.as_ref() != Some(&session_id) {
            debug!(
                url = %self.url,
                session_id = %session_id,
                "updated MCP streamable HTTP session id"
            );
            *slot = Some(session_id);
        }
    }

    /// POST `payload`, replaying once with fresh credentials after a 401 when
    /// the auth scheme allows it.
    async fn send(&self, method: &str, payload: &[u8]) -> Result<reqwest::Response> {
        let (request, used) = self.build_post(payload).await?;
        let resp = self.client.execute(request).await?;
        self.store_session_id_from_response(&resp).await;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let www_authenticate = www_authenticate(&resp);
        if !self.auth.on_unauthorized(used.as_ref()).await {
            return Err(McpTransportError::Unauthorized { www_authenticate }.into());
        }

        info!(
            method = %method,
            url = %self.url,
            scheme = self.auth.scheme(),
            www_authenticate = ?www_authenticate,
            "received 401, retrying with fresh credentials"
        );
        let (request, _) = self.build_post(payload).await?;
        let retry = self.client.execute(request).await?;
        self.store_session_id_from_response(&retry).await;

        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(McpTransportError::Unauthorized {
                www_authenticate: www_authenticate_or(&retry, www_authenticate),
            }
            .into());
        }
        Ok(retry)
    }

    /// Turn a non-success status into the matching transport failure.
    async fn check_status(&self, method: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let detail = format!("HTTP {status} for '{method}': {}", truncate(&body));
        // A 404 on an established session means the server dropped it.
        let session_expired =
            status == StatusCode::NOT_FOUND && self.session_id.write().await.take().is_some();
        let err = match status {
            StatusCode::FORBIDDEN => McpTransportError::Auth(detail),
            _ if is_expired_signature(&body) => McpTransportError::Auth(detail),
            _ if session_expired => {
                McpTransportError::Transport(format!("MCP session expired ({detail})"))
            },
            _ => McpTransportError::Transport(detail),
        };
        Err(err.into())
    }
}

fn www_authenticate(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn www_authenticate_or(resp: &reqwest::Response, fallback: Option<String>) -> Option<String> {
    www_authenticate(resp).or(fallback)
}

fn is_expired_signature(body: &str) -> bool {
    body.contains("Signature expired") || body.contains("ExpiredToken")
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(512) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn response_is_event_stream(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|base| base.trim() == "text/event-stream")
        })
        .unwrap_or(false)
}

/// Return the response to request `id` when `data` carries it.
fn matching_response(data: &str, id: &serde_json::Value) -> Option<JsonRpcResponse> {
    match ServerMessage::parse(data)? {
        ServerMessage::Response(resp) if resp.id == *id => Some(resp),
        ServerMessage::Response(resp) => {
            debug!(id = %resp.id, expected = %id, "skipping event for another request");
            None
        },
        ServerMessage::Request { method, .. } | ServerMessage::Notification { method } => {
            trace!(method = %method, "skipping server-initiated event");
            None
        },
    }
}

/// Extract the response to request `id` from an event-stream body.
fn parse_event_stream_response(
    body: &str,
    id: &serde_json::Value,
    method: &str,
) -> Result<JsonRpcResponse> {
    let mut data = String::new();

    for line in body.lines() {
        let trimmed = line.trim_end();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
            continue;
        }

        if trimmed.is_empty() && !data.is_empty() {
            if let Some(resp) = matching_response(&data, id) {
                return Ok(resp);
            }
            data.clear();
        }
    }

    if !data.is_empty()
        && let Some(resp) = matching_response(&data, id)
    {
        return Ok(resp);
    }

    Err(McpTransportError::Protocol(format!(
        "no JSON-RPC response in event stream for '{method}'"
    ))
    .into())
}

#[async_trait]
impl<A: HttpAuth + 'static> McpTransport for HttpTransport<A> {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        debug!(method = %method, id = %id, url = %self.url, "HTTP client -> MCP server");

        let resp = self.send(method, &serde_json::to_vec(&req)?).await?;
        let resp = self.check_status(method, resp).await?;
        let event_stream = response_is_event_stream(&resp);
        let body = resp.text().await?;

        let resp: JsonRpcResponse = if event_stream {
            parse_event_stream_response(&body, &req.id, method)?
        } else {
            serde_json::from_str(&body).map_err(|e| {
                McpTransportError::Protocol(format!(
                    "response to '{method}' is not JSON-RPC: {e}"
                ))
            })?
        };

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

        debug!(method = %method, url = %self.url, "HTTP client -> MCP server (notification)");

        let resp = self.send(method, &serde_json::to_vec(&notif)?).await?;
        let status = resp.status();
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::FORBIDDEN => Err(McpTransportError::Auth(format!(
                "HTTP {status} for notification '{method}'"
            ))
            .into()),
            _ => {
                warn!(method = %method, %status, "MCP notification returned non-success");
                Ok(())
            },
        }
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let session_id = self.session_id.write().await.take();
        let Some(session_id) = session_id else {
            return;
        };

        let request = self
            .client
            .delete(&self.url)
            .timeout(Duration::from_secs(5))
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(MCP_SESSION_ID_HEADER, session_id)
            .build();
        let mut request = match request {
            Ok(request) => request,
            Err(e) => {
                warn!(url = %self.url, error = %e, "failed to build MCP session close request");
                return;
            },
        };
        if let Err(e) = self.auth.authorize(&mut request).await {
            warn!(url = %self.url, error = %e, "failed to authorize MCP session close request");
            return;
        }

        if let Err(e) = self.client.execute(request).await {
            warn!(url = %self.url, error = %e, "failed to close MCP streamable HTTP session");
        }
    }
}

/// Opens a fresh HTTP channel per connect; credentials outlive reconnects.
pub struct HttpConnector<A: HttpAuth> {
    url: String,
    auth: Arc<A>,
    timeout: Duration,
}

impl<A: HttpAuth> HttpConnector<A> {
    pub fn new(url: impl Into<String>, auth: A) -> Self {
        Self {
            url: url.into(),
            auth: Arc::new(auth),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<A: HttpAuth + 'static> ChannelConnector for HttpConnector<A> {
    async fn open(&self) -> Result<Arc<dyn McpTransport>> {
        let transport = HttpTransport::with_timeout(&self.url, Arc::clone(&self.auth), self.timeout)?;
        Ok(Arc::new(transport))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.auth.scheme(), self.url)
    }
}
