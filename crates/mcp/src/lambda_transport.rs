//! Lambda invoke transport: each JSON-RPC message is the payload of a
//! synchronous (`RequestResponse`) function invocation.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    conduit_config::LambdaFunctionServerConfig,
    conduit_sigv4::{SharedCredentialsProvider, SigV4Signer},
    reqwest::{Client, StatusCode},
    tracing::{debug, trace},
};

use crate::{
    error::{Context, Result},
    traits::{ChannelConnector, McpTransport},
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpTransportError},
};

const FUNCTION_ERROR_HEADER: &str = "x-amz-function-error";
const INVOCATION_TYPE_HEADER: &str = "X-Amz-Invocation-Type";

/// Invokes a Lambda function through the Lambda `Invoke` API.
pub struct LambdaInvokeTransport {
    client: Client,
    invoke_url: String,
    function_name: String,
    signer: SigV4Signer,
    next_id: AtomicU64,
}

impl LambdaInvokeTransport {
    pub fn new(
        config: &LambdaFunctionServerConfig,
        credentials: SharedCredentialsProvider,
    ) -> Result<Self> {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| conduit_config::schema::DEFAULT_LAMBDA_REGION.to_string());
        let endpoint = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://lambda.{region}.amazonaws.com"));
        let invoke_url = format!(
            "{}/2015-03-31/functions/{}/invocations",
            endpoint.trim_end_matches('/'),
            urlencoding::encode(&config.function_name)
        );
        let client = Client::builder()
            .build()
            .context("failed to build HTTP client for Lambda transport")?;

        Ok(Self {
            client,
            invoke_url,
            function_name: config.function_name.clone(),
            signer: SigV4Signer::new(region, "lambda", credentials),
            next_id: AtomicU64::new(1),
        })
    }

    /// Invoke the function with `payload` and return the response body.
    async fn invoke(&self, payload: Vec<u8>) -> Result<String> {
        let mut request = self
            .client
            .post(&self.invoke_url)
            .header(INVOCATION_TYPE_HEADER, "RequestResponse")
            .header("content-type", "application/json")
            .body(payload)
            .build()?;
        self.signer
            .sign(&mut request)
            .await
            .map_err(|e| McpTransportError::Auth(format!("failed to sign Lambda request: {e}")))?;

        let resp = self.client.execute(request).await?;
        let status = resp.status();
        let function_error = resp
            .headers()
            .get(FUNCTION_ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = resp.text().await?;

        if let Some(kind) = function_error {
            return Err(McpTransportError::Transport(format!(
                "function '{}' failed ({kind}): {}",
                self.function_name,
                truncate(&body)
            ))
            .into());
        }

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::NOT_FOUND => Err(McpTransportError::Connection(format!(
                "function '{}' not found: {}",
                self.function_name,
                truncate(&body)
            ))
            .into()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(McpTransportError::Auth(
                format!("Lambda rejected request (HTTP {status}): {}", truncate(&body)),
            )
            .into()),
            _ => Err(McpTransportError::Transport(format!(
                "Lambda invoke returned HTTP {status}: {}",
                truncate(&body)
            ))
            .into()),
        }
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(512) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl McpTransport for LambdaInvokeTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        debug!(function = %self.function_name, method = %method, id = %id, "client -> Lambda MCP server");
        let body = self.invoke(serde_json::to_vec(&req)?).await?;

        let resp: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            McpTransportError::Protocol(format!(
                "invocation payload for '{method}' is not a JSON-RPC response: {e}"
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
        trace!(function = %self.function_name, method = %method, "client -> Lambda MCP server (notification)");
        self.invoke(serde_json::to_vec(&notif)?).await?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn kill(&self) {}
}

/// Builds the invoke transport; no I/O happens until the handshake.
pub struct LambdaInvokeConnector {
    config: LambdaFunctionServerConfig,
    credentials: SharedCredentialsProvider,
}

impl LambdaInvokeConnector {
    pub fn new(config: LambdaFunctionServerConfig, credentials: SharedCredentialsProvider) -> Self {
        Self {
            config,
            credentials,
        }
    }
}

#[async_trait]
impl ChannelConnector for LambdaInvokeConnector {
    async fn open(&self) -> Result<Arc<dyn McpTransport>> {
        Ok(Arc::new(LambdaInvokeTransport::new(
            &self.config,
            Arc::clone(&self.credentials),
        )?))
    }

    fn describe(&self) -> String {
        format!("lambda:{}", self.config.function_name)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        conduit_sigv4::{AwsCredentials, StaticCredentialsProvider},
        mockito::Matcher,
    };

    use super::*;

    fn transport(server: &mockito::Server) -> LambdaInvokeTransport {
        let config = LambdaFunctionServerConfig {
            function_name: "mcp-weather".into(),
            region: Some("us-east-1".into()),
            endpoint_url: Some(server.url()),
        };
        let creds = Arc::new(StaticCredentialsProvider::new(AwsCredentials::new(
            "AKIDTEST", "secret", None,
        )));
        LambdaInvokeTransport::new(&config, creds).unwrap()
    }

    const PATH: &str = "/2015-03-31/functions/mcp-weather/invocations";

    #[tokio::test]
    async fn invokes_with_signed_request_response_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_header("x-amz-invocation-type", "RequestResponse")
            .match_header(
                "authorization",
                Matcher::Regex(r"^AWS4-HMAC-SHA256 Credential=AKIDTEST/\d{8}/us-east-1/lambda/aws4_request".into()),
            )
            .match_body(Matcher::PartialJson(serde_json::json!({"method": "tools/list"})))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#)
            .create_async()
            .await;

        let resp = transport(&server).request("tools/list", None).await.unwrap();
        assert!(resp.result.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn function_error_header_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(200)
            .with_header("X-Amz-Function-Error", "Unhandled")
            .with_body(r#"{"errorMessage":"boom","errorType":"Error"}"#)
            .create_async()
            .await;

        let err = transport(&server).request("tools/call", None).await.unwrap_err();
        assert!(matches!(
            err.into_transport_error(),
            McpTransportError::Transport(ref m) if m.contains("Unhandled") && m.contains("boom")
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(200)
            .with_body(r#"{"statusCode":200,"body":"hello"}"#)
            .create_async()
            .await;

        let err = transport(&server).request("tools/list", None).await.unwrap_err();
        assert!(matches!(
            err.into_transport_error(),
            McpTransportError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn missing_function_is_connection_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(404)
            .with_body(r#"{"Message":"Function not found"}"#)
            .create_async()
            .await;

        let err = transport(&server).request("initialize", None).await.unwrap_err();
        assert!(matches!(
            err.into_transport_error(),
            McpTransportError::Connection(_)
        ));
    }

    #[tokio::test]
    async fn throttled_invoke_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(429)
            .with_body("Rate exceeded")
            .create_async()
            .await;

        let err = transport(&server).request("tools/call", None).await.unwrap_err();
        assert!(err.into_transport_error().is_retryable());
    }
}
