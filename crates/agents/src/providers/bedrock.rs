//! Amazon Bedrock `Converse` API provider.

use std::time::Duration;

use {
    async_trait::async_trait,
    conduit_sigv4::{SharedCredentialsProvider, SigV4Signer},
    reqwest::{Client, StatusCode},
    serde_json::{Value, json},
    tracing::{debug, trace, warn},
};

use crate::{
    error::{Context, Error, Result},
    model::{ChatMessage, CompletionResponse, LlmProvider, ToolCall, ToolCallResult, Usage},
};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

pub struct BedrockProvider {
    model_id: String,
    endpoint: String,
    client: Client,
    signer: SigV4Signer,
    max_tokens: u32,
}

impl BedrockProvider {
    pub fn new(
        model_id: impl Into<String>,
        region: impl Into<String>,
        credentials: SharedCredentialsProvider,
    ) -> Result<Self> {
        let region = region.into();
        let endpoint = format!("https://bedrock-runtime.{region}.amazonaws.com");
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed to build HTTP client for Bedrock")?;
        Ok(Self {
            model_id: model_id.into(),
            endpoint,
            client,
            signer: SigV4Signer::new(region, "bedrock", credentials),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Send requests to `endpoint` instead of the regional runtime host.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn converse_url(&self) -> String {
        format!(
            "{}/model/{}/converse",
            self.endpoint,
            urlencoding::encode(&self.model_id)
        )
    }
}

/// Convert generic tool schemas to Bedrock `toolSpec` entries.
fn to_bedrock_tools(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            let mut tool_spec = json!({
                "name": t["name"],
                "inputSchema": {"json": t["parameters"]},
            });
            if let Some(description) = t["description"].as_str()
                && !description.is_empty()
            {
                tool_spec["description"] = Value::String(description.to_string());
            }
            json!({"toolSpec": tool_spec})
        })
        .collect()
}

/// Converse rejects blank text blocks.
const EMPTY_TOOL_OUTPUT: &str = "(no output)";

fn tool_result_block(result: &ToolCallResult) -> Value {
    let text = if result.content.trim().is_empty() {
        EMPTY_TOOL_OUTPUT
    } else {
        result.content.as_str()
    };
    json!({
        "toolResult": {
            "toolUseId": result.tool_call_id,
            "content": [{"text": text}],
            "status": if result.is_error { "error" } else { "success" },
        }
    })
}

/// Convert the transcript to Bedrock format.
///
/// Returns `(system_blocks, messages)`. Consecutive messages with the same
/// role are merged, since Converse requires alternating roles.
fn to_bedrock_messages(messages: &[ChatMessage]) -> (Vec<Value>, Vec<Value>) {
    let mut system = Vec::new();
    let mut out: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg {
            ChatMessage::System { content } => {
                system.push(json!({"text": content}));
                continue;
            },
            ChatMessage::User { content } => ("user", vec![json!({"text": content})]),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if let Some(text) = content
                    && !text.is_empty()
                {
                    blocks.push(json!({"text": text}));
                }
                for call in tool_calls {
                    blocks.push(json!({
                        "toolUse": {
                            "toolUseId": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }
                    }));
                }
                if blocks.is_empty() {
                    continue;
                }
                ("assistant", blocks)
            },
            ChatMessage::ToolResults { results } => {
                ("user", results.iter().map(tool_result_block).collect())
            },
        };

        match out.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => out.push((role, blocks)),
        }
    }

    let messages = out
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();
    (system, messages)
}

/// Split a Converse response into text and tool calls.
fn parse_response(resp: &Value) -> Result<CompletionResponse> {
    let content = resp["output"]["message"]["content"]
        .as_array()
        .ok_or_else(|| Error::message("Bedrock response has no output message"))?;

    let text = content
        .iter()
        .filter_map(|b| b["text"].as_str().map(str::to_string))
        .reduce(|a, b| a + &b);

    let tool_calls = content
        .iter()
        .filter_map(|b| b.get("toolUse"))
        .map(|tu| ToolCall {
            id: tu["toolUseId"].as_str().unwrap_or_default().to_string(),
            name: tu["name"].as_str().unwrap_or_default().to_string(),
            arguments: tu.get("input").cloned().unwrap_or_else(|| json!({})),
        })
        .collect();

    let usage = Usage {
        input_tokens: resp["usage"]["inputTokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["usage"]["outputTokens"].as_u64().unwrap_or(0) as u32,
    };

    Ok(CompletionResponse {
        text,
        tool_calls,
        usage,
    })
}

/// Map a failed Converse call onto the retry taxonomy.
fn classify_error(
    status: StatusCode,
    error_type: Option<&str>,
    retry_after: Option<Duration>,
    body: &str,
) -> Error {
    let error_type = error_type.unwrap_or_default();
    let message = format!("Bedrock API error HTTP {status}: {body}");

    if status == StatusCode::TOO_MANY_REQUESTS || error_type.contains("ThrottlingException") {
        return Error::RateLimited {
            message,
            retry_after,
        };
    }
    if status.is_server_error()
        || error_type.contains("ServiceUnavailableException")
        || error_type.contains("ModelNotReadyException")
        || error_type.contains("ModelTimeoutException")
    {
        return Error::Transient { message };
    }
    Error::message(message)
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl LlmProvider for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }

    fn id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<CompletionResponse> {
        let (system, bedrock_messages) = to_bedrock_messages(messages);

        let mut body = json!({
            "messages": bedrock_messages,
            "inferenceConfig": {"maxTokens": self.max_tokens},
        });
        if !system.is_empty() {
            body["system"] = Value::Array(system);
        }
        if !tools.is_empty() {
            body["toolConfig"] = json!({"tools": to_bedrock_tools(tools)});
        }

        debug!(
            model = %self.model_id,
            messages_count = bedrock_messages_len(&body),
            tools_count = tools.len(),
            "bedrock converse request"
        );
        trace!(body = %body, "bedrock request body");

        let mut request = self
            .client
            .post(self.converse_url())
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .body(serde_json::to_vec(&body)?)
            .build()?;
        self.signer.sign(&mut request).await?;

        let http_resp = self.client.execute(request).await?;
        let status = http_resp.status();
        if !status.is_success() {
            let error_type = http_resp
                .headers()
                .get(ERROR_TYPE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let retry_after = retry_after(&http_resp);
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(status = %status, error_type = ?error_type, body = %body_text, "bedrock API error");
            return Err(classify_error(
                status,
                error_type.as_deref(),
                retry_after,
                &body_text,
            ));
        }

        let resp = http_resp.json::<Value>().await?;
        trace!(response = %resp, "bedrock raw response");
        parse_response(&resp)
    }
}

fn bedrock_messages_len(body: &Value) -> usize {
    body["messages"].as_array().map_or(0, Vec::len)
}
