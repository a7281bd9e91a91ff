//! Minimal stdio MCP server used by integration tests and local smoke runs.
//!
//! Tools:
//! - `echo`: returns its arguments verbatim as JSON text
//! - `sleep`: waits `ms` milliseconds, then answers

use std::time::Duration;

use {
    serde_json::{Value, json},
    tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};

fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Return the arguments unchanged",
                "inputSchema": {"type": "object"}
            },
            {
                "name": "sleep",
                "description": "Wait before answering",
                "inputSchema": {
                    "type": "object",
                    "properties": {"ms": {"type": "integer"}}
                }
            }
        ]
    })
}

async fn call_tool(params: &Value) -> Result<Value, (i64, String)> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    match name {
        "echo" => Ok(json!({
            "content": [{"type": "text", "text": arguments.to_string()}],
            "isError": false
        })),
        "sleep" => {
            let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({
                "content": [{"type": "text", "text": format!("slept {ms}ms")}],
                "isError": false
            }))
        },
        other => Err((-32602, format!("unknown tool: {other}"))),
    }
}

async fn handle(message: Value) -> Option<Value> {
    // Notifications carry no id and get no answer.
    let id = message.get("id")?.clone();
    let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let outcome = match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "conduit-echo-mcp", "version": env!("CARGO_PKG_VERSION")}
        })),
        "tools/list" => Ok(tool_list()),
        "tools/call" => call_tool(&params).await,
        "ping" => Ok(json!({})),
        other => Err((-32601, format!("method not found: {other}"))),
    };

    Some(match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, message)) => {
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
        },
    })
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        if let Some(response) = handle(message).await {
            stdout.write_all(response.to_string().as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
