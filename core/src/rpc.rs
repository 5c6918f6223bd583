//! Line-delimited JSON RPC over any async byte stream (stdin/stdout by default).
//!
//! Each input line is one request `{id, method, params}`; each response is one
//! line, `{id, result}` or `{id, error: {message}}`. Framing lives in
//! [`serve`]; [`handle_line`] only ever sees complete lines.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::engine::Engine;
use crate::types::RunOptions;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<RpcParams>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RpcParams {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub options: Option<RunOptions>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                message: message.into(),
            }),
        }
    }
}

async fn dispatch(engine: &Engine, request: RpcRequest) -> RpcResponse {
    let params = request.params.unwrap_or_default();
    let outcome = match request.method.as_str() {
        "lmtagscript/validate" => serde_json::to_value(engine.validate(&params.source)),
        "lmtagscript/compile" => serde_json::to_value(engine.compile(&params.source)),
        "lmtagscript/run" => {
            let options = params.options.unwrap_or_default();
            match engine.run(&params.source, options).await {
                Ok(result) => serde_json::to_value(result),
                Err(err) => return RpcResponse::error(request.id, err.to_string()),
            }
        }
        _ => return RpcResponse::error(request.id, "Method not found"),
    };

    match outcome {
        Ok(value) => RpcResponse::result(request.id, value),
        Err(err) => RpcResponse::error(request.id, err.to_string()),
    }
}

/// Handle one input line. Returns the response line, or `None` for a blank
/// line.
pub async fn handle_line(engine: &Engine, line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let response = match serde_json::from_str::<RpcRequest>(line) {
        Ok(request) => {
            tracing::debug!(method = %request.method, "rpc request");
            dispatch(engine, request).await
        }
        Err(err) => {
            // Keep the id when the line is JSON but not a valid request
            let id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|value| value.get("id").cloned());
            RpcResponse::error(id, format!("Invalid request: {}", err))
        }
    };

    match serde_json::to_string(&response) {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode rpc response");
            None
        }
    }
}

/// Serve requests from `reader` until end of input.
pub async fn serve<R, W>(engine: &Engine, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if let Some(response) = handle_line(engine, &line).await {
            writer.write_all(response.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

pub async fn serve_stdio(engine: &Engine) -> Result<()> {
    tracing::info!("LMTagScript RPC ready on stdio");
    serve(engine, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn call(line: &str) -> Value {
        let response = handle_line(&Engine::default(), line).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn test_validate_method() {
        let request = json!({
            "id": 1,
            "method": "lmtagscript/validate",
            "params": { "source": "ACTION: deploy\nGOAL: success" }
        });
        let response = call(&request.to_string()).await;

        assert_eq!(response["id"], json!(1));
        assert_eq!(response["result"]["ok"], json!(false));
        assert_eq!(response["result"]["diagnostics"][0]["code"], json!("E_TASK"));
    }

    #[tokio::test]
    async fn test_run_method() {
        let request = json!({
            "id": "a",
            "method": "lmtagscript/run",
            "params": { "source": "TASK: x\nACTION: y\nGOAL: z\n@tool:search{ query }" }
        });
        let response = call(&request.to_string()).await;

        assert_eq!(response["id"], json!("a"));
        assert_eq!(response["result"]["logs"][2], json!("unresolved: tool:search"));
    }

    #[tokio::test]
    async fn test_run_invalid_is_error() {
        let request = json!({ "id": 2, "method": "lmtagscript/run", "params": { "source": "" } });
        let response = call(&request.to_string()).await;

        assert!(response.get("result").is_none());
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid LMTagScript: "));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = call(r#"{"id":3,"method":"lmtagscript/format"}"#).await;
        assert_eq!(response, json!({ "id": 3, "error": { "message": "Method not found" } }));
    }

    #[tokio::test]
    async fn test_garbage_and_blank_lines() {
        assert_eq!(handle_line(&Engine::default(), "   ").await, None);

        let response = call("not json").await;
        assert!(response.get("id").is_none());
        assert!(response["error"]["message"].as_str().unwrap().starts_with("Invalid request"));

        let response = call(r#"{"id":7}"#).await;
        assert_eq!(response["id"], json!(7));
    }

    #[tokio::test]
    async fn test_serve_frames_one_response_per_request() {
        let input = concat!(
            r#"{"id":1,"method":"lmtagscript/compile","params":{"source":"TASK: a"}}"#,
            "\n\n",
            r#"{"id":2,"method":"nope"}"#,
            "\n",
        );
        let mut output = Vec::new();
        serve(&Engine::default(), input.as_bytes(), &mut output)
            .await
            .unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["result"]["json"]["task"], json!("a"));
        assert_eq!(lines[1]["error"]["message"], json!("Method not found"));
    }
}
