//! MCP server over stdio
//!
//! Newline-delimited JSON-RPC 2.0. Requests are handled concurrently so a
//! tool call waiting on the browser authorization does not block `ping`.

mod router;
mod tools;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub use tools::{call_tool, tool_definitions};

use crate::error::rpc_codes;
use crate::protocol::{
    Content, Info, InitializeResult, JsonRpcResponse, RequestId, ServerCapabilities, Tool,
    ToolsCallParams, ToolsCallResult, ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::strava::StravaClient;
use crate::{Error, Result};
use router::parse_request;

const INSTRUCTIONS: &str = "Read-only access to the authenticated Strava athlete's data.\n\
     - get_user_activities: list activities (epoch before/after filters, paginated)\n\
     - get_activity: one activity, optionally with all segment efforts\n\
     - get_activity_segments: segment efforts of an activity\n\
     - get_segment_leaderboard: leaderboard of a segment with optional filters\n\
     The first call may open a browser window for Strava authorization.";

/// MCP tool server backed by the Strava client
pub struct McpServer {
    client: Arc<StravaClient>,
    tools: Vec<Tool>,
}

impl McpServer {
    /// Create a server exposing the Strava tools
    pub fn new(client: Arc<StravaClient>) -> Self {
        Self {
            client,
            tools: tool_definitions(),
        }
    }

    /// Handle one line of input; `None` for notifications
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Unparseable JSON-RPC message");
                return Some(JsonRpcResponse::error(
                    None,
                    rpc_codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };

        let (id, method, params) = match parse_request(&value) {
            Ok(parsed) => parsed,
            Err(response) => return Some(response),
        };

        let Some(id) = id else {
            debug!(method = %method, "Notification received");
            return None;
        };

        Some(self.handle_request(id, &method, params).await)
    }

    /// Dispatch a request by method name
    pub async fn handle_request(&self, id: RequestId, method: &str, params: Option<Value>) -> JsonRpcResponse {
        match method {
            "initialize" => self.handle_initialize(id, params.as_ref()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, params).await,
            _ => JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ),
        }
    }

    fn handle_initialize(&self, id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
        let client_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or("2024-11-05");
        let negotiated = negotiate_version(client_version);
        info!(client = client_version, negotiated, "MCP client initializing");

        let result = InitializeResult {
            protocol_version: negotiated.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: Info {
                name: "strava-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Strava".to_string()),
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        };
        to_response(id, &result)
    }

    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.tools.clone(),
            next_cursor: None,
        };
        to_response(id, &result)
    }

    async fn handle_tools_call(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolsCallParams = match params.map(serde_json::from_value::<ToolsCallParams>) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::INVALID_PARAMS,
                    format!("Invalid tools/call params: {e}"),
                );
            }
            None => {
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::INVALID_PARAMS,
                    "Missing tools/call params",
                );
            }
        };

        match call_tool(&self.client, &params.name, params.arguments).await {
            Ok(content) => wrap_tool_success(id, &content),
            Err(e @ Error::InvalidParams(_)) => {
                JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string())
            }
            Err(e) => {
                error!(tool = %params.name, error = %e, "Tool call failed");
                wrap_tool_error(id, &e)
            }
        }
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let mut handlers = JoinSet::new();
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let server = Arc::clone(&self);
            let tx = tx.clone();
            handlers.spawn(async move {
                let Some(response) = server.handle_line(&line).await else {
                    return;
                };
                match serde_json::to_string(&response) {
                    Ok(encoded) => {
                        let _ = tx.send(encoded);
                    }
                    Err(e) => error!(error = %e, "Failed to encode response"),
                }
            });
        }

        debug!(in_flight = handlers.len(), "Input closed, draining requests");
        while handlers.join_next().await.is_some() {}
        drop(tx);

        writer_task
            .await
            .map_err(|e| Error::Internal(format!("writer task: {e}")))??;
        Ok(())
    }

    /// Serve on the process's stdin/stdout
    pub async fn run_stdio(self: Arc<Self>) -> Result<()> {
        info!("MCP server listening on stdio");
        let stdin = BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }
}

fn to_response<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(Some(id), rpc_codes::INTERNAL_ERROR, e.to_string()),
    }
}

/// Wrap a successful tool result `Value` into a `JsonRpcResponse`.
fn wrap_tool_success(id: RequestId, content: &Value) -> JsonRpcResponse {
    let result = ToolsCallResult {
        content: vec![Content::text(
            serde_json::to_string_pretty(content).unwrap_or_default(),
        )],
        is_error: false,
    };
    to_response(id, &result)
}

/// Report a tool failure in-band so the agent can see it
fn wrap_tool_error(id: RequestId, error: &Error) -> JsonRpcResponse {
    let result = ToolsCallResult {
        content: vec![Content::text(error.to_string())],
        is_error: true,
    };
    to_response(id, &result)
}
