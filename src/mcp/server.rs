//! MCP stdio server implementation

use super::tools::{get_tool_definitions, handle_tool_call};
use super::types::{
    CallToolParams, McpError, McpMessage, McpNotification, McpRequest, McpResponse,
    PROTOCOL_VERSION,
};
use crate::commands::CommandContext;
use crate::error::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

/// MCP Server implementation
pub struct McpServer<'a> {
    ctx: CommandContext<'a>,
}

impl<'a> McpServer<'a> {
    pub fn new(ctx: CommandContext<'a>) -> Self {
        Self { ctx }
    }

    /// Run the MCP server loop over stdio
    pub async fn run(&self) -> Result<()> {
        info!("MCP server starting on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await?;
        info!("MCP server shutting down");
        Ok(())
    }

    /// Answer newline-delimited JSON-RPC messages until `reader` is exhausted
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            let response = match serde_json::from_str::<McpMessage>(line) {
                Ok(McpMessage::Request(req)) => Some(self.handle_request(req).await),
                Ok(McpMessage::Notification(notif)) => {
                    self.handle_notification(notif);
                    None
                }
                Ok(McpMessage::Response(_)) => {
                    warn!("Unexpected response message received");
                    None
                }
                Err(e) => {
                    error!("Failed to parse message: {}", e);
                    Some(McpResponse::error(
                        None,
                        McpError::parse_error(format!("Parse error: {}", e)),
                    ))
                }
            };

            if let Some(response) = response {
                let encoded = serde_json::to_string(&response)?;
                debug!("Sending: {}", encoded);
                writer.write_all(encoded.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle an MCP request
    async fn handle_request(&self, request: McpRequest) -> McpResponse {
        let id = request.id.clone();

        if request.jsonrpc != "2.0" {
            return McpResponse::error(
                id,
                McpError::invalid_request(format!("Unsupported jsonrpc version: {}", request.jsonrpc)),
            );
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => McpResponse::success(id, json!({})),
            "tools/list" => McpResponse::success(
                id,
                json!({ "tools": get_tool_definitions(&self.ctx.config.sync.default_branch) }),
            ),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "resources/list" => McpResponse::success(id, json!({ "resources": [] })),
            "prompts/list" => McpResponse::success(id, json!({ "prompts": [] })),
            other => McpResponse::error(id, McpError::method_not_found(other)),
        }
    }

    /// Handle notifications (fire-and-forget)
    fn handle_notification(&self, notification: McpNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => info!("Client initialized"),
            "notifications/cancelled" => info!("Request cancelled"),
            other => debug!("Unknown notification: {}", other),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> McpResponse {
        McpResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": "docs-kb",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> McpResponse {
        let params = match CallToolParams::from_params(params) {
            Ok(p) => p,
            Err(e) => return McpResponse::error(id, McpError::invalid_params(e.to_string())),
        };

        debug!("Calling tool: {} with args: {:?}", params.name, params.arguments);
        let result = handle_tool_call(&params.name, &params.arguments, &self.ctx).await;

        match serde_json::to_value(&result) {
            Ok(value) => McpResponse::success(id, value),
            Err(e) => McpResponse::error(id, McpError::parse_error(e.to_string())),
        }
    }
}
