//! Line-delimited JSON-RPC server loop and request routing.

use crate::mcp::protocol::*;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Executes one tool call. Argument problems belong in an `is_error` result;
/// an `Err` is also reported to the client as an `is_error` result.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

pub struct McpServer {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    tools: RwLock<HashMap<String, Tool>>,
    tool_handlers: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
    connection_state: RwLock<ConnectionState>,
}

impl McpServer {
    #[inline]
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            server_info: Implementation {
                name: name.to_string(),
                version: version.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            tools: RwLock::new(HashMap::new()),
            tool_handlers: RwLock::new(HashMap::new()),
            connection_state: RwLock::new(ConnectionState::Uninitialized),
        }
    }

    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();
        self.tools.write().await.insert(tool_name.clone(), tool);
        self.tool_handlers
            .write()
            .await
            .insert(tool_name.clone(), Arc::new(handler));
        debug!("Registered tool: {}", tool_name);
    }

    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    /// Serve on stdin/stdout until the client closes stdin
    #[inline]
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Read one JSON-RPC message per line from `reader`, write replies to `writer`
    #[inline]
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(reply) = self.handle_line(trimmed).await {
                        send_message(&mut writer, &reply).await?;
                    }
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            }
        }

        *self.connection_state.write().await = ConnectionState::Closed;
        info!("MCP server stopped");
        Ok(())
    }

    /// Process one raw line; notifications and stray responses produce no reply
    #[inline]
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcMessage> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to parse JSON: {}", e);
                return Some(error_message(JsonRpcError::parse_error(), None));
            }
        };

        let message = match serde_json::from_value::<JsonRpcMessage>(raw) {
            Ok(message) => message,
            Err(e) => {
                error!("Message is not valid JSON-RPC: {}", e);
                return Some(error_message(JsonRpcError::invalid_request(), None));
            }
        };

        match message {
            JsonRpcMessage::Request(request) => {
                let id = request.id.clone();
                Some(match self.handle_request(request).await {
                    Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, id)),
                    Err(error) => error_message(error, Some(id)),
                })
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(&notification).await;
                None
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_) => {
                warn!("Received unexpected response message from client");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Result<Value, JsonRpcError> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(JsonRpcError::invalid_request());
        }

        debug!("Handling request {}", request.method);
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    async fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                *self.connection_state.write().await = ConnectionState::Ready;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => debug!("Received cancellation notification"),
            other => warn!("Unknown notification method: {}", other),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = params
            .ok_or_else(|| {
                JsonRpcError::invalid_params("Initialize request missing parameters".to_string())
            })
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| {
                    JsonRpcError::invalid_params(format!("Invalid initialize parameters: {}", e))
                })
            })?;

        let protocol_version =
            if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
                params.protocol_version.clone()
            } else {
                warn!(
                    "Client requested protocol version {}, answering with {}",
                    params.protocol_version, MCP_VERSION
                );
                MCP_VERSION.to_string()
            };

        *self.connection_state.write().await = ConnectionState::Initializing;

        let result = InitializeResult {
            protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: Some(
                "Answers questions from personal note knowledge bases. Use list_knowledge_bases \
                 or search_knowledge_bases to find knowledge base ids, then rag_query."
                    .to_string(),
            ),
        };

        info!("Client initialized: {}", params.client_info.name);
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    async fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let mut tools: Vec<Tool> = self.tools.read().await.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        serde_json::to_value(ListToolsResult { tools })
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| {
                JsonRpcError::invalid_params("Tool call request missing parameters".to_string())
            })
            .and_then(|p| {
                serde_json::from_value(p)
                    .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tool call: {}", e)))
            })?;

        let handler = self
            .tool_handlers
            .read()
            .await
            .get(&params.name)
            .map(Arc::clone)
            .ok_or_else(|| {
                JsonRpcError::invalid_params(format!("Tool not found: {}", params.name))
            })?;

        let tool_name = params.name.clone();
        let result = match handler.handle(params).await {
            Ok(result) => result,
            Err(e) => {
                error!("Tool {} failed: {:#}", tool_name, e);
                CallToolResult::error(format!("{:#}", e))
            }
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}

fn error_message(error: JsonRpcError, id: Option<RequestId>) -> JsonRpcMessage {
    JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(error, id))
}

async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
