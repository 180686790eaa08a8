//! MCP Server - 레지스트리를 MCP 서버로 노출 (`tether serve`)
//!
//! 줄 단위 JSON-RPC를 읽어 요청마다 태스크를 띄워 동시에 처리하고, 응답은
//! 단일 writer 태스크가 순서대로 씁니다. 로그는 stdout에 쓰지 않습니다.
//!
//! 지원 메서드: `initialize`, `ping`, `tools/list`, `tools/call`, `notifications/*`

use super::protocol::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use super::types::{
    CallToolParams, CallToolResult, Implementation, InitializeResult, ServerCapabilities,
    ToolsCapability, MCP_PROTOCOL_VERSION,
};
use crate::tool::ToolRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tether_foundation::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// 인바운드 MCP 서버
#[derive(Clone)]
pub struct McpServer {
    info: Implementation,
    registry: watch::Receiver<Arc<ToolRegistry>>,
}

impl McpServer {
    /// 갱신되는 레지스트리를 구독하는 서버
    pub fn new(info: Implementation, registry: watch::Receiver<Arc<ToolRegistry>>) -> Self {
        Self { info, registry }
    }

    /// 고정된 레지스트리로 서버 생성
    pub fn with_registry(info: Implementation, registry: ToolRegistry) -> Self {
        let (tx, rx) = watch::channel(Arc::new(registry));
        // 송신 측이 drop돼도 마지막 값은 계속 읽힘
        drop(tx);
        Self::new(info, rx)
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    /// 현재 레지스트리 스냅샷
    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry.borrow())
    }

    /// 입력이 끝날 때까지 요청 처리
    ///
    /// EOF 이후에도 진행 중인 요청의 응답은 모두 쓴 뒤 반환합니다.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(
            "Serving {} tools as MCP server '{}'",
            self.registry().len(),
            self.info.name
        );

        let (out_tx, out_rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(write_loop(writer, out_rx));

        let mut handlers = JoinSet::new();
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read MCP request: {}", e);
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match JsonRpcMessage::parse(line) {
                Ok(JsonRpcMessage::Request(request)) => {
                    let server = self.clone();
                    let out = out_tx.clone();
                    handlers.spawn(async move {
                        let response = server.handle_request(request).await;
                        let _ = out.send(response);
                    });
                }
                Ok(JsonRpcMessage::Notification(note)) => {
                    debug!("Notification: {}", note.method);
                }
                Ok(JsonRpcMessage::Response(response)) => {
                    debug!("Ignoring unsolicited response {:?}", response.id);
                }
                Err((id, error)) => {
                    warn!("Rejected MCP message: {}", error);
                    let _ = out_tx.send(JsonRpcResponse::failure(id, error));
                }
            }

            // 끝난 핸들러 정리
            while handlers.try_join_next().is_some() {}
        }

        while handlers.join_next().await.is_some() {}
        drop(out_tx);

        writer_task
            .await
            .map_err(|e| Error::Internal(format!("MCP writer task failed: {}", e)))?
    }

    /// 요청 하나 처리
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        debug!("Request {:?}: {}", id, request.method);

        let result = match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry().schemas() })),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::failure(Some(id), error),
        }
    }

    fn initialize_result(&self) -> Value {
        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.info.clone(),
            instructions: None,
        };
        serde_json::to_value(result).unwrap_or_else(|_| json!({}))
    }

    /// `tools/call`: 도구 실패는 프로토콜 에러가 아니라 `isError` 결과
    async fn call_tool(&self, params: Option<Value>) -> std::result::Result<Value, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("Missing params"))
            .and_then(|p| {
                serde_json::from_value(p)
                    .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
            })?;

        let registry = self.registry();
        let arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };

        let result = if registry.contains(&params.name) {
            let output = registry.invoke(&params.name, arguments).await;
            if output.is_failure() {
                CallToolResult::error(output.into_text())
            } else {
                CallToolResult::success(output.into_text())
            }
        } else {
            CallToolResult::error(Error::ToolNotFound(params.name.clone()).to_string())
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let line = JsonRpcMessage::to_line(&response)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_foundation::{Field, Schema, ToolDefinition, ToolOutput};
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn registry() -> ToolRegistry {
        let greet = ToolDefinition::from_fn(
            "greet",
            "Say hello",
            Schema::new().field("name", Field::string()),
            |args| async move {
                match args.get("name").and_then(Value::as_str) {
                    Some(name) => ToolOutput::text(format!("hello {}", name)),
                    None => ToolOutput::failure("greet", "missing name"),
                }
            },
        );
        ToolRegistry::from_tools(vec![greet])
    }

    async fn exchange(requests: &[&str]) -> Vec<Value> {
        let server = McpServer::with_registry(Implementation::new("tether", "test"), registry());
        let (client_side, server_side) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_side);
        let (client_read, mut client_write) = tokio::io::split(client_side);

        let task = tokio::spawn(async move { server.serve(server_read, server_write).await });

        for request in requests {
            client_write.write_all(request.as_bytes()).await.unwrap();
            client_write.write_all(b"\n").await.unwrap();
        }
        client_write.shutdown().await.unwrap();
        drop(client_write);

        task.await.unwrap().unwrap();

        let mut responses = Vec::new();
        let mut lines = BufReader::new(client_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            responses.push(serde_json::from_str(&line).unwrap());
        }
        responses
    }

    fn by_id(responses: &[Value], id: u64) -> &Value {
        responses.iter().find(|r| r["id"] == id).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let responses = exchange(&[
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        ])
        .await;

        assert_eq!(responses.len(), 2);
        let init = by_id(&responses, 1);
        assert_eq!(init["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(init["result"]["serverInfo"]["name"], "tether");
        assert!(init["result"]["capabilities"]["tools"].is_object());

        let tools = &by_id(&responses, 2)["result"]["tools"];
        assert_eq!(tools[0]["name"], "greet");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["name"]));
    }

    #[tokio::test]
    async fn test_call_results() {
        let responses = exchange(&[
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"greet","arguments":{"name":"bo"}}}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"greet","arguments":{}}}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"nope"}}"#,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call"}"#,
        ])
        .await;

        let ok = &by_id(&responses, 1)["result"];
        assert_eq!(ok["content"][0]["text"], "hello bo");
        assert_eq!(ok["isError"], false);

        let failed = &by_id(&responses, 2)["result"];
        assert_eq!(failed["isError"], true);
        assert_eq!(
            failed["content"][0]["text"],
            "Error: tool 'greet' failed: missing name"
        );

        let unknown = &by_id(&responses, 3)["result"];
        assert_eq!(unknown["isError"], true);
        assert_eq!(unknown["content"][0]["text"], "Tool not found: nope");

        assert_eq!(by_id(&responses, 4)["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let responses = exchange(&[
            "not json",
            r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#,
            r#"{"jsonrpc":"2.0","id":8,"method":"ping"}"#,
        ])
        .await;

        assert_eq!(responses.len(), 3);
        let parse = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse["error"]["code"], -32700);
        assert_eq!(by_id(&responses, 7)["error"]["code"], -32601);
        assert_eq!(by_id(&responses, 8)["result"], json!({}));
    }

    #[tokio::test]
    async fn test_registry_updates_are_visible() {
        let (tx, rx) = watch::channel(Arc::new(ToolRegistry::new()));
        let server = McpServer::new(Implementation::new("tether", "test"), rx);
        assert!(server.registry().is_empty());

        tx.send_replace(Arc::new(registry()));
        assert_eq!(server.registry().names(), vec!["greet"]);
    }
}
