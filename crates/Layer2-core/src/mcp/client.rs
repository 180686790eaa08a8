//! MCP Client - MCP 서버 클라이언트
//!
//! 전송 계층 위에서 `initialize` 핸드셰이크, 도구 목록(`tools/list`, 페이지네이션),
//! 도구 호출(`tools/call`)을 담당합니다. 전송 계층과 프로세스의 수명은
//! `ConnectionManager`가 관리합니다.

use super::transport::McpTransport;
use super::types::{InitializeResult, Implementation, ListToolsResult, McpTool, MCP_PROTOCOL_VERSION};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tether_foundation::{Error, Result};
use tracing::{debug, info, warn};

/// MCP 클라이언트 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// 생성됨, 핸드셰이크 전
    Created,
    /// 핸드셰이크 완료 (사용 가능)
    Ready,
    /// 닫힘
    Closed,
}

/// MCP 클라이언트
pub struct McpClient {
    server: String,
    identity: Implementation,
    transport: Arc<dyn McpTransport>,
    state: Mutex<McpClientState>,
    server_info: Mutex<Option<InitializeResult>>,
}

impl McpClient {
    /// 새 클라이언트 생성. 클라이언트 이름은 `tether-<server>`
    pub fn new(server: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        let server = server.into();
        Self {
            identity: Implementation::new(
                format!("tether-{}", server),
                env!("CARGO_PKG_VERSION"),
            ),
            server,
            transport,
            state: Mutex::new(McpClientState::Created),
            server_info: Mutex::new(None),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn identity(&self) -> &Implementation {
        &self.identity
    }

    pub fn state(&self) -> McpClientState {
        *self.state.lock()
    }

    /// 핸드셰이크 결과 (서버 정보)
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().clone()
    }

    /// 사용 가능 여부 (핸드셰이크 완료 + 전송 계층 연결)
    pub fn is_ready(&self) -> bool {
        self.state() == McpClientState::Ready && self.transport.is_connected()
    }

    /// MCP initialize 핸드셰이크
    ///
    /// `initialize` 요청 후 `notifications/initialized` 알림까지 보내야 완료됩니다.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        if self.state() == McpClientState::Closed {
            return Err(self.closed_error());
        }

        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": self.identity,
        });

        let result = self.transport.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            Error::Mcp(format!(
                "invalid initialize response from '{}': {}",
                self.server, e
            ))
        })?;

        if init.protocol_version != MCP_PROTOCOL_VERSION {
            warn!(
                server = %self.server,
                "Server negotiated protocol {} (client speaks {})",
                init.protocol_version,
                MCP_PROTOCOL_VERSION
            );
        }

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        info!(
            server = %self.server,
            "MCP server {} v{} initialized",
            init.server_info.name,
            init.server_info.version
        );

        *self.server_info.lock() = Some(init.clone());
        *self.state.lock() = McpClientState::Ready;
        Ok(init)
    }

    /// 도구 목록 (모든 페이지)
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.ensure_ready()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.transport.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result).map_err(|e| {
                Error::Mcp(format!(
                    "invalid tools/list response from '{}': {}",
                    self.server, e
                ))
            })?;

            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
                Some(repeated) => {
                    warn!(server = %self.server, "tools/list repeated cursor '{}', stopping", repeated);
                    break;
                }
                None => break,
            }
        }

        debug!(server = %self.server, "Listed {} tools", tools.len());
        Ok(tools)
    }

    /// 도구 호출. 원본 결과(JSON)를 그대로 반환
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.ensure_ready()?;

        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };

        debug!(server = %self.server, tool = name, "Calling MCP tool");
        self.transport
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    /// 클라이언트 종료. 이미 닫혀 있으면 에러
    ///
    /// 전송 계층은 닫지 않습니다.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == McpClientState::Closed {
            return Err(Error::Mcp(format!(
                "client for '{}' is already closed",
                self.server
            )));
        }
        *state = McpClientState::Closed;
        debug!(server = %self.server, "MCP client closed");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            McpClientState::Ready => Ok(()),
            McpClientState::Created => Err(Error::McpConnection(format!(
                "'{}' has not completed the initialize handshake",
                self.server
            ))),
            McpClientState::Closed => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> Error {
        Error::McpConnection(format!("client for '{}' is closed", self.server))
    }
}
