//! MCP Bridge - Model Context Protocol 연동
//!
//! 외부 MCP 서버의 도구를 레지스트리에 합치고, 레지스트리를 다시 MCP 서버로 노출합니다.
//!
//! ## 구성
//! - `protocol`: JSON-RPC 2.0 메시지
//! - `transport`: 줄 단위 stdio 전송 계층
//! - `client`: 핸드셰이크, 도구 목록, 도구 호출
//! - `process`: 서버 프로세스와 종료 감시
//! - `manager`: 서버별 연결 관리
//! - `bridge`: 원격 도구 -> `ToolDefinition`
//! - `server`: 인바운드 MCP 서버 (`tether serve`)
//!
//! ## 참고
//! - https://modelcontextprotocol.io/

mod bridge;
mod client;
mod manager;
mod process;
mod protocol;
mod server;
mod transport;
mod types;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use bridge::{adapt_remote_tool, qualified_tool_name, render_call_result, McpToolAdapter};
pub use client::{McpClient, McpClientState};
pub use manager::{ConnectionManager, ConnectionState, ServerConnection, ServerStatus};
pub use process::{ConnectionEvent, ConnectionEventKind, ProcessExit, ProcessHandle, ProcessSpec};
pub use protocol::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use server::McpServer;
pub use transport::{McpTransport, StdioTransport};
pub use types::{
    CallToolParams, CallToolResult, Implementation, InitializeResult, ListToolsResult,
    McpContent, McpTool, ServerCapabilities, ToolsCapability, MCP_PROTOCOL_VERSION,
};
