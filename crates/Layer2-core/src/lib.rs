//! tether-core: Tool federation runtime
//!
//! Layer2 - 도구 로딩, MCP 연결, 레지스트리 레이어
//!
//! # 주요 모듈
//!
//! - `loader`: 로컬 도구 매니페스트 로딩
//! - `mcp`: MCP 클라이언트 / 연결 관리 / 인바운드 서버
//! - `tool`: 도구 레지스트리와 Federation
//!
//! # 사용 예시
//!
//! ```ignore
//! use tether_core::{Federation, HandlerRegistry};
//!
//! let mut federation = Federation::new(&config, ".", Arc::new(HandlerRegistry::with_builtins()));
//! let registry = federation.start().await?;
//!
//! let output = registry.invoke("mcp_github_search", json!({"q": "tether"})).await;
//!
//! federation.shutdown().await?;
//! ```

pub mod loader;
pub mod mcp;
pub mod tool;

// Re-exports: Loader
pub use loader::{
    load_local_tools, CandidateSource, CommandFunc, DirectoryDiscovery, HandlerRegistry,
    LoadReport, LocalToolLoader, ManifestFormat, RejectReason, ToolDiscovery, ToolSpec,
};

// Re-exports: MCP
pub use mcp::{
    ConnectionEvent, ConnectionEventKind, ConnectionManager, ConnectionState, Implementation,
    McpClient, McpServer, McpTool, McpTransport, ServerStatus, StdioTransport,
    MCP_PROTOCOL_VERSION,
};

// Re-exports: Tool
pub use tool::{Federation, ToolRegistry};

// Layer1 re-exports
pub use tether_foundation::{Error, Result};

/// Layer2 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
