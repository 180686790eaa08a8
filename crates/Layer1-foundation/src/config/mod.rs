//! Configuration - 통합 설정
//!
//! - `types`: TetherConfig 및 섹션별 설정
//! - `mcp`: MCP 서버 실행 설정 (`mcpServers`)
//! - `loader`: 사용자 / 프로젝트 / 로컬 설정 파일 병합

mod loader;
mod mcp;
mod types;

pub use loader::{load_config_from_file, ConfigLoader, CONFIG_DIR_NAME};
pub use mcp::{expand_env_var, validate_servers, ChildEnv, McpServers, ServerLaunch};
pub use types::{
    EngineConfig, LlmConfig, ServeConfig, TetherConfig, ToolsConfig, DEFAULT_TOOLS_DIR,
};
