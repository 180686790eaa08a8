//! Configuration Types
//!
//! `settings.json` / `settings.toml` 구조 (camelCase):
//!
//! ```json
//! {
//!   "llm": { "provider": "anthropic", "model": "claude-sonnet", "apiKeyEnv": "ANTHROPIC_API_KEY" },
//!   "tools": { "directory": "tools" },
//!   "mcpServers": { "github": { "command": "github-mcp" } },
//!   "engine": { "taskTimeoutSecs": 300 },
//!   "server": { "name": "tether" }
//! }
//! ```

use super::mcp::{validate_servers, McpServers};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 기본 로컬 도구 디렉토리
pub const DEFAULT_TOOLS_DIR: &str = "tools";

// ============================================================================
// TetherConfig
// ============================================================================

/// 통합 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherConfig {
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub mcp_servers: McpServers,
    pub engine: EngineConfig,
    pub server: ServeConfig,
}

impl TetherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 설정 검증. 잘못된 서버 설정은 모두 모아서 보고
    pub fn validate(&self) -> Result<()> {
        validate_servers(&self.mcp_servers)
            .map_err(|errors| Error::Config(format!("invalid mcpServers: {}", errors.join("; "))))?;

        if self.engine.task_timeout_secs == Some(0) {
            return Err(Error::Config(
                "engine.taskTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// 다른 설정과 병합 (later가 우선)
    ///
    /// 서버는 이름 기준으로 병합: 기존 서버는 제자리에서 교체, 새 서버는 뒤에 추가.
    pub fn merge(mut self, later: TetherConfig) -> Self {
        self.llm = self.llm.merge(later.llm);
        if later.tools.directory != PathBuf::from(DEFAULT_TOOLS_DIR) {
            self.tools.directory = later.tools.directory;
        }
        self.mcp_servers.extend(later.mcp_servers);
        self.engine.task_timeout_secs = later
            .engine
            .task_timeout_secs
            .or(self.engine.task_timeout_secs);
        self.server.name = later.server.name.or(self.server.name);
        self.server.version = later.server.version.or(self.server.version);
        self
    }
}

// ============================================================================
// 섹션별 설정
// ============================================================================

/// LLM 설정
///
/// 엔진은 이 값을 해석하지 않고 LLM 핸들에 그대로 넘깁니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// API 키를 담은 환경변수 이름
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl LlmConfig {
    fn merge(self, later: LlmConfig) -> Self {
        Self {
            provider: later.provider.or(self.provider),
            model: later.model.or(self.model),
            base_url: later.base_url.or(self.base_url),
            api_key_env: later.api_key_env.or(self.api_key_env),
        }
    }
}

/// 로컬 도구 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// 도구 매니페스트 디렉토리 (작업 디렉토리 기준)
    pub directory: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_TOOLS_DIR),
        }
    }
}

/// 엔진 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// 헤드리스 작업 타임아웃 (초)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
}

/// `tether serve`가 노출하는 서버 정보
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerLaunch;

    #[test]
    fn test_defaults() {
        let config: TetherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.tools.directory, PathBuf::from("tools"));
        assert!(config.mcp_servers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: TetherConfig = toml::from_str(
            r#"
            [llm]
            provider = "anthropic"
            apiKeyEnv = "ANTHROPIC_API_KEY"

            [engine]
            taskTimeoutSecs = 30

            [mcpServers.b]
            command = "b-server"

            [mcpServers.a]
            command = "a-server"
            args = ["--stdio"]
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.engine.task_timeout_secs, Some(30));
        let names: Vec<_> = config.mcp_servers.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_merge_servers_by_name() {
        let mut earlier = TetherConfig::new();
        earlier.llm.model = Some("small".into());
        earlier.mcp_servers.insert("a".into(), ServerLaunch::new("a-v1"));
        earlier.mcp_servers.insert("b".into(), ServerLaunch::new("b-v1"));

        let mut later = TetherConfig::new();
        later.llm.provider = Some("local".into());
        later.mcp_servers.insert("c".into(), ServerLaunch::new("c-v1"));
        later.mcp_servers.insert("a".into(), ServerLaunch::new("a-v2"));

        let merged = earlier.merge(later);
        assert_eq!(merged.llm.model.as_deref(), Some("small"));
        assert_eq!(merged.llm.provider.as_deref(), Some("local"));

        let servers: Vec<_> = merged
            .mcp_servers
            .iter()
            .map(|(name, launch)| (name.as_str(), launch.command.as_str()))
            .collect();
        assert_eq!(servers, vec![("a", "a-v2"), ("b", "b-v1"), ("c", "c-v1")]);
    }

    #[test]
    fn test_validate_rejects_bad_servers() {
        let mut config = TetherConfig::new();
        config.mcp_servers.insert("empty".into(), ServerLaunch::new(""));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("empty:"));
    }
}
