//! Tool Registry - 로컬 도구와 원격 MCP 도구를 합친 단일 목록
//!
//! 레지스트리는 불변 스냅샷입니다. 연결 상태나 로컬 도구가 바뀌면 고치지 않고
//! `build()`로 새로 만듭니다.
//!
//! 순서: 로컬 도구 먼저, 이어서 서버 선언 순서대로 원격 도구 (서버 안에서는 목록 순서).
//!
//! ```ignore
//! let registry = ToolRegistry::build(&local_tools, &manager);
//! let output = registry.invoke("mcp_github_search", json!({"q": "tether"})).await;
//! ```

use crate::mcp::ConnectionManager;
use serde_json::{json, Value};
use std::collections::HashMap;
use tether_foundation::{Error, ToolDefinition, ToolOutput};
use tracing::{debug, warn};

/// 도구 레지스트리 (이름 유일, 순서 보존)
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// 빈 레지스트리
    pub fn new() -> Self {
        Self::default()
    }

    /// 로컬 도구 + 관리자의 원격 도구로 생성
    pub fn build(local: &[ToolDefinition], manager: &ConnectionManager) -> Self {
        Self::from_tools(local.iter().cloned().chain(manager.get_tools()))
    }

    /// 도구 목록으로 생성. 이름이 겹치면 먼저 나온 것을 유지
    pub fn from_tools(tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            if registry.index.contains_key(tool.name()) {
                warn!(
                    "Duplicate tool name '{}' from {:?}, keeping the first",
                    tool.name(),
                    tool.source()
                );
                continue;
            }
            registry
                .index
                .insert(tool.name().to_string(), registry.tools.len());
            registry.tools.push(tool);
        }
        debug!("Built tool registry with {} tools", registry.tools.len());
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 등록 순서대로 순회
    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// 특정 서버의 원격 도구
    pub fn server_tools<'a>(&'a self, server: &'a str) -> impl Iterator<Item = &'a ToolDefinition> {
        self.tools
            .iter()
            .filter(move |t| t.server() == Some(server))
    }

    /// 로컬 도구 수
    pub fn local_count(&self) -> usize {
        self.tools.iter().filter(|t| t.server().is_none()).count()
    }

    /// MCP `tools/list` 형식의 도구 정의
    pub fn schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.wire_schema(),
                })
            })
            .collect()
    }

    /// 이름으로 도구 호출. 없는 도구는 실패 텍스트
    pub async fn invoke(&self, name: &str, args: Value) -> ToolOutput {
        match self.get(name) {
            Some(tool) => tool.invoke(args).await,
            None => ToolOutput::failure(name, Error::ToolNotFound(name.to_string())),
        }
    }
}
