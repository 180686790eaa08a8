//! Agent collaborator - takes a task and a tool registry, returns conversation turns
//!
//! Reasoning engines plug in through [`AgentFactory`]. The shipped
//! [`DirectAgent`] does no planning: a task is `<tool-name> [json-args]` and the
//! named tool is invoked once.

use crate::model::LlmHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tether_core::ToolRegistry;
use tether_foundation::{Error, Result, ToolOutput};
use tracing::debug;

// ============================================================================
// Turn
// ============================================================================

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,

    /// Tool name for tool turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Tool turn carries a failure text
    #[serde(default)]
    pub is_error: bool,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Turn holding a tool result
    pub fn tool(name: impl Into<String>, output: ToolOutput) -> Self {
        let is_error = output.is_failure();
        Self {
            role: Role::Tool,
            content: output.into_text(),
            tool: Some(name.into()),
            is_error,
            timestamp: Utc::now(),
        }
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.role, &self.tool) {
            (Role::Tool, Some(tool)) => write!(f, "[{}] {}", tool, self.content),
            _ => f.write_str(&self.content),
        }
    }
}

// ============================================================================
// Agent / AgentFactory
// ============================================================================

/// Reasoning component driven by the engine
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run one task to completion
    async fn run(&self, task: &str) -> Result<Vec<Turn>>;
}

/// Builds an agent for a model handle and a registry snapshot
///
/// Called again whenever the registry changes.
pub trait AgentFactory: Send + Sync {
    fn build(&self, llm: Arc<LlmHandle>, tools: Arc<ToolRegistry>) -> Result<Arc<dyn Agent>>;
}

// ============================================================================
// DirectAgent
// ============================================================================

/// Invokes the tool named by the task
pub struct DirectAgent {
    llm: Arc<LlmHandle>,
    tools: Arc<ToolRegistry>,
}

impl DirectAgent {
    pub fn new(llm: Arc<LlmHandle>, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, tools }
    }

    pub fn llm(&self) -> &LlmHandle {
        &self.llm
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Split `<tool-name> [json-args]`
    pub fn parse_task(task: &str) -> Result<(&str, Value)> {
        let task = task.trim();
        if task.is_empty() {
            return Err(Error::InvalidInput("empty task".to_string()));
        }

        let (name, rest) = match task.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (task, ""),
        };

        let args = if rest.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(rest)
                .map_err(|e| Error::InvalidInput(format!("arguments are not valid JSON: {}", e)))?
        };

        Ok((name, args))
    }
}

#[async_trait]
impl Agent for DirectAgent {
    async fn run(&self, task: &str) -> Result<Vec<Turn>> {
        let (name, args) = Self::parse_task(task)?;
        debug!(tool = name, "Direct invocation");

        let output = self.tools.invoke(name, args).await;
        Ok(vec![Turn::user(task.trim()), Turn::tool(name, output)])
    }
}

/// Factory for [`DirectAgent`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectAgentFactory;

impl AgentFactory for DirectAgentFactory {
    fn build(&self, llm: Arc<LlmHandle>, tools: Arc<ToolRegistry>) -> Result<Arc<dyn Agent>> {
        Ok(Arc::new(DirectAgent::new(llm, tools)))
    }
}
