//! # tether-agent
//!
//! Engine orchestrator for Tether.
//!
//! ## Components
//!
//! - **LlmHandle**: resolved model capability handed to agents
//! - **Agent / AgentFactory**: the reasoning collaborator and how it is built
//! - **DirectAgent**: runs `<tool-name> [json-args]` tasks without a model
//! - **Engine**: startup, headless tasks, interactive loop, shutdown
//!
//! ## Usage
//!
//! ```ignore
//! use tether_agent::Engine;
//!
//! let mut engine = Engine::new(config, ".");
//! engine.start().await?;
//!
//! let turns = engine.run_task("mcp_github_search {\"q\": \"tether\"}").await?;
//!
//! engine.shutdown().await?;
//! ```

pub mod agent;
pub mod engine;
pub mod model;

pub use agent::{Agent, AgentFactory, DirectAgent, DirectAgentFactory, Role, Turn};
pub use engine::Engine;
pub use model::LlmHandle;
