//! # tether-foundation
//!
//! Foundation layer for Tether:
//! - Error: 크레이트 공통 에러 타입
//! - Schema: 구조화된 입력 스키마와 JSON Schema(wire) 변환
//! - Core: ToolDefinition / ToolOutput / ToolInvoker
//! - Config: TetherConfig, MCP 서버 실행 설정, 설정 로더
//!
//! ## 아키텍처
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Tool Registry (tether-core)                  │
//! │  ├── Local Tools  (manifest files)            │
//! │  └── MCP Tools    (mcp_<server>_<tool>)       │
//! │                    │                          │
//! │                    ▼                          │
//! │        ToolDefinition  (this crate)           │
//! │        ├── Schema      (validate, wire)       │
//! │        └── ToolOutput  (Text / Failure)       │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod ordered;
pub mod schema;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Core
// ============================================================================
pub use core::{FnInvoker, ToolDefinition, ToolInvoker, ToolOutput, ToolSource};

// ============================================================================
// Schema
// ============================================================================
pub use schema::{to_structured_schema, to_wire_schema, Field, FieldKind, Schema, SchemaError};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    ChildEnv, ConfigLoader, EngineConfig, LlmConfig, McpServers, ServeConfig, ServerLaunch,
    TetherConfig, ToolsConfig,
};

pub use ordered::OrderedMap;
