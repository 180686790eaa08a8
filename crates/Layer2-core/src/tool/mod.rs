//! Tool System - 로컬 도구와 원격 MCP 도구의 연합
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Federation (단일 소유자)                                    │
//! │  ├── LocalToolLoader - tools/ 매니페스트                     │
//! │  ├── ConnectionManager - MCP 서버 연결                       │
//! │  └── watch::Sender<Arc<ToolRegistry>> - 스냅샷 게시          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ToolRegistry (불변 스냅샷)                                  │
//! │  ├── get(name) - 도구 조회                                   │
//! │  ├── invoke(name, args) - 도구 호출                          │
//! │  └── schemas() - MCP 호환 스키마                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod federation;
mod registry;

pub use federation::Federation;
pub use registry::ToolRegistry;
