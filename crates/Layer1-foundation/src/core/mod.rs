//! Core Module - 도구 정의 타입
//!
//! 로컬 도구와 원격 도구가 공유하는 `ToolDefinition`, 호출 결과 `ToolOutput`,
//! 실행 인터페이스 `ToolInvoker`를 정의합니다.

mod tool;

pub use tool::{FnInvoker, ToolDefinition, ToolInvoker, ToolOutput, ToolSource};
