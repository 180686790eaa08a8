//! Tool 타입 - 레지스트리에 올라가는 호출 가능한 단위
//!
//! 로컬 매니페스트 도구와 원격 MCP 도구 모두 `ToolDefinition`으로 통일됩니다.
//! `invoke`는 실패하지 않습니다. 내부 실패는 `ToolOutput::Failure`에 진단 텍스트로 담겨
//! 반환되고, 추론 엔진은 항상 문자열을 받습니다.

use crate::schema::{to_wire_schema, Schema};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// ToolOutput
// ============================================================================

/// 도구 실행 결과
///
/// 두 variant 모두 텍스트를 담습니다. `Failure`는 합성된 진단 메시지입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Text(String),
    Failure(String),
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        ToolOutput::Text(text.into())
    }

    /// `Error: tool '<name>' failed: <reason>` 형식의 실패 결과
    pub fn failure(tool: &str, reason: impl fmt::Display) -> Self {
        ToolOutput::Failure(format!("Error: tool '{}' failed: {}", tool, reason))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolOutput::Failure(_))
    }

    pub fn as_text(&self) -> &str {
        match self {
            ToolOutput::Text(text) | ToolOutput::Failure(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(text) | ToolOutput::Failure(text) => text,
        }
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

// ============================================================================
// ToolInvoker
// ============================================================================

/// 도구 실행 인터페이스
///
/// 구현체는 절대 에러를 전파하지 않고 `ToolOutput`으로 변환해야 합니다.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, args: Value) -> ToolOutput;
}

/// 클로저 기반 invoker (테스트, 인라인 도구용)
pub struct FnInvoker<F> {
    func: F,
}

impl<F> FnInvoker<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> ToolInvoker for FnInvoker<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = ToolOutput> + Send,
{
    async fn invoke(&self, args: Value) -> ToolOutput {
        (self.func)(args).await
    }
}

// ============================================================================
// ToolDefinition
// ============================================================================

/// 도구 출처
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    /// 로컬 매니페스트 파일
    Local { path: PathBuf },
    /// MCP 서버 (서버 이름, 원격 도구 이름)
    Remote { server: String, tool: String },
    /// 코드에서 직접 생성
    Inline,
}

/// 레지스트리의 도구 정의 (생성 후 불변)
#[derive(Clone)]
pub struct ToolDefinition {
    name: String,
    description: String,
    input_schema: Schema,
    source: ToolSource,
    invoker: Arc<dyn ToolInvoker>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Schema,
        source: ToolSource,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            source,
            invoker,
        }
    }

    /// 클로저로 인라인 도구 생성
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Schema,
        func: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutput> + Send + 'static,
    {
        Self::new(
            name,
            description,
            input_schema,
            ToolSource::Inline,
            Arc::new(FnInvoker::new(func)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Schema {
        &self.input_schema
    }

    pub fn source(&self) -> &ToolSource {
        &self.source
    }

    /// 원격 도구면 서버 이름
    pub fn server(&self) -> Option<&str> {
        match &self.source {
            ToolSource::Remote { server, .. } => Some(server),
            _ => None,
        }
    }

    /// JSON Schema 형식의 입력 스키마 (MCP / LLM 노출용)
    pub fn wire_schema(&self) -> Value {
        to_wire_schema(&self.input_schema)
    }

    pub async fn invoke(&self, args: Value) -> ToolOutput {
        self.invoker.invoke(args).await
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use serde_json::json;

    #[test]
    fn test_failure_format() {
        let output = ToolOutput::failure("grep", "pattern is empty");
        assert!(output.is_failure());
        assert_eq!(output.as_text(), "Error: tool 'grep' failed: pattern is empty");
    }

    #[tokio::test]
    async fn test_inline_tool() {
        let tool = ToolDefinition::from_fn(
            "shout",
            "Upper-cases text",
            Schema::new().field("text", Field::string()),
            |args| async move {
                let text = args["text"].as_str().unwrap_or_default().to_uppercase();
                ToolOutput::text(text)
            },
        );

        assert_eq!(tool.name(), "shout");
        assert_eq!(tool.server(), None);
        assert_eq!(tool.wire_schema()["required"], json!(["text"]));

        let output = tool.invoke(json!({"text": "hi"})).await;
        assert_eq!(output, ToolOutput::Text("HI".into()));
    }
}
