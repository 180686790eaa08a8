//! MCP Bridge - 원격 MCP 도구를 `ToolDefinition`으로 변환
//!
//! 이름은 `mcp_<server>_<tool>`로 네임스페이스를 붙이고, 입력 스키마는 JSON Schema에서
//! 구조화된 스키마로 변환합니다. 호출은 `tools/call`로 전달됩니다.

use super::client::McpClient;
use super::types::{CallToolResult, McpContent, McpTool};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tether_foundation::{to_structured_schema, ToolDefinition, ToolInvoker, ToolOutput, ToolSource};
use tracing::warn;

/// 레지스트리에 노출되는 원격 도구 이름
pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("mcp_{}_{}", server, tool)
}

/// MCP 도구 하나를 ToolDefinition으로 변환
pub fn adapt_remote_tool(server: &str, tool: McpTool, client: Arc<McpClient>) -> ToolDefinition {
    let name = qualified_tool_name(server, &tool.name);
    let description = tool
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("MCP tool {} from {}", tool.name, server));
    let schema = to_structured_schema(&tool.input_schema);

    let invoker = McpToolAdapter {
        qualified_name: name.clone(),
        remote_name: tool.name.clone(),
        client,
    };

    ToolDefinition::new(
        name,
        description,
        schema,
        ToolSource::Remote {
            server: server.to_string(),
            tool: tool.name,
        },
        Arc::new(invoker),
    )
}

/// MCP 도구 호출 어댑터
pub struct McpToolAdapter {
    qualified_name: String,
    remote_name: String,
    client: Arc<McpClient>,
}

#[async_trait]
impl ToolInvoker for McpToolAdapter {
    async fn invoke(&self, args: Value) -> ToolOutput {
        match self.client.call_tool(&self.remote_name, args).await {
            Ok(raw) => render_call_result(&self.qualified_name, raw),
            Err(e) => {
                warn!(tool = %self.qualified_name, "MCP tool call failed: {}", e);
                ToolOutput::failure(&self.qualified_name, e)
            }
        }
    }
}

/// `tools/call` 결과를 텍스트로 변환
///
/// 텍스트 콘텐츠는 개행으로 연결하고, 텍스트가 없으면 원본 결과를 JSON으로 직렬화합니다.
/// 콘텐츠 항목은 하나씩 해석하며, 해석할 수 없는 항목은 건너뜁니다.
pub fn render_call_result(tool: &str, raw: Value) -> ToolOutput {
    let is_error = raw.get("isError").and_then(Value::as_bool).unwrap_or(false);
    let content: Vec<McpContent> = raw
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    let text = CallToolResult { content, is_error }
        .joined_text()
        .unwrap_or_else(|| raw.to_string());

    if is_error {
        ToolOutput::failure(tool, text)
    } else {
        ToolOutput::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_content_is_joined() {
        let output = render_call_result(
            "mcp_b_echo",
            json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}),
        );
        assert_eq!(output, ToolOutput::Text("a\nb".into()));
    }

    #[test]
    fn test_non_text_result_is_serialized() {
        let raw = json!({"content": [{"type": "image", "data": "AA==", "mimeType": "image/png"}]});
        let output = render_call_result("mcp_b_shot", raw.clone());
        assert_eq!(output, ToolOutput::Text(raw.to_string()));
    }

    #[test]
    fn test_is_error_becomes_failure() {
        let output = render_call_result(
            "mcp_b_fail",
            json!({"content": [{"type": "text", "text": "no such file"}], "isError": true}),
        );
        assert!(output.is_failure());
        assert_eq!(
            output.as_text(),
            "Error: tool 'mcp_b_fail' failed: no such file"
        );
    }

    #[test]
    fn test_malformed_content_keeps_is_error() {
        let raw = json!({"content": [{"type": "text"}], "isError": true});
        let output = render_call_result("mcp_b_fail", raw.clone());
        assert!(output.is_failure());
        assert_eq!(
            output.as_text(),
            format!("Error: tool 'mcp_b_fail' failed: {}", raw)
        );

        let mixed = json!({
            "content": [{"type": "text"}, {"type": "text", "text": "still here"}],
            "isError": true
        });
        assert_eq!(
            render_call_result("mcp_b_fail", mixed).as_text(),
            "Error: tool 'mcp_b_fail' failed: still here"
        );
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_tool_name("github", "search"), "mcp_github_search");
    }
}
