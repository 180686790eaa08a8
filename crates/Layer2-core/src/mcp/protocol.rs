//! JSON-RPC 2.0 메시지 타입
//!
//! 클라이언트(전송 계층)와 인바운드 서버가 공유합니다. 한 줄에 메시지 하나
//! (newline-delimited JSON).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// ============================================================================
// Request ID
// ============================================================================

/// 요청 ID (숫자 또는 문자열)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// JSON-RPC 2.0 요청
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 알림 (응답 없음)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 응답
///
/// `id`는 요청을 식별할 수 없을 때(parse error) `null`로 직렬화됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 에러 객체
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {}", detail))
    }

    pub fn invalid_request(detail: impl fmt::Display) -> Self {
        Self::new(INVALID_REQUEST, format!("Invalid Request: {}", detail))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

// ============================================================================
// Incoming message classification
// ============================================================================

/// 수신한 한 줄을 분류한 결과
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// 한 줄 파싱
    ///
    /// JSON이 아니면 parse error, JSON이지만 메시지 형태가 아니면 invalid request.
    /// invalid request의 경우 식별 가능한 id를 함께 돌려줍니다.
    pub fn parse(line: &str) -> Result<Self, (Option<RequestId>, JsonRpcError)> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| (None, JsonRpcError::parse_error(e)))?;

        let id = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
        let has_id = value.get("id").map_or(false, |id| !id.is_null());
        let has_method = value.get("method").is_some();

        let parsed = match (has_method, has_id) {
            (true, true) => serde_json::from_value(value).map(JsonRpcMessage::Request),
            (true, false) => serde_json::from_value(value).map(JsonRpcMessage::Notification),
            (false, _) => serde_json::from_value(value).map(JsonRpcMessage::Response),
        };

        parsed.map_err(|e| (id, JsonRpcError::invalid_request(e)))
    }

    /// 줄 단위 전송용 직렬화 (개행 포함)
    pub fn to_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_messages() {
        let request = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(matches!(request, JsonRpcMessage::Request(ref r) if r.id == RequestId::Number(1)));

        let note =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(matches!(note, JsonRpcMessage::Notification(_)));

        let response =
            JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#).unwrap();
        match response {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.id, Some(RequestId::String("abc".into())));
                assert_eq!(r.result, Some(json!({})));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        let (id, error) = JsonRpcMessage::parse("{not json").unwrap_err();
        assert_eq!(id, None);
        assert_eq!(error.code, PARSE_ERROR);

        let (id, error) = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":7,"method":42}"#).unwrap_err();
        assert_eq!(id, Some(RequestId::Number(7)));
        assert_eq!(error.code, INVALID_REQUEST);
    }

    #[test]
    fn test_failure_response_keeps_null_id() {
        let response = JsonRpcResponse::failure(None, JsonRpcError::parse_error("eof"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], PARSE_ERROR);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_to_line_appends_newline() {
        let line = JsonRpcMessage::to_line(&JsonRpcNotification::new("x", None)).unwrap();
        assert_eq!(line, "{\"jsonrpc\":\"2.0\",\"method\":\"x\"}\n");
    }
}
