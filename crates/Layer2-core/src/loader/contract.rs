//! Tool Contract - 매니페스트 문서를 검증해 `ToolSpec`으로 변환
//!
//! 기본 export는 `tool` 항목입니다. 배열이면 계약을 만족하는 첫 항목을 사용합니다.
//! `tool` 항목이 없거나 유효하지 않으면 최상위의 `name`, `description`, `schema`,
//! `func` 키를 모아서 다시 검증합니다.
//!
//! ```toml
//! name = "weather"
//! description = "Current weather for a city"
//! func = "./weather.sh"
//!
//! [schema.fields.city]
//! kind = "string"
//! ```

use super::discovery::ManifestFormat;
use super::func::{CommandFunc, Executor, HandlerRegistry};
use serde_json::{Map, Value};
use tether_foundation::Schema;
use thiserror::Error;

/// 핸들러 참조 접두사 (`func = "handler:echo"`)
pub const HANDLER_PREFIX: &str = "handler:";

/// 계약을 통과한 도구 명세
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Schema,
    pub executor: Executor,
}

/// 계약 위반 사유
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("manifest is not a table/object")]
    NotAnObject,

    #[error("missing 'name'")]
    MissingName,

    #[error("'name' must be a non-empty string")]
    InvalidName,

    #[error("'description' must be a string")]
    InvalidDescription,

    #[error("missing 'schema'")]
    MissingSchema,

    #[error("invalid 'schema': {0}")]
    InvalidSchema(String),

    #[error("missing 'func'")]
    MissingFunc,

    #[error("invalid 'func': {0}")]
    InvalidFunc(String),

    #[error("unknown handler '{0}'")]
    UnknownHandler(String),

    #[error("'tool' array has no valid entry")]
    NoValidEntry,
}

/// 매니페스트 텍스트를 JSON 값으로 파싱
pub fn parse_manifest(text: &str, format: ManifestFormat) -> Result<Value, String> {
    match format {
        ManifestFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        ManifestFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        ManifestFormat::Toml => {
            let value: toml::Value = toml::from_str(text).map_err(|e| e.to_string())?;
            serde_json::to_value(value).map_err(|e| e.to_string())
        }
    }
}

/// 문서 전체 검증 (`tool` export 우선, 실패 시 최상위 키)
pub fn validate_document(doc: &Value, handlers: &HandlerRegistry) -> Result<ToolSpec, RejectReason> {
    let root = doc.as_object().ok_or(RejectReason::NotAnObject)?;

    let export = match root.get("tool") {
        Some(Value::Array(entries)) => {
            let mut found = Err(RejectReason::NoValidEntry);
            for entry in entries {
                if let Ok(spec) = validate_export(entry, handlers) {
                    found = Ok(spec);
                    break;
                }
            }
            Some(found)
        }
        Some(entry) => Some(validate_export(entry, handlers)),
        None => None,
    };

    match export {
        Some(Ok(spec)) => Ok(spec),
        Some(Err(export_reason)) => {
            // `tool` export가 유효하지 않으면 최상위 키로 재시도
            let fallback = named_keys(root);
            if fallback.is_empty() {
                return Err(export_reason);
            }
            validate_export(&Value::Object(fallback), handlers)
        }
        None => validate_export(&Value::Object(named_keys(root)), handlers),
    }
}

fn named_keys(root: &Map<String, Value>) -> Map<String, Value> {
    ["name", "description", "schema", "func"]
        .iter()
        .filter_map(|key| root.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

/// export 하나 검증
pub fn validate_export(entry: &Value, handlers: &HandlerRegistry) -> Result<ToolSpec, RejectReason> {
    let entry = entry.as_object().ok_or(RejectReason::NotAnObject)?;

    let name = match entry.get("name") {
        None => return Err(RejectReason::MissingName),
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(_) => return Err(RejectReason::InvalidName),
    };

    let description = match entry.get("description") {
        Some(Value::String(description)) => description.clone(),
        _ => return Err(RejectReason::InvalidDescription),
    };

    let schema = match entry.get("schema") {
        None => return Err(RejectReason::MissingSchema),
        Some(value @ Value::Object(_)) => serde_json::from_value::<Schema>(value.clone())
            .map_err(|e| RejectReason::InvalidSchema(e.to_string()))?,
        Some(_) => {
            return Err(RejectReason::InvalidSchema("expected a table/object".to_string()))
        }
    };

    let executor = resolve_func(entry.get("func").ok_or(RejectReason::MissingFunc)?, handlers)?;

    Ok(ToolSpec {
        name,
        description,
        schema,
        executor,
    })
}

/// `func` 해석
///
/// - `"handler:<name>"` 또는 `{ handler = "<name>" }`: 등록된 핸들러
/// - `"<command line>"` 또는 `{ command, args, env, timeoutSecs }`: 외부 명령
fn resolve_func(func: &Value, handlers: &HandlerRegistry) -> Result<Executor, RejectReason> {
    match func {
        Value::String(line) => match line.strip_prefix(HANDLER_PREFIX) {
            Some(name) => resolve_handler(name.trim(), handlers),
            None => CommandFunc::parse(line)
                .map(Executor::Command)
                .ok_or_else(|| RejectReason::InvalidFunc(format!("cannot parse command '{}'", line))),
        },
        Value::Object(map) => {
            if let Some(handler) = map.get("handler") {
                let name = handler
                    .as_str()
                    .ok_or_else(|| RejectReason::InvalidFunc("'handler' must be a string".into()))?;
                return resolve_handler(name, handlers);
            }

            let command: CommandFunc = serde_json::from_value(func.clone())
                .map_err(|e| RejectReason::InvalidFunc(e.to_string()))?;
            if command.command.trim().is_empty() {
                return Err(RejectReason::InvalidFunc("'command' is empty".into()));
            }
            Ok(Executor::Command(command))
        }
        _ => Err(RejectReason::InvalidFunc(
            "expected a command string or table".into(),
        )),
    }
}

fn resolve_handler(name: &str, handlers: &HandlerRegistry) -> Result<Executor, RejectReason> {
    handlers
        .get(name)
        .map(|handler| Executor::Handler {
            name: name.to_string(),
            handler,
        })
        .ok_or_else(|| RejectReason::UnknownHandler(name.to_string()))
}
