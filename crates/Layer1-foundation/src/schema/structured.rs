//! Structured Schema - 도구 입력 검증용 스키마
//!
//! 로컬 도구 매니페스트에 선언되고, 호출 인자를 실행 전에 검증합니다.
//!
//! ```toml
//! [schema.fields.path]
//! kind = "string"
//! description = "File to read"
//!
//! [schema.fields.limit]
//! kind = "number"
//! optional = true
//! ```

use crate::ordered::OrderedMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// FieldKind - 필드 타입
// ============================================================================

/// 필드 타입 분류
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// 허용된 문자열 값 중 하나
    Enum { values: Vec<String> },
    /// 어떤 값이든 허용
    Any,
}

impl FieldKind {
    /// 에러 메시지용 이름
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
            FieldKind::Enum { .. } => "enum",
            FieldKind::Any => "any",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Enum { values } => value
                .as_str()
                .map_or(false, |s| values.iter().any(|v| v == s)),
            FieldKind::Any => true,
        }
    }
}

// ============================================================================
// Field
// ============================================================================

/// 스키마 필드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(flatten)]
    pub kind: FieldKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            description: None,
            optional: false,
            default: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::new(FieldKind::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn array() -> Self {
        Self::new(FieldKind::Array)
    }

    pub fn object() -> Self {
        Self::new(FieldKind::Object)
    }

    pub fn any() -> Self {
        Self::new(FieldKind::Any)
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FieldKind::Enum {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// optional도 아니고 기본값도 없으면 필수
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }
}

// ============================================================================
// Schema
// ============================================================================

/// 스키마 검증 에러
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("arguments must be an object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field '{field}' must be one of [{allowed}], got {value}")]
    NotInEnum {
        field: String,
        value: String,
        allowed: String,
    },
}

/// 구조화된 검증 스키마 (필드 선언 순서 보존)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    pub fields: OrderedMap<Field>,
}

impl Schema {
    /// 빈 스키마 (인자 없음)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 필수 필드 이름 (선언 순서)
    pub fn required_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.is_required())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// 호출 인자 검증
    ///
    /// 통과하면 기본값이 채워진 인자를 반환합니다. 선언되지 않은 키는 그대로 통과.
    pub fn validate(&self, args: &Value) -> Result<Value, SchemaError> {
        let mut object = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => return Err(SchemaError::NotAnObject(json_type_name(other))),
        };

        for (name, field) in self.fields.iter() {
            match object.get(name).filter(|v| !v.is_null()) {
                Some(value) => check_kind(name, field, value)?,
                None => {
                    if let Some(default) = &field.default {
                        object.insert(name.clone(), default.clone());
                    } else if !field.optional {
                        return Err(SchemaError::MissingField(name.clone()));
                    }
                }
            }
        }

        Ok(Value::Object(object))
    }
}

fn check_kind(name: &str, field: &Field, value: &Value) -> Result<(), SchemaError> {
    if field.kind.accepts(value) {
        return Ok(());
    }

    match &field.kind {
        FieldKind::Enum { values } if value.is_string() => Err(SchemaError::NotInEnum {
            field: name.to_string(),
            value: value.to_string(),
            allowed: values.join(", "),
        }),
        kind => Err(SchemaError::TypeMismatch {
            field: name.to_string(),
            expected: match kind {
                FieldKind::Enum { .. } => "string",
                other => other.name(),
            },
            found: json_type_name(value),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
