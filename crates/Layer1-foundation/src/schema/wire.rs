//! Wire Schema 변환 - Structured Schema <-> JSON Schema
//!
//! MCP `tools/list`와 LLM 도구 정의는 JSON Schema(`type`/`properties`/`required`)를
//! 사용합니다. 두 변환 모두 실패하지 않습니다. 알 수 없는 입력은 가장 관대한 형태로
//! 낮춰서 처리합니다.

use super::structured::{Field, FieldKind, Schema};
use serde_json::{json, Map, Value};

pub const SCHEMA_TYPE_STRING: &str = "string";
pub const SCHEMA_TYPE_NUMBER: &str = "number";
pub const SCHEMA_TYPE_INTEGER: &str = "integer";
pub const SCHEMA_TYPE_BOOLEAN: &str = "boolean";
pub const SCHEMA_TYPE_ARRAY: &str = "array";
pub const SCHEMA_TYPE_OBJECT: &str = "object";

// ============================================================================
// Structured -> Wire
// ============================================================================

/// Structured Schema를 JSON Schema 객체로 변환
pub fn to_wire_schema(schema: &Schema) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for (name, field) in schema.fields.iter() {
        properties.insert(name.clone(), wire_property(field));
        if field.is_required() {
            required.push(Value::String(name.clone()));
        }
    }

    json!({
        "type": SCHEMA_TYPE_OBJECT,
        "properties": properties,
        "required": required,
    })
}

fn wire_property(field: &Field) -> Value {
    let mut property = Map::new();
    property.insert("type".into(), Value::String(wire_type(&field.kind).into()));

    if let FieldKind::Enum { values } = &field.kind {
        property.insert(
            "enum".into(),
            Value::Array(values.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(description) = &field.description {
        property.insert("description".into(), Value::String(description.clone()));
    }
    if let Some(default) = &field.default {
        property.insert("default".into(), default.clone());
    }

    Value::Object(property)
}

/// 고정 분류. 분류할 수 없는 타입은 string으로 내보냄
fn wire_type(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Number => SCHEMA_TYPE_NUMBER,
        FieldKind::Boolean => SCHEMA_TYPE_BOOLEAN,
        FieldKind::Array => SCHEMA_TYPE_ARRAY,
        FieldKind::Object => SCHEMA_TYPE_OBJECT,
        FieldKind::String | FieldKind::Enum { .. } | FieldKind::Any => SCHEMA_TYPE_STRING,
    }
}

// ============================================================================
// Wire -> Structured
// ============================================================================

/// JSON Schema를 Structured Schema로 변환
///
/// `properties`가 없거나 객체가 아니면 빈 스키마(인자 없음)를 반환합니다.
pub fn to_structured_schema(wire: &Value) -> Schema {
    let Some(properties) = wire.get("properties").and_then(Value::as_object) else {
        return Schema::new();
    };

    let required: Vec<&str> = wire
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut schema = Schema::new();
    for (name, property) in properties {
        let mut field = Field::new(structured_kind(property));
        field.description = property
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        // required에 있으면 기본값이 있어도 필수. 기본값 채우기는 원격 서버 몫
        if required.contains(&name.as_str()) {
            field.optional = false;
        } else {
            field.optional = true;
            field.default = property.get("default").cloned();
        }
        schema.fields.insert(name.clone(), field);
    }

    schema
}

fn structured_kind(property: &Value) -> FieldKind {
    if let Some(values) = property.get("enum").and_then(Value::as_array) {
        let strings: Vec<String> = values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        if !strings.is_empty() && strings.len() == values.len() {
            return FieldKind::Enum { values: strings };
        }
    }

    let type_name = match property.get("type") {
        Some(Value::String(name)) => Some(name.as_str()),
        // ["string", "null"] 형태 - null이 아닌 첫 타입 사용
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|name| *name != "null"),
        _ => None,
    };

    match type_name {
        Some(SCHEMA_TYPE_STRING) => FieldKind::String,
        Some(SCHEMA_TYPE_NUMBER) | Some(SCHEMA_TYPE_INTEGER) => FieldKind::Number,
        Some(SCHEMA_TYPE_BOOLEAN) => FieldKind::Boolean,
        Some(SCHEMA_TYPE_ARRAY) => FieldKind::Array,
        Some(SCHEMA_TYPE_OBJECT) => FieldKind::Object,
        _ => FieldKind::Any,
    }
}
