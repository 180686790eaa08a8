//! Schema - 도구 입력 스키마
//!
//! - `structured`: 로컬 검증용 스키마 (Schema, Field, FieldKind)
//! - `wire`: MCP / JSON Schema 표현과의 양방향 변환

mod structured;
mod wire;

pub use structured::{Field, FieldKind, Schema, SchemaError};
pub use wire::{
    to_structured_schema, to_wire_schema, SCHEMA_TYPE_ARRAY, SCHEMA_TYPE_BOOLEAN,
    SCHEMA_TYPE_INTEGER, SCHEMA_TYPE_NUMBER, SCHEMA_TYPE_OBJECT, SCHEMA_TYPE_STRING,
};
