//! Protobuf → JSON rendering.
//!
//! Handlers that want a uniform view over every payload kind read decoded
//! protobuf messages as `serde_json::Value`. Proto3 omits scalar fields that
//! hold their default value, so the descriptor is used to fill them back in.

use crate::error::{KafkaTypesError, Result};
use crate::proto::{ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoType};
use base64::Engine;
use serde_json::{Map, Value};
use tracing::debug;

/// Deepest message nesting rendered before giving up.
pub const MAX_NESTING: usize = 100;

/// Render a whole decoded message as a JSON object, in field definition order.
pub fn proto_message_to_json(msg: &ProtoMessage) -> Result<Value> {
    message_to_json(msg, 0)
}

/// Render a single field value as JSON.
pub fn proto_to_json(value: &ProtoFieldValue) -> Result<Value> {
    value_to_json(value, 0)
}

fn message_to_json(msg: &ProtoMessage, depth: usize) -> Result<Value> {
    if depth > MAX_NESTING {
        return Err(KafkaTypesError::TypeConversion(format!(
            "recursion limit exceeded rendering {}",
            msg.message_type
        )));
    }
    if msg.message_type == "google.protobuf.Timestamp" {
        return timestamp_to_json(msg);
    }

    let mut map = Map::new();
    for name in &msg.descriptor.field_order {
        let value = match msg.fields.get(name) {
            Some(v) => value_to_json(v, depth)?,
            None => match msg.descriptor.fields.get(name) {
                Some(desc) => {
                    debug!(
                        "Adding proto3 default for missing field '{}' of {}",
                        name, msg.message_type
                    );
                    proto3_default(desc)
                }
                None => {
                    return Err(KafkaTypesError::MissingField(format!(
                        "Field descriptor for '{name}' not found"
                    )))
                }
            },
        };
        map.insert(name.clone(), value);
    }
    Ok(Value::Object(map))
}

fn value_to_json(value: &ProtoFieldValue, depth: usize) -> Result<Value> {
    Ok(match value {
        ProtoFieldValue::Double(d) => serde_json::json!(*d),
        ProtoFieldValue::Float(f) => serde_json::json!(*f),
        ProtoFieldValue::Int32(i) => serde_json::json!(*i),
        ProtoFieldValue::Int64(i) => serde_json::json!(*i),
        ProtoFieldValue::Uint32(u) => serde_json::json!(*u),
        ProtoFieldValue::Uint64(u) => serde_json::json!(*u),
        ProtoFieldValue::Bool(b) => Value::Bool(*b),
        ProtoFieldValue::String(s) => Value::String(s.clone()),
        ProtoFieldValue::Bytes(b) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        ProtoFieldValue::Message(m) => {
            if m.message_type.is_empty() {
                return Err(KafkaTypesError::TypeConversion(
                    "Nested message has no type".to_string(),
                ));
            }
            message_to_json(m, depth + 1)?
        }
        ProtoFieldValue::Repeated(reps) => Value::Array(
            reps.iter()
                .map(|v| value_to_json(v, depth))
                .collect::<Result<Vec<_>>>()?,
        ),
        ProtoFieldValue::Null => Value::Null,
    })
}

fn timestamp_to_json(msg: &ProtoMessage) -> Result<Value> {
    let seconds = match msg.fields.get("seconds") {
        Some(ProtoFieldValue::Int64(s)) => *s,
        None => 0,
        Some(other) => {
            return Err(KafkaTypesError::FieldType {
                field: "seconds".to_string(),
                expected: "int64".to_string(),
                actual: other.proto_field_type().to_string(),
            })
        }
    };
    let nanos = match msg.fields.get("nanos") {
        Some(ProtoFieldValue::Int32(n)) => *n as u32,
        _ => 0,
    };
    let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(seconds, nanos)
        .ok_or(KafkaTypesError::InvalidTimestamp { seconds, nanos })?;
    Ok(Value::String(dt.to_rfc3339()))
}

fn proto3_default(desc: &ProtoFieldDescriptor) -> Value {
    if desc.is_repeated {
        return Value::Array(Vec::new());
    }
    match &desc.field_type {
        ProtoType::Double | ProtoType::Float => serde_json::json!(0.0),
        ProtoType::Int32
        | ProtoType::Int64
        | ProtoType::Uint32
        | ProtoType::Uint64
        | ProtoType::Sint32
        | ProtoType::Sint64
        | ProtoType::Fixed32
        | ProtoType::Fixed64
        | ProtoType::Sfixed32
        | ProtoType::Sfixed64
        | ProtoType::Enum(_) => serde_json::json!(0),
        ProtoType::Bool => Value::Bool(false),
        ProtoType::String | ProtoType::Bytes => Value::String(String::new()),
        ProtoType::Repeated(_) => Value::Array(Vec::new()),
        ProtoType::Message(_) | ProtoType::Optional(_) | ProtoType::Null => Value::Null,
    }
}
