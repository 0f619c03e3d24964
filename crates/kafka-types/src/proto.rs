//! Protobuf type definitions.
//!
//! These types are the shared data structures for decoded protobuf messages.
//! The schema types are produced by the parser in the consumer crate; the
//! message types are produced by its decoder and read by message handlers.
//!
//! ```text
//! kafka-types (this crate):
//!   - Defines: ProtoFieldValue, ProtoMessage, ProtoType, ProtoSchema, etc.
//!
//! transit-kafka (consumer crate):
//!   - Uses: ProtoSchema to drive ProtoDecoder
//!   - Provides: ProtoParser, ProtoDecoder, schema registry decoding
//! ```

use crate::error::{KafkaTypesError, Result};
use std::collections::HashMap;

/// Represents a field value in a decoded protobuf message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtoFieldValue {
    Double(f64),
    Float(f32),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Message(Box<ProtoMessage>),
    Repeated(Vec<ProtoFieldValue>),
    Null,
}

impl ProtoFieldValue {
    /// Get the type descriptor for this field value.
    pub fn proto_field_type(&self) -> ProtoType {
        match self {
            ProtoFieldValue::Double(_) => ProtoType::Double,
            ProtoFieldValue::Float(_) => ProtoType::Float,
            ProtoFieldValue::Int32(_) => ProtoType::Int32,
            ProtoFieldValue::Int64(_) => ProtoType::Int64,
            ProtoFieldValue::Uint32(_) => ProtoType::Uint32,
            ProtoFieldValue::Uint64(_) => ProtoType::Uint64,
            ProtoFieldValue::Bool(_) => ProtoType::Bool,
            ProtoFieldValue::String(_) => ProtoType::String,
            ProtoFieldValue::Bytes(_) => ProtoType::Bytes,
            ProtoFieldValue::Message(msg) => ProtoType::Message(msg.message_type.clone()),
            ProtoFieldValue::Repeated(_) => ProtoType::Repeated(Box::new(ProtoType::Null)),
            ProtoFieldValue::Null => ProtoType::Null,
        }
    }
}

/// Represents a decoded protobuf message.
///
/// Contains the message type name, decoded fields, and the schema descriptor
/// for field introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoMessage {
    /// Message type name (e.g., "mypackage.MyMessage")
    pub message_type: String,
    /// Decoded field values by field name
    pub fields: HashMap<String, ProtoFieldValue>,
    /// Schema reference for field introspection
    pub descriptor: ProtoMessageDescriptor,
}

impl ProtoMessage {
    /// Get a raw field value by name.
    pub fn get_field(&self, name: &str) -> Option<&ProtoFieldValue> {
        self.fields.get(name)
    }

    /// Read a string field. Absent proto3 scalars read as `""`.
    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.scalar(name)? {
            Some(ProtoFieldValue::String(s)) => Ok(s.clone()),
            Some(other) => Err(self.type_error(name, "string", other)),
            None => Ok(String::new()),
        }
    }

    /// Read a floating point field (`double` or `float`). Absent reads as `0.0`.
    pub fn get_double(&self, name: &str) -> Result<f64> {
        match self.scalar(name)? {
            Some(ProtoFieldValue::Double(v)) => Ok(*v),
            Some(ProtoFieldValue::Float(v)) => Ok(f64::from(*v)),
            Some(other) => Err(self.type_error(name, "double", other)),
            None => Ok(0.0),
        }
    }

    /// Read any signed or unsigned 32/64-bit integer field as `i64`.
    pub fn get_int64(&self, name: &str) -> Result<i64> {
        match self.scalar(name)? {
            Some(ProtoFieldValue::Int64(v)) => Ok(*v),
            Some(ProtoFieldValue::Int32(v)) => Ok(i64::from(*v)),
            Some(ProtoFieldValue::Uint32(v)) => Ok(i64::from(*v)),
            Some(ProtoFieldValue::Uint64(v)) => i64::try_from(*v).map_err(|_| {
                KafkaTypesError::TypeConversion(format!("uint64 field '{name}' exceeds i64"))
            }),
            Some(other) => Err(self.type_error(name, "int64", other)),
            None => Ok(0),
        }
    }

    /// Read a bool field. Absent reads as `false`.
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.scalar(name)? {
            Some(ProtoFieldValue::Bool(v)) => Ok(*v),
            Some(other) => Err(self.type_error(name, "bool", other)),
            None => Ok(false),
        }
    }

    // Present value, or None when the schema declares the field but the
    // wire omitted it (proto3 default). Unknown names are an error.
    fn scalar(&self, name: &str) -> Result<Option<&ProtoFieldValue>> {
        match self.fields.get(name) {
            Some(v) => Ok(Some(v)),
            None if self.descriptor.fields.contains_key(name) => Ok(None),
            None => Err(KafkaTypesError::MissingField(format!(
                "{}.{name}",
                self.message_type
            ))),
        }
    }

    fn type_error(&self, name: &str, expected: &str, actual: &ProtoFieldValue) -> KafkaTypesError {
        KafkaTypesError::FieldType {
            field: name.to_string(),
            expected: expected.to_string(),
            actual: actual.proto_field_type().to_string(),
        }
    }
}

/// Protobuf field type enumeration.
///
/// Represents all possible protobuf scalar and composite types.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtoType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
    Message(String),
    Enum(String),
    Repeated(Box<ProtoType>),
    Optional(Box<ProtoType>),
    Null,
}

impl std::fmt::Display for ProtoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

impl ProtoType {
    /// Get the human-readable type name.
    pub fn type_name(&self) -> String {
        match self {
            ProtoType::Double => "double".to_string(),
            ProtoType::Float => "float".to_string(),
            ProtoType::Int32 => "int32".to_string(),
            ProtoType::Int64 => "int64".to_string(),
            ProtoType::Uint32 => "uint32".to_string(),
            ProtoType::Uint64 => "uint64".to_string(),
            ProtoType::Sint32 => "sint32".to_string(),
            ProtoType::Sint64 => "sint64".to_string(),
            ProtoType::Fixed32 => "fixed32".to_string(),
            ProtoType::Fixed64 => "fixed64".to_string(),
            ProtoType::Sfixed32 => "sfixed32".to_string(),
            ProtoType::Sfixed64 => "sfixed64".to_string(),
            ProtoType::Bool => "bool".to_string(),
            ProtoType::String => "string".to_string(),
            ProtoType::Bytes => "bytes".to_string(),
            ProtoType::Message(name) => format!("message:{name}"),
            ProtoType::Enum(name) => format!("enum:{name}"),
            ProtoType::Repeated(inner) => format!("repeated<{}>", inner.type_name()),
            ProtoType::Optional(inner) => format!("optional<{}>", inner.type_name()),
            ProtoType::Null => "null".to_string(),
        }
    }
}

/// Describes a single field in a protobuf message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoFieldDescriptor {
    /// Field name
    pub name: String,
    /// Field number (tag)
    pub number: i32,
    /// Field type
    pub field_type: ProtoType,
    /// Whether the field is repeated
    pub is_repeated: bool,
    /// Whether the field is optional
    pub is_optional: bool,
}

/// Describes a protobuf message type (schema).
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoMessageDescriptor {
    /// Fully qualified message name (e.g., "mypackage.MyMessage")
    pub name: String,
    /// Map of field names to their descriptors
    pub fields: HashMap<String, ProtoFieldDescriptor>,
    /// Ordered list of field names (preserves proto definition order)
    pub field_order: Vec<String>,
}

impl ProtoMessageDescriptor {
    /// Get a field descriptor by name.
    pub fn get_field(&self, name: &str) -> Option<&ProtoFieldDescriptor> {
        self.fields.get(name)
    }

    /// Find a field descriptor by its wire number.
    pub fn field_by_number(&self, number: i32) -> Option<&ProtoFieldDescriptor> {
        self.fields.values().find(|f| f.number == number)
    }

    /// List all field names in definition order.
    pub fn list_fields(&self) -> &[String] {
        &self.field_order
    }
}

/// Represents a parsed protobuf schema containing multiple message types.
#[derive(Debug, Clone, Default)]
pub struct ProtoSchema {
    /// Map of simple message type names to their descriptors
    pub messages: HashMap<String, ProtoMessageDescriptor>,
    /// Top-level message names in declaration order.
    ///
    /// Schema-registry framed payloads reference message types by their
    /// index in this list.
    pub message_order: Vec<String>,
}

impl ProtoSchema {
    /// Get a message descriptor by name.
    pub fn get_message(&self, name: &str) -> Option<&ProtoMessageDescriptor> {
        self.messages.get(name)
    }

    /// Get the message descriptor declared at `index` among top-level messages.
    pub fn message_at(&self, index: usize) -> Option<&ProtoMessageDescriptor> {
        self.message_order
            .get(index)
            .and_then(|name| self.messages.get(name))
    }

    /// List all message type names in the schema.
    pub fn list_messages(&self) -> Vec<String> {
        self.messages.keys().cloned().collect()
    }
}
