use crate::error::{Error, Result};
use kafka_types::{ProtoFieldDescriptor, ProtoMessageDescriptor, ProtoSchema, ProtoType};
use protobuf::descriptor::field_descriptor_proto::{Label, Type};
use protobuf::descriptor::{FieldDescriptorProto, FileDescriptorProto};
use protobuf_parse::Parser;
use std::collections::HashMap;
use std::path::Path;

/// Runtime `.proto` parser.
///
/// Turns `.proto` source into a [`ProtoSchema`] without code generation, so
/// schemas fetched from a registry at runtime can drive the decoder.
pub struct ProtoParser;

impl ProtoParser {
    /// Parse a .proto file and create a schema
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ProtoSchema> {
        let p = path.as_ref();

        let mut parser = Parser::new();
        parser.pure();
        parser.input(p);

        if let Some(parent) = p.parent() {
            parser.include(parent);
        }

        let parsed = parser
            .parse_and_typecheck()
            .map_err(|e| Error::ProtobufParse(e.to_string()))?;

        // Dependencies (e.g. google/protobuf/timestamp.proto) come back too;
        // only the messages of the input file are addressable by index.
        let file_name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut schema = ProtoSchema::default();
        for file_descriptor in &parsed.file_descriptors {
            let is_input = file_descriptor
                .name
                .as_deref()
                .map(|n| n.ends_with(&file_name))
                .unwrap_or(false);
            Self::collect_messages(file_descriptor, is_input, &mut schema)?;
        }

        Ok(schema)
    }

    /// Parse a .proto file content from string
    pub fn parse_str(content: &str) -> Result<ProtoSchema> {
        use std::io::Write;
        use tempfile::Builder;

        let mut temp_file = Builder::new()
            .suffix(".proto")
            .tempfile()
            .map_err(|e| Error::ProtobufParse(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| Error::ProtobufParse(format!("Failed to write temp file: {e}")))?;

        Self::parse_file(temp_file.path())
    }

    fn collect_messages(
        file_descriptor: &FileDescriptorProto,
        is_input: bool,
        schema: &mut ProtoSchema,
    ) -> Result<()> {
        for message in &file_descriptor.message_type {
            let mut fields = HashMap::new();
            let mut field_order = Vec::new();

            for field in &message.field {
                let field_name = field.name.clone().unwrap_or_default();
                if field_name.is_empty() {
                    continue;
                }
                field_order.push(field_name.clone());

                let descriptor = ProtoFieldDescriptor {
                    name: field_name.clone(),
                    number: field.number.unwrap_or(0),
                    field_type: Self::parse_field_type(field)?,
                    is_repeated: field.label == Some(Label::LABEL_REPEATED.into()),
                    is_optional: field.label == Some(Label::LABEL_OPTIONAL.into()),
                };

                fields.insert(field_name, descriptor);
            }

            let simple_name = message.name.clone().unwrap_or_default();
            let full_name = match file_descriptor.package {
                Some(ref package) if !package.is_empty() => format!("{package}.{simple_name}"),
                _ => simple_name.clone(),
            };

            if is_input {
                schema.message_order.push(simple_name.clone());
            }
            schema.messages.insert(
                simple_name,
                ProtoMessageDescriptor {
                    name: full_name,
                    fields,
                    field_order,
                },
            );
        }
        Ok(())
    }

    fn parse_field_type(field: &FieldDescriptorProto) -> Result<ProtoType> {
        let field_type = field
            .type_
            .ok_or_else(|| Error::ProtobufParse("Field missing type".to_string()))?
            .enum_value_or_default();

        Ok(match field_type {
            Type::TYPE_DOUBLE => ProtoType::Double,
            Type::TYPE_FLOAT => ProtoType::Float,
            Type::TYPE_INT64 => ProtoType::Int64,
            Type::TYPE_UINT64 => ProtoType::Uint64,
            Type::TYPE_INT32 => ProtoType::Int32,
            Type::TYPE_FIXED64 => ProtoType::Fixed64,
            Type::TYPE_FIXED32 => ProtoType::Fixed32,
            Type::TYPE_BOOL => ProtoType::Bool,
            Type::TYPE_STRING => ProtoType::String,
            Type::TYPE_MESSAGE => ProtoType::Message(field.type_name.clone().unwrap_or_default()),
            Type::TYPE_BYTES => ProtoType::Bytes,
            Type::TYPE_UINT32 => ProtoType::Uint32,
            Type::TYPE_ENUM => ProtoType::Enum(field.type_name.clone().unwrap_or_default()),
            Type::TYPE_SFIXED32 => ProtoType::Sfixed32,
            Type::TYPE_SFIXED64 => ProtoType::Sfixed64,
            Type::TYPE_SINT32 => ProtoType::Sint32,
            Type::TYPE_SINT64 => ProtoType::Sint64,
            Type::TYPE_GROUP => {
                return Err(Error::ProtobufParse(
                    "TYPE_GROUP is Proto2 syntax only and deprecated hence not supported"
                        .to_string(),
                ))
            }
        })
    }
}
