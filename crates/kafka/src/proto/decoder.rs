//! Protobuf decoder implementation.
//!
//! This module provides the runtime protobuf decoder that uses the schema
//! from the parser module and produces ProtoMessage/ProtoFieldValue from
//! kafka-types.

use crate::error::{Error, Result};
use kafka_types::{
    ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoMessageDescriptor, ProtoSchema,
    ProtoType,
};
use protobuf::CodedInputStream;
use std::collections::HashMap;

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LENGTH_DELIMITED: u32 = 2;
const WIRE_FIXED32: u32 = 5;

/// Nesting depth at which decoding gives up, matching protobuf's own default.
pub const RECURSION_LIMIT: usize = 100;

fn decode_err(e: protobuf::Error) -> Error {
    Error::ProtobufDecode(e.to_string())
}

/// Runtime protobuf decoder.
///
/// Decodes binary protobuf data into ProtoMessage using a parsed schema.
#[derive(Debug, Clone)]
pub struct ProtoDecoder {
    schema: ProtoSchema,
}

impl ProtoDecoder {
    /// Create a new decoder from a schema.
    pub fn new(schema: ProtoSchema) -> Self {
        Self { schema }
    }

    /// Get a reference to the schema.
    pub fn schema(&self) -> &ProtoSchema {
        &self.schema
    }

    /// Decode a protobuf message from bytes.
    pub fn decode(&self, message_type: &str, data: &[u8]) -> Result<ProtoMessage> {
        let descriptor = self
            .schema
            .get_message(message_type)
            .ok_or_else(|| Error::MessageTypeNotFound(message_type.to_string()))?;
        let mut stream = CodedInputStream::from_bytes(data);
        self.decode_message(descriptor, &mut stream, 0)
    }

    /// Decode a message selected by a schema-registry message-index path.
    ///
    /// Only top-level messages are indexed; an empty path selects the first.
    pub fn decode_indexed(&self, indexes: &[i32], data: &[u8]) -> Result<ProtoMessage> {
        let index = match indexes {
            [] => 0,
            [i] if *i >= 0 => *i as usize,
            _ => {
                return Err(Error::MessageTypeNotFound(format!(
                    "message index path {indexes:?}"
                )))
            }
        };
        let descriptor = self
            .schema
            .message_at(index)
            .ok_or_else(|| Error::MessageTypeNotFound(format!("message index {index}")))?;
        let mut stream = CodedInputStream::from_bytes(data);
        self.decode_message(descriptor, &mut stream, 0)
    }

    fn decode_message(
        &self,
        descriptor: &ProtoMessageDescriptor,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<ProtoMessage> {
        if depth > RECURSION_LIMIT {
            return Err(Error::ProtobufDecode(format!(
                "recursion limit exceeded in {}",
                descriptor.name
            )));
        }
        let mut fields = HashMap::new();

        loop {
            if stream.eof().map_err(decode_err)? {
                break;
            }

            let tag = stream.read_raw_varint32().map_err(decode_err)?;
            if tag == 0 {
                break;
            }

            let field_number = (tag >> 3) as i32;
            let wire_type = tag & 0x7;

            // Unknown fields come from newer writers; skip them.
            let Some(field_desc) = descriptor.field_by_number(field_number) else {
                Self::skip_field(wire_type, stream)?;
                continue;
            };

            if field_desc.is_repeated {
                let existing = fields
                    .entry(field_desc.name.clone())
                    .or_insert_with(|| ProtoFieldValue::Repeated(Vec::new()));

                if let ProtoFieldValue::Repeated(values) = existing {
                    if wire_type == WIRE_LENGTH_DELIMITED && Self::is_packable(&field_desc.field_type)
                    {
                        let len = stream.read_raw_varint32().map_err(decode_err)?;
                        let old_limit = stream.push_limit(len as u64).map_err(decode_err)?;
                        while !stream.eof().map_err(decode_err)? {
                            values.push(self.decode_field_value(field_desc, stream, depth)?);
                        }
                        stream.pop_limit(old_limit);
                    } else {
                        values.push(self.decode_field_value(field_desc, stream, depth)?);
                    }
                }
                continue;
            }

            let value = self.decode_field_value(field_desc, stream, depth)?;
            fields.insert(field_desc.name.clone(), value);
        }

        Ok(ProtoMessage {
            message_type: descriptor.name.clone(),
            fields,
            descriptor: descriptor.clone(),
        })
    }

    fn decode_field_value(
        &self,
        field_desc: &ProtoFieldDescriptor,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<ProtoFieldValue> {
        Ok(match &field_desc.field_type {
            ProtoType::Double => ProtoFieldValue::Double(stream.read_double().map_err(decode_err)?),
            ProtoType::Float => ProtoFieldValue::Float(stream.read_float().map_err(decode_err)?),
            ProtoType::Int32 => ProtoFieldValue::Int32(stream.read_int32().map_err(decode_err)?),
            ProtoType::Sint32 => ProtoFieldValue::Int32(stream.read_sint32().map_err(decode_err)?),
            ProtoType::Sfixed32 => {
                ProtoFieldValue::Int32(stream.read_sfixed32().map_err(decode_err)?)
            }
            ProtoType::Int64 => ProtoFieldValue::Int64(stream.read_int64().map_err(decode_err)?),
            ProtoType::Sint64 => ProtoFieldValue::Int64(stream.read_sint64().map_err(decode_err)?),
            ProtoType::Sfixed64 => {
                ProtoFieldValue::Int64(stream.read_sfixed64().map_err(decode_err)?)
            }
            ProtoType::Uint32 => ProtoFieldValue::Uint32(stream.read_uint32().map_err(decode_err)?),
            ProtoType::Fixed32 => {
                ProtoFieldValue::Uint32(stream.read_fixed32().map_err(decode_err)?)
            }
            ProtoType::Uint64 => ProtoFieldValue::Uint64(stream.read_uint64().map_err(decode_err)?),
            ProtoType::Fixed64 => {
                ProtoFieldValue::Uint64(stream.read_fixed64().map_err(decode_err)?)
            }
            ProtoType::Bool => ProtoFieldValue::Bool(stream.read_bool().map_err(decode_err)?),
            ProtoType::String => ProtoFieldValue::String(stream.read_string().map_err(decode_err)?),
            ProtoType::Bytes => ProtoFieldValue::Bytes(stream.read_bytes().map_err(decode_err)?),
            ProtoType::Enum(_) => ProtoFieldValue::Int32(stream.read_int32().map_err(decode_err)?),
            ProtoType::Message(type_name) => {
                let len = stream.read_raw_varint32().map_err(decode_err)?;
                let old_limit = stream.push_limit(len as u64).map_err(decode_err)?;

                // Extract just the type name without package prefix
                let simple_type = type_name.split('.').next_back().unwrap_or(type_name);
                let nested_descriptor = self
                    .schema
                    .get_message(simple_type)
                    .ok_or_else(|| Error::MessageTypeNotFound(simple_type.to_string()))?;
                let nested_message = self.decode_message(nested_descriptor, stream, depth + 1)?;

                stream.pop_limit(old_limit);

                ProtoFieldValue::Message(Box::new(nested_message))
            }
            other => {
                return Err(Error::ProtobufDecode(format!(
                    "Unsupported field type: {other:?}"
                )))
            }
        })
    }

    fn is_packable(field_type: &ProtoType) -> bool {
        !matches!(
            field_type,
            ProtoType::String | ProtoType::Bytes | ProtoType::Message(_)
        )
    }

    fn skip_field(wire_type: u32, stream: &mut CodedInputStream) -> Result<()> {
        match wire_type {
            WIRE_VARINT => {
                stream.read_raw_varint64().map_err(decode_err)?;
            }
            WIRE_FIXED64 => {
                stream.read_raw_little_endian64().map_err(decode_err)?;
            }
            WIRE_LENGTH_DELIMITED => {
                let len = stream.read_raw_varint32().map_err(decode_err)?;
                stream.read_raw_bytes(len).map_err(decode_err)?;
            }
            WIRE_FIXED32 => {
                stream.read_raw_little_endian32().map_err(decode_err)?;
            }
            other => {
                return Err(Error::ProtobufDecode(format!(
                    "Unsupported wire type {other}"
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ProtoParser;

    const WEATHER_PROTO: &str = r#"
        syntax = "proto3";
        package org.chicago.cta.weather.v1;

        message Station {
            string station_id = 1;
        }

        message Weather {
            double temperature = 1;
            string status = 2;
            repeated int32 readings = 3;
            Station station = 4;
        }
    "#;

    fn decoder() -> ProtoDecoder {
        ProtoDecoder::new(ProtoParser::parse_str(WEATHER_PROTO).expect("parse"))
    }

    // temperature = 78.5 (field 1, fixed64), status = "cloudy" (field 2)
    fn weather_bytes() -> Vec<u8> {
        let mut buf = vec![0x09];
        buf.extend_from_slice(&78.5f64.to_le_bytes());
        buf.extend_from_slice(&[0x12, 6]);
        buf.extend_from_slice(b"cloudy");
        buf
    }

    #[test]
    fn test_decode_by_name() {
        let msg = decoder().decode("Weather", &weather_bytes()).unwrap();
        assert_eq!(msg.message_type, "org.chicago.cta.weather.v1.Weather");
        assert_eq!(msg.get_double("temperature").unwrap(), 78.5);
        assert_eq!(msg.get_string("status").unwrap(), "cloudy");
    }

    #[test]
    fn test_decode_indexed_selects_declared_message() {
        let msg = decoder().decode_indexed(&[1], &weather_bytes()).unwrap();
        assert_eq!(msg.get_string("status").unwrap(), "cloudy");

        let station = decoder()
            .decode_indexed(&[], &[0x0a, 3, b'4', b'0', b'0'])
            .unwrap();
        assert_eq!(station.get_string("station_id").unwrap(), "400");
    }

    #[test]
    fn test_decode_packed_repeated_and_nested() {
        let mut buf = vec![0x1a, 3, 1, 2, 3];
        buf.extend_from_slice(&[0x22, 5, 0x0a, 3, b'4', b'0', b'1']);

        let msg = decoder().decode("Weather", &buf).unwrap();
        assert_eq!(
            msg.get_field("readings"),
            Some(&ProtoFieldValue::Repeated(vec![
                ProtoFieldValue::Int32(1),
                ProtoFieldValue::Int32(2),
                ProtoFieldValue::Int32(3),
            ]))
        );
        match msg.get_field("station") {
            Some(ProtoFieldValue::Message(station)) => {
                assert_eq!(station.get_string("station_id").unwrap(), "401")
            }
            other => panic!("expected nested station, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut buf = vec![0x78, 0x2a]; // field 15, varint 42
        buf.extend_from_slice(&weather_bytes());
        let msg = decoder().decode("Weather", &buf).unwrap();
        assert_eq!(msg.get_string("status").unwrap(), "cloudy");
    }

    #[test]
    fn test_truncated_payload_is_decode_error() {
        let buf = weather_bytes();
        let result = decoder().decode("Weather", &buf[..buf.len() - 2]);
        assert!(matches!(result, Err(Error::ProtobufDecode(_))));
    }

    // Each level is `0a <len>` wrapping the level below.
    fn nested_node_bytes(levels: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        for _ in 0..levels {
            let mut outer = vec![0x0a];
            let mut len = buf.len();
            while len >= 0x80 {
                outer.push((len as u8 & 0x7f) | 0x80);
                len >>= 7;
            }
            outer.push(len as u8);
            outer.extend_from_slice(&buf);
            buf = outer;
        }
        buf
    }

    #[test]
    fn test_deeply_nested_payload_is_decode_error() {
        let schema = ProtoParser::parse_str(
            r#"
            syntax = "proto3";
            message Node {
                Node child = 1;
            }
            "#,
        )
        .expect("parse");
        let decoder = ProtoDecoder::new(schema);

        let shallow = decoder.decode_indexed(&[], &nested_node_bytes(RECURSION_LIMIT));
        assert!(shallow.is_ok());

        let result = decoder.decode_indexed(&[], &nested_node_bytes(20_000));
        match result {
            Err(Error::ProtobufDecode(reason)) => assert!(reason.contains("recursion limit")),
            other => panic!("expected recursion limit error, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_index() {
        let result = decoder().decode_indexed(&[7], &weather_bytes());
        assert!(matches!(result, Err(Error::MessageTypeNotFound(_))));
        let nested = decoder().decode_indexed(&[1, 0], &weather_bytes());
        assert!(matches!(nested, Err(Error::MessageTypeNotFound(_))));
    }
}
