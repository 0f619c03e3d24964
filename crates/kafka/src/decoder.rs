//! Record decoders.
//!
//! A [`RecordDecoder`] turns the bytes of a [`RawRecord`] into a typed
//! [`Payload`]. Two implementations exist, selected per subscription by
//! [`DecoderKind`]:
//!
//! - [`RawDecoder`] passes the bytes through untouched.
//! - [`SchemaRegistryDecoder`] reads the registry framing
//!   (`0x00`, 4-byte big-endian schema id, body), resolves the schema through
//!   a [`SchemaCache`] and decodes the body against it. Avro and JSON bodies
//!   become [`Payload::Json`]; protobuf bodies become [`Payload::Protobuf`].

use crate::config::DecoderKind;
use crate::registry::{CompiledSchema, RegistryError, SchemaCache, SchemaRegistry};
use async_trait::async_trait;
use kafka_types::{Payload, RawRecord, Record};
use protobuf::CodedInputStream;
use std::sync::Arc;
use thiserror::Error;

const MAGIC_BYTE: u8 = 0x00;
const HEADER_LEN: usize = 5;

/// Why a record could not be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("failed to fetch schema {schema_id}: {reason}")]
    SchemaFetchFailed { schema_id: u32, reason: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Coarse classification of a [`DecodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeCause {
    SchemaFetchFailed,
    MalformedPayload,
}

impl DecodeError {
    pub fn cause(&self) -> DecodeCause {
        match self {
            DecodeError::SchemaFetchFailed { .. } => DecodeCause::SchemaFetchFailed,
            DecodeError::MalformedPayload(_) => DecodeCause::MalformedPayload,
        }
    }

    fn fetch_failed(schema_id: u32, err: RegistryError) -> Self {
        DecodeError::SchemaFetchFailed {
            schema_id,
            reason: err.to_string(),
        }
    }
}

#[async_trait]
pub trait RecordDecoder: Send + Sync {
    async fn decode(&self, raw: RawRecord) -> Result<Record, DecodeError>;
}

/// Pass-through decoder. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

#[async_trait]
impl RecordDecoder for RawDecoder {
    async fn decode(&self, mut raw: RawRecord) -> Result<Record, DecodeError> {
        let bytes = raw.payload.take().unwrap_or_default();
        Ok(raw.into_record(Payload::Raw(bytes)))
    }
}

/// Decoder for values framed with a schema registry id.
#[derive(Clone)]
pub struct SchemaRegistryDecoder {
    registry: Arc<dyn SchemaRegistry>,
    cache: SchemaCache,
}

impl SchemaRegistryDecoder {
    pub fn new(registry: Arc<dyn SchemaRegistry>, cache: SchemaCache) -> Self {
        Self { registry, cache }
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    fn decode_body(schema: &CompiledSchema, body: &[u8]) -> Result<Payload, DecodeError> {
        match schema {
            CompiledSchema::Protobuf(decoder) => {
                let (indexes, consumed) = read_message_indexes(body)?;
                decoder
                    .decode_indexed(&indexes, &body[consumed..])
                    .map(Payload::Protobuf)
                    .map_err(|e| DecodeError::MalformedPayload(e.to_string()))
            }
            CompiledSchema::Json => serde_json::from_slice(body)
                .map(Payload::Json)
                .map_err(|e| DecodeError::MalformedPayload(format!("invalid JSON body: {e}"))),
            CompiledSchema::Avro(schema) => decode_avro(schema, body),
        }
    }
}

fn decode_avro(schema: &apache_avro::Schema, body: &[u8]) -> Result<Payload, DecodeError> {
    let mut reader = body;
    let value = apache_avro::from_avro_datum(schema, &mut reader, None)
        .map_err(|e| DecodeError::MalformedPayload(format!("invalid Avro body: {e}")))?;
    if !reader.is_empty() {
        return Err(DecodeError::MalformedPayload(format!(
            "{} trailing bytes after Avro datum",
            reader.len()
        )));
    }
    serde_json::Value::try_from(value)
        .map(Payload::Json)
        .map_err(|e| DecodeError::MalformedPayload(format!("Avro value has no JSON form: {e}")))
}

#[async_trait]
impl RecordDecoder for SchemaRegistryDecoder {
    async fn decode(&self, mut raw: RawRecord) -> Result<Record, DecodeError> {
        let value = raw
            .payload
            .take()
            .ok_or_else(|| DecodeError::MalformedPayload("record has no value".to_string()))?;
        let (schema_id, body) = split_frame(&value)?;

        let schema = self
            .cache
            .get_or_fetch(schema_id, self.registry.as_ref())
            .await
            .map_err(|e| DecodeError::fetch_failed(schema_id, e))?;

        let payload = Self::decode_body(&schema, body)?;
        Ok(raw.into_record(payload))
    }
}

/// Split a framed value into its schema id and body.
pub fn split_frame(value: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    if value.len() < HEADER_LEN {
        return Err(DecodeError::MalformedPayload(format!(
            "value is {} bytes, shorter than the {HEADER_LEN}-byte schema header",
            value.len()
        )));
    }
    if value[0] != MAGIC_BYTE {
        return Err(DecodeError::MalformedPayload(format!(
            "unknown magic byte {:#04x}",
            value[0]
        )));
    }
    let schema_id = u32::from_be_bytes([value[1], value[2], value[3], value[4]]);
    Ok((schema_id, &value[HEADER_LEN..]))
}

/// Read the protobuf message-index path that prefixes protobuf bodies.
///
/// Returns the path and the number of bytes it occupied. A count of zero is
/// shorthand for `[0]`.
fn read_message_indexes(body: &[u8]) -> Result<(Vec<i32>, usize), DecodeError> {
    let malformed = |e: protobuf::Error| {
        DecodeError::MalformedPayload(format!("invalid message index list: {e}"))
    };
    let mut stream = CodedInputStream::from_bytes(body);

    let count = stream.read_sint32().map_err(malformed)?;
    let indexes = match count {
        0 => vec![0],
        n if n < 0 => {
            return Err(DecodeError::MalformedPayload(format!(
                "negative message index count {n}"
            )))
        }
        n => (0..n)
            .map(|_| stream.read_sint32())
            .collect::<Result<Vec<_>, _>>()
            .map_err(malformed)?,
    };
    Ok((indexes, stream.pos() as usize))
}

/// Build the decoder for a subscription.
pub fn build_decoder(
    kind: DecoderKind,
    registry: Arc<dyn SchemaRegistry>,
    cache: SchemaCache,
) -> Arc<dyn RecordDecoder> {
    match kind {
        DecoderKind::Raw => Arc::new(RawDecoder),
        DecoderKind::SchemaRegistry => Arc::new(SchemaRegistryDecoder::new(registry, cache)),
    }
}
