//! Kafka record types.
//!
//! [`RawRecord`] is what a broker client hands back from a poll; [`Record`]
//! is the same record after a decoder has turned its bytes into a
//! [`Payload`]. Both carry the Kafka metadata (topic, partition, offset, key,
//! timestamp) so handlers can log or route on it.

use crate::error::Result;
use crate::json::proto_message_to_json;
use crate::proto::ProtoMessage;
use serde::de::DeserializeOwned;

/// A record as delivered by the broker, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Kafka offset within the partition
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Message value (tombstones carry none)
    pub payload: Option<Vec<u8>>,
    /// Message timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

impl RawRecord {
    /// Convenience constructor used by broker clients and tests.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: Some(payload),
            timestamp: None,
        }
    }

    /// Attach a [`Payload`] to this record's metadata.
    pub fn into_record(self, payload: Payload) -> Record {
        Record {
            payload,
            topic: self.topic,
            partition: self.partition,
            offset: self.offset,
            key: self.key,
            timestamp: self.timestamp,
        }
    }
}

/// A decoded Kafka record with metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Decoded message payload
    pub payload: Payload,
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Kafka offset within the partition
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Message timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

/// Message payload variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Undecoded bytes, passed through as delivered by the broker
    Raw(Vec<u8>),
    /// JSON document decoded against a JSON schema
    Json(serde_json::Value),
    /// Protobuf message decoded against a protobuf schema
    Protobuf(ProtoMessage),
}

impl Payload {
    /// View the payload as a JSON value.
    ///
    /// Raw payloads are parsed as JSON text; protobuf payloads are rendered
    /// with proto3 defaults filled in.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        match self {
            Payload::Raw(bytes) => Ok(serde_json::from_slice(bytes)?),
            Payload::Json(value) => Ok(value.clone()),
            Payload::Protobuf(msg) => proto_message_to_json(msg),
        }
    }

    /// Deserialize the payload into a typed value via its JSON view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Payload::Raw(bytes) => Ok(serde_json::from_slice(bytes)?),
            other => Ok(serde_json::from_value(other.to_json()?)?),
        }
    }

    /// Raw bytes, if this payload was passed through undecoded.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}
