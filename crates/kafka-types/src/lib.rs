//! Shared types for the transit-consumers Kafka consumption core.
//!
//! This crate holds the value types that flow between the broker client,
//! the record decoders and the message handlers. It has no dependency on a
//! concrete broker transport.
//!
//! # Modules
//!
//! - [`record`] - raw and decoded records, and their payload variants
//! - [`assignment`] - partition assignments handed out at rebalance time
//! - [`proto`] - runtime protobuf schema and message representation
//! - [`json`] - protobuf → JSON rendering for schema-coded payloads
//! - [`error`] - error types for payload access
//!
//! ```text
//! broker ─▶ RawRecord ─▶ decoder ─▶ Record { payload: Payload } ─▶ handler
//! ```

pub mod assignment;
pub mod error;
pub mod json;
pub mod proto;
pub mod record;

pub use assignment::{PartitionAssignment, PartitionOffset, TopicPartition};
pub use error::{KafkaTypesError, Result};
pub use json::{proto_message_to_json, proto_to_json};
pub use proto::{
    ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoMessageDescriptor, ProtoSchema,
    ProtoType,
};
pub use record::{Payload, RawRecord, Record};
