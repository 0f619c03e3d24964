//! Kafka consumption core for `transit-consumers`.
//!
//! Each [`Consumer`] owns one subscription and runs a two-state loop: it
//! keeps polling while polls make progress and sleeps for the subscription's
//! idle interval after an empty poll. Records are decoded either as raw
//! bytes or through a schema registry, then handed to a [`MessageHandler`].
//!
//! Features:
//!
//! - Offset policy applied to whole partition assignments at rebalance time
//! - Schema-registry decoding (protobuf and JSON schemas) with a shared,
//!   write-once schema cache
//! - Runtime Protobuf Support: `.proto` schemas are parsed at runtime, no code generation
//! - Bad records, decode failures and handler failures are logged and skipped
//! - Cooperative shutdown from any task; the broker client is closed exactly once

/// Partition assignment strategy applying the offset policy.
pub mod assignment;

/// Broker capability and its rdkafka implementation.
pub mod broker;

/// High-level API for spawning consumer tasks
///
/// Holds the broker config, schema registry and schema cache shared by the
/// consumers it creates.
pub mod client;
pub mod config;

/// The consumption loop and its task handle.
pub mod consumer;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod poll;
pub mod proto;
pub mod registry;
pub mod testing;

// Re-export main types for easy access
pub use broker::{BrokerClient, BrokerError, KafkaBroker};
pub use client::Client;
pub use config::{ConsumerConfig, DecoderKind, OffsetPolicy, Subscription, SubscriptionOpts};
pub use consumer::{Consumer, ConsumerHandle, ConsumerStats, LoopState, ShutdownSignal};
pub use decoder::{DecodeCause, DecodeError, RawDecoder, RecordDecoder, SchemaRegistryDecoder};
pub use dispatch::{Dispatcher, HandlerError, MessageHandler};
pub use error::{Error, Result};
pub use poll::{PollOutcome, PollingEngine};
pub use proto::{ProtoDecoder, ProtoParser};
pub use registry::{HttpSchemaRegistry, RegisteredSchema, SchemaCache, SchemaRegistry, SchemaType};

pub use kafka_types;
pub use kafka_types::{Payload, RawRecord, Record};
