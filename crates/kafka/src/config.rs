//! Consumer configuration.
//!
//! [`ConsumerConfig`] carries the broker-level properties shared by every
//! consumer in a process. [`SubscriptionOpts`] is the per-topic surface as it
//! arrives from flags or a config file; it is validated into an immutable
//! [`Subscription`] before a consumer is built.

use crate::error::{Error, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker connection settings.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list)
    #[arg(long, env = "KAFKA_BROKERS", default_value = "PLAINTEXT://localhost:9092")]
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Consumer group ID
    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "0")]
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Schema registry base URL
    #[arg(long, env = "SCHEMA_REGISTRY_URL", default_value = "http://localhost:8081")]
    #[serde(default = "default_schema_registry_url")]
    pub schema_registry_url: String,

    /// Session timeout in milliseconds
    #[arg(long, default_value = "6000")]
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: String,

    /// Let the broker client commit offsets in the background.
    ///
    /// Offset commits are owned by the broker client; the consumption loop
    /// never commits on its own.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    #[serde(default = "default_enable_auto_commit")]
    pub enable_auto_commit: bool,
}

fn default_brokers() -> String {
    "PLAINTEXT://localhost:9092".to_string()
}

fn default_group_id() -> String {
    "0".to_string()
}

fn default_schema_registry_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_session_timeout_ms() -> String {
    "6000".to_string()
}

fn default_enable_auto_commit() -> bool {
    true
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            group_id: default_group_id(),
            schema_registry_url: default_schema_registry_url(),
            session_timeout_ms: default_session_timeout_ms(),
            enable_auto_commit: default_enable_auto_commit(),
        }
    }
}

/// Per-topic consumer options.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
pub struct SubscriptionOpts {
    /// Topic name or pattern (patterns start with `^`)
    #[arg(long)]
    pub topic_pattern: String,

    /// Start newly assigned partitions from the earliest available offset
    #[arg(long)]
    #[serde(default)]
    pub offset_earliest: bool,

    /// Decode values through the schema registry instead of passing bytes through
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    #[serde(default = "default_is_schema_coded")]
    pub is_schema_coded: bool,

    /// Seconds to sleep once the topic is drained
    #[arg(long, default_value_t = 1.0)]
    #[serde(default = "default_secs")]
    pub idle_sleep_secs: f64,

    /// Seconds a single poll may wait for a record
    #[arg(long, default_value_t = 1.0)]
    #[serde(default = "default_secs")]
    pub poll_timeout_secs: f64,
}

fn default_is_schema_coded() -> bool {
    true
}

fn default_secs() -> f64 {
    1.0
}

impl SubscriptionOpts {
    pub fn new(topic_pattern: impl Into<String>) -> Self {
        Self {
            topic_pattern: topic_pattern.into(),
            offset_earliest: false,
            is_schema_coded: default_is_schema_coded(),
            idle_sleep_secs: default_secs(),
            poll_timeout_secs: default_secs(),
        }
    }
}

/// Where newly assigned partitions start reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetPolicy {
    Earliest,
    Latest,
}

impl OffsetPolicy {
    /// Value for the `auto.offset.reset` client property.
    pub fn as_reset_str(&self) -> &'static str {
        match self {
            OffsetPolicy::Earliest => "earliest",
            OffsetPolicy::Latest => "latest",
        }
    }
}

/// How record values are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    Raw,
    SchemaRegistry,
}

/// Immutable, validated per-consumer subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub topic_pattern: String,
    pub offset_policy: OffsetPolicy,
    pub decoder_kind: DecoderKind,
    pub poll_timeout: Duration,
    pub idle_sleep: Duration,
}

impl TryFrom<&SubscriptionOpts> for Subscription {
    type Error = Error;

    fn try_from(opts: &SubscriptionOpts) -> Result<Self> {
        if opts.topic_pattern.trim().is_empty() {
            return Err(Error::InvalidConfig("topic_pattern is empty".to_string()));
        }
        Ok(Self {
            topic_pattern: opts.topic_pattern.clone(),
            offset_policy: if opts.offset_earliest {
                OffsetPolicy::Earliest
            } else {
                OffsetPolicy::Latest
            },
            decoder_kind: if opts.is_schema_coded {
                DecoderKind::SchemaRegistry
            } else {
                DecoderKind::Raw
            },
            poll_timeout: positive_secs("poll_timeout_secs", opts.poll_timeout_secs)?,
            idle_sleep: positive_secs("idle_sleep_secs", opts.idle_sleep_secs)?,
        })
    }
}

impl TryFrom<SubscriptionOpts> for Subscription {
    type Error = Error;

    fn try_from(opts: SubscriptionOpts) -> Result<Self> {
        Subscription::try_from(&opts)
    }
}

fn positive_secs(name: &str, secs: f64) -> Result<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "{name} must be greater than zero, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::InvalidConfig(format!("{name} is out of range: {e}")))
}
