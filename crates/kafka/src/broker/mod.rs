//! Broker client capability.
//!
//! The consumption core talks to the log service only through
//! [`BrokerClient`]. [`KafkaBroker`] implements it on top of rdkafka; tests
//! use the scripted double in [`crate::testing`].

mod kafka;

pub use kafka::{AssignmentContext, KafkaBroker};

use crate::assignment::OnAssign;
use async_trait::async_trait;
use kafka_types::{PartitionAssignment, RawRecord};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a broker client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// The broker could not be reached or the request failed in transit.
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker delivered a record flagged with an error
    /// (corrupt record, offset out of range, ...). `partition` is `None` when
    /// the client could not attribute the error to one partition.
    #[error("record error on {topic}{}: {reason}", partition_label(.partition))]
    Record {
        topic: String,
        partition: Option<i32>,
        reason: String,
    },

    /// The broker rejected the assignment produced by the assignment handler.
    #[error("assignment error: {0}")]
    Assignment(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("close error: {0}")]
    Close(String),
}

fn partition_label(partition: &Option<i32>) -> String {
    partition.map(|p| format!("[{p}]")).unwrap_or_default()
}

impl BrokerError {
    /// Fatal errors stop the consumer; everything else is absorbed by the
    /// polling engine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Assignment(_) | BrokerError::Subscribe(_))
    }
}

/// Capability interface over a publish/subscribe log.
#[async_trait]
pub trait BrokerClient: Send {
    /// Subscribe to a topic name or pattern. `on_assign` is invoked out of
    /// band whenever partitions are (re)assigned to this client.
    fn subscribe(&mut self, pattern: &str, on_assign: OnAssign) -> Result<(), BrokerError>;

    /// Wait at most `timeout` for the next record. `Ok(None)` means nothing
    /// arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<RawRecord>, BrokerError>;

    /// Apply an assignment as a whole.
    fn assign(&mut self, assignment: &PartitionAssignment) -> Result<(), BrokerError>;

    /// Release the client. Consumes it so it cannot be closed twice.
    fn close(self) -> Result<(), BrokerError>
    where
        Self: Sized;
}
