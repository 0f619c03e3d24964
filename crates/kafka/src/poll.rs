//! Single-poll step of the consumption loop.
//!
//! [`PollingEngine::poll_once`] folds every steady-state failure into a
//! [`PollOutcome`] so the loop only has to ask whether progress was made.
//! Fatal broker errors (a rejected assignment or subscription) are the only
//! ones returned as `Err`.

use crate::broker::{BrokerClient, BrokerError};
use crate::decoder::{DecodeError, RecordDecoder};
use kafka_types::Record;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Result of one bounded poll.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing arrived within the poll timeout.
    NoMessage,
    DecodedRecord(Record),
    /// The broker call failed or delivered a record flagged with an error.
    RecordError(BrokerError),
    DecodeError(DecodeError),
}

impl PollOutcome {
    /// Whether the loop should keep draining. Only [`PollOutcome::NoMessage`]
    /// counts as no progress.
    pub fn made_progress(&self) -> bool {
        !matches!(self, PollOutcome::NoMessage)
    }

    pub fn is_transport_fault(&self) -> bool {
        matches!(self, PollOutcome::RecordError(BrokerError::Transport(_)))
    }
}

/// Owns the broker client and decoder for one consumer.
pub struct PollingEngine<B> {
    broker: B,
    decoder: Arc<dyn RecordDecoder>,
    timeout: Duration,
    topic: String,
}

impl<B: BrokerClient> PollingEngine<B> {
    pub fn new(
        broker: B,
        decoder: Arc<dyn RecordDecoder>,
        timeout: Duration,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            decoder,
            timeout,
            topic: topic.into(),
        }
    }

    pub async fn poll_once(&mut self) -> Result<PollOutcome, BrokerError> {
        let raw = match self.broker.poll(self.timeout).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(topic = %self.topic, "no message");
                return Ok(PollOutcome::NoMessage);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e @ BrokerError::Record { .. }) => {
                error!(topic = %self.topic, error = %e, "Error while consuming message");
                return Ok(PollOutcome::RecordError(e));
            }
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Error while polling");
                return Ok(PollOutcome::RecordError(e));
            }
        };

        let (topic, partition, offset) = (raw.topic.clone(), raw.partition, raw.offset);
        match self.decoder.decode(raw).await {
            Ok(record) => {
                debug!(topic = %topic, partition, offset, "decoded record");
                Ok(PollOutcome::DecodedRecord(record))
            }
            Err(e) => {
                warn!(
                    topic = %topic,
                    partition,
                    offset,
                    cause = ?e.cause(),
                    error = %e,
                    "Failed to decode record, skipping"
                );
                Ok(PollOutcome::DecodeError(e))
            }
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn into_broker(self) -> B {
        self.broker
    }
}
