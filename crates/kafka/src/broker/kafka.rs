use super::{BrokerClient, BrokerError};
use crate::assignment::OnAssign;
use crate::config::{ConsumerConfig, OffsetPolicy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kafka_types::{PartitionAssignment, PartitionOffset, RawRecord, TopicPartition};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, RebalanceProtocol, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message as RdkafkaMessage};
use rdkafka::types::{RDKafkaErrorCode, RDKafkaRespErr};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info};

/// rdkafka context that routes partition assignments through an
/// [`OnAssign`] strategy.
///
/// The strategy revises the broker's proposal before anything is assigned,
/// so each rebalance issues exactly one assign call. The callback runs on
/// the client's polling path, where errors cannot be returned; a failure is
/// parked here and surfaced by the next [`KafkaBroker::poll`].
#[derive(Default)]
pub struct AssignmentContext {
    on_assign: Mutex<Option<OnAssign>>,
    failure: Mutex<Option<BrokerError>>,
}

impl AssignmentContext {
    fn set_strategy(&self, on_assign: OnAssign) {
        if let Ok(mut slot) = self.on_assign.lock() {
            *slot = Some(on_assign);
        }
    }

    fn record_failure(&self, err: BrokerError) {
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(err);
        }
    }

    fn take_failure(&self) -> Option<BrokerError> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }

    fn strategy(&self) -> Option<OnAssign> {
        self.on_assign.lock().ok().and_then(|slot| slot.clone())
    }

    /// The list to assign in place of `proposed`, or `None` to assign the
    /// proposal unchanged.
    fn revise(&self, proposed: &TopicPartitionList) -> KafkaResult<Option<TopicPartitionList>> {
        let Some(on_assign) = self.strategy() else {
            return Ok(None);
        };
        let current = from_topic_partition_list(proposed);
        let revised = on_assign(current.clone());
        if revised == current {
            return Ok(None);
        }
        to_topic_partition_list(&revised).map(Some)
    }

    fn assign_partitions(&self, consumer: &BaseConsumer<Self>, proposed: &TopicPartitionList) {
        let revised = match self.revise(proposed) {
            Ok(revised) => revised,
            Err(e) => {
                // The proposal is still assigned so the group stays balanced;
                // the consumer stops at its next poll.
                error!(error = %e, "Failed to build revised partition assignment");
                self.record_failure(BrokerError::Assignment(e.to_string()));
                None
            }
        };
        let tpl = revised.as_ref().unwrap_or(proposed);
        let result = if is_cooperative(consumer) {
            consumer.incremental_assign(tpl)
        } else {
            consumer.assign(tpl)
        };
        match result {
            Ok(()) => debug!(partitions = tpl.count(), "partitions assigned"),
            Err(e) => {
                error!(error = %e, "Failed to apply partition assignment");
                self.record_failure(BrokerError::Assignment(e.to_string()));
            }
        }
    }

    fn revoke_partitions(&self, consumer: &BaseConsumer<Self>, revoked: &TopicPartitionList) {
        let result = if is_cooperative(consumer) {
            consumer.incremental_unassign(revoked)
        } else {
            consumer.unassign()
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to revoke partitions");
        }
    }
}

fn is_cooperative(consumer: &BaseConsumer<AssignmentContext>) -> bool {
    matches!(consumer.rebalance_protocol(), RebalanceProtocol::Cooperative)
}

impl ClientContext for AssignmentContext {}

impl ConsumerContext for AssignmentContext {
    fn rebalance(
        &self,
        base_consumer: &BaseConsumer<Self>,
        err: RDKafkaRespErr,
        tpl: &mut TopicPartitionList,
    ) {
        match err {
            RDKafkaRespErr::RD_KAFKA_RESP_ERR__ASSIGN_PARTITIONS => {
                self.assign_partitions(base_consumer, tpl);
            }
            RDKafkaRespErr::RD_KAFKA_RESP_ERR__REVOKE_PARTITIONS => {
                debug!(partitions = tpl.count(), "partitions revoked");
                self.revoke_partitions(base_consumer, tpl);
            }
            other => {
                let code: RDKafkaErrorCode = other.into();
                error!(error = %code, "rebalance error");
                self.record_failure(BrokerError::Assignment(code.to_string()));
                self.revoke_partitions(base_consumer, tpl);
            }
        }
    }
}

/// [`BrokerClient`] backed by an rdkafka [`StreamConsumer`].
pub struct KafkaBroker {
    consumer: StreamConsumer<AssignmentContext>,
    pattern: String,
}

impl KafkaBroker {
    /// Create a new Kafka consumer client. Nothing is subscribed yet.
    pub fn new(config: &ConsumerConfig, policy: OffsetPolicy) -> Result<Self> {
        let consumer: StreamConsumer<AssignmentContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", config.enable_auto_commit.to_string())
            .set("auto.offset.reset", policy.as_reset_str())
            .set("session.timeout.ms", &config.session_timeout_ms)
            .set("enable.partition.eof", "false")
            .create_with_context(AssignmentContext::default())
            .map_err(Error::Kafka)?;

        Ok(Self {
            consumer,
            pattern: String::new(),
        })
    }

    /// Get the underlying consumer (for advanced use cases)
    pub fn inner(&self) -> &StreamConsumer<AssignmentContext> {
        &self.consumer
    }

    fn to_raw_record(msg: &BorrowedMessage<'_>) -> RawRecord {
        RawRecord {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            timestamp: msg.timestamp().to_millis(),
        }
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    fn subscribe(&mut self, pattern: &str, on_assign: OnAssign) -> std::result::Result<(), BrokerError> {
        self.consumer.context().set_strategy(on_assign);
        self.consumer
            .subscribe(&[pattern])
            .map_err(|e| BrokerError::Subscribe(format!("Failed to subscribe to {pattern}: {e}")))?;
        self.pattern = pattern.to_string();
        info!(topic = %pattern, "subscribed");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> std::result::Result<Option<RawRecord>, BrokerError> {
        if let Some(err) = self.consumer.context().take_failure() {
            return Err(err);
        }

        let received = tokio::time::timeout(timeout, self.consumer.recv()).await;

        // Rebalance callbacks run inside recv().
        if let Some(err) = self.consumer.context().take_failure() {
            return Err(err);
        }

        match received {
            Err(_) => Ok(None),
            Ok(Ok(msg)) => Ok(Some(Self::to_raw_record(&msg))),
            Ok(Err(e)) => Err(classify_recv_error(&self.pattern, e)),
        }
    }

    fn assign(&mut self, assignment: &PartitionAssignment) -> std::result::Result<(), BrokerError> {
        let tpl = to_topic_partition_list(assignment)
            .map_err(|e| BrokerError::Assignment(e.to_string()))?;
        self.consumer
            .assign(&tpl)
            .map_err(|e| BrokerError::Assignment(e.to_string()))
    }

    fn close(self) -> std::result::Result<(), BrokerError> {
        self.consumer.unsubscribe();
        info!(topic = %self.pattern, "consumer closed");
        // The native handle is destroyed when `self.consumer` drops here.
        Ok(())
    }
}

/// Consumption errors reported by librdkafka carry no partition, so the
/// record error names only the subscribed pattern.
fn classify_recv_error(pattern: &str, err: KafkaError) -> BrokerError {
    match err {
        KafkaError::MessageConsumption(code) => BrokerError::Record {
            topic: pattern.to_string(),
            partition: None,
            reason: code.to_string(),
        },
        other => BrokerError::Transport(other.to_string()),
    }
}

fn to_rdkafka_offset(offset: PartitionOffset) -> Offset {
    match offset {
        PartitionOffset::Beginning => Offset::Beginning,
        PartitionOffset::End => Offset::End,
        PartitionOffset::Stored => Offset::Stored,
        PartitionOffset::Invalid => Offset::Invalid,
        PartitionOffset::Offset(o) => Offset::Offset(o),
    }
}

fn from_rdkafka_offset(offset: Offset) -> PartitionOffset {
    match offset {
        Offset::Beginning => PartitionOffset::Beginning,
        Offset::End => PartitionOffset::End,
        Offset::Stored => PartitionOffset::Stored,
        Offset::Offset(o) => PartitionOffset::Offset(o),
        Offset::Invalid | Offset::OffsetTail(_) => PartitionOffset::Invalid,
    }
}

pub(crate) fn to_topic_partition_list(assignment: &PartitionAssignment) -> KafkaResult<TopicPartitionList> {
    let mut tpl = TopicPartitionList::with_capacity(assignment.len());
    for tp in assignment.iter() {
        tpl.add_partition_offset(&tp.topic, tp.partition, to_rdkafka_offset(tp.offset))?;
    }
    Ok(tpl)
}

pub(crate) fn from_topic_partition_list(tpl: &TopicPartitionList) -> PartitionAssignment {
    tpl.elements()
        .iter()
        .map(|elem| {
            TopicPartition::new(elem.topic(), elem.partition(), from_rdkafka_offset(elem.offset()))
        })
        .collect()
}
