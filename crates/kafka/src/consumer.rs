use crate::assignment::offset_reset_strategy;
use crate::broker::BrokerClient;
use crate::config::Subscription;
use crate::decoder::RecordDecoder;
use crate::dispatch::{Dispatcher, MessageHandler};
use crate::error::{Error, Result};
use crate::poll::{PollOutcome, PollingEngine};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consecutive transport faults after which the loop backs off as if the
/// topic were empty.
const TRANSPORT_FAULT_BACKOFF: u32 = 3;

/// State of the consumption loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Poll again immediately.
    Draining,
    /// Sleep for the subscription's idle interval before polling again.
    IdleWait,
}

impl LoopState {
    pub fn next(self, made_progress: bool) -> LoopState {
        if made_progress {
            LoopState::Draining
        } else {
            LoopState::IdleWait
        }
    }
}

/// Counters collected over a consumer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub polls: u64,
    pub records: u64,
    pub record_errors: u64,
    pub decode_errors: u64,
    pub handler_errors: u64,
    pub idle_waits: u64,
}

/// One subscription's consumption loop.
///
/// Owns the broker client for its whole life: `run` closes it on every exit
/// path, and `close` takes the client by value, so it is released exactly
/// once.
pub struct Consumer<B> {
    subscription: Subscription,
    engine: PollingEngine<B>,
    dispatcher: Dispatcher,
    subscribed: bool,
}

impl<B: BrokerClient + 'static> Consumer<B> {
    pub fn new(
        subscription: Subscription,
        broker: B,
        decoder: Arc<dyn RecordDecoder>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let engine = PollingEngine::new(
            broker,
            decoder,
            subscription.poll_timeout,
            subscription.topic_pattern.clone(),
        );
        Self {
            subscription,
            engine,
            dispatcher: Dispatcher::new(handler),
            subscribed: false,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Subscribe to the topic pattern, installing the offset policy as the
    /// assignment strategy. Called by `run` if not done explicitly.
    pub fn subscribe(&mut self) -> Result<()> {
        if self.subscribed {
            return Ok(());
        }
        let topic = &self.subscription.topic_pattern;
        let strategy = offset_reset_strategy(topic, self.subscription.offset_policy);
        self.engine.broker_mut().subscribe(topic, strategy)?;
        info!(topic = %topic, "consumer subscribed");
        self.subscribed = true;
        Ok(())
    }

    /// Run until `shutdown` turns true (or its sender is dropped), then close
    /// the broker client.
    ///
    /// Shutdown is observed between polls and during the idle sleep; a poll
    /// already in flight runs to completion. Fatal broker errors stop the
    /// loop and are returned after the client has been closed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<ConsumerStats> {
        let mut stats = ConsumerStats::default();
        let outcome = match self.subscribe() {
            Ok(()) => self.drive(&mut shutdown, &mut stats).await,
            Err(e) => Err(e),
        };

        let topic = self.subscription.topic_pattern.clone();
        let closed = self.engine.into_broker().close();

        match (outcome, closed) {
            (Ok(()), Ok(())) => {
                info!(topic = %topic, ?stats, "consumer closed");
                Ok(stats)
            }
            (Ok(()), Err(e)) => {
                error!(topic = %topic, error = %e, "Failed to close consumer");
                Err(e.into())
            }
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(topic = %topic, error = %close_err, "Failed to close consumer after error");
                }
                error!(topic = %topic, error = %e, "consumer stopped");
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut ConsumerStats,
    ) -> Result<()> {
        let mut state = LoopState::Draining;
        let mut transport_faults = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match state {
                LoopState::Draining => {
                    let outcome = self.engine.poll_once().await?;
                    stats.polls += 1;

                    transport_faults = if outcome.is_transport_fault() {
                        transport_faults + 1
                    } else {
                        0
                    };
                    let backoff = transport_faults >= TRANSPORT_FAULT_BACKOFF;
                    if backoff {
                        transport_faults = 0;
                    }

                    state = state.next(outcome.made_progress() && !backoff);
                    self.handle_outcome(outcome, stats);
                }
                LoopState::IdleWait => {
                    stats.idle_waits += 1;
                    debug!(
                        topic = %self.subscription.topic_pattern,
                        idle_sleep = ?self.subscription.idle_sleep,
                        "idle"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.subscription.idle_sleep) => {}
                        _ = shutdown_requested(shutdown) => return Ok(()),
                    }
                    state = LoopState::Draining;
                }
            }
        }
    }

    fn handle_outcome(&self, outcome: PollOutcome, stats: &mut ConsumerStats) {
        match outcome {
            PollOutcome::NoMessage => {}
            PollOutcome::DecodedRecord(record) => {
                stats.records += 1;
                if self.dispatcher.dispatch(record).is_err() {
                    stats.handler_errors += 1;
                }
            }
            PollOutcome::RecordError(_) => stats.record_errors += 1,
            PollOutcome::DecodeError(_) => stats.decode_errors += 1,
        }
    }

    /// Release the broker client without running the loop.
    pub fn close(self) -> Result<()> {
        self.engine.into_broker().close()?;
        info!(topic = %self.subscription.topic_pattern, "consumer closed before running");
        Ok(())
    }

    /// Run the consumer on its own task.
    pub fn spawn(self) -> ConsumerHandle {
        let (signal, shutdown) = ShutdownSignal::channel();
        let topic = self.subscription.topic_pattern.clone();
        let task = tokio::spawn(self.run(shutdown));
        ConsumerHandle {
            topic,
            signal,
            task,
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Cloneable trigger that asks a consumer to stop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn channel() -> (Self, watch::Receiver<bool>) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Handle to a consumer running on its own task.
pub struct ConsumerHandle {
    topic: String,
    signal: ShutdownSignal,
    task: JoinHandle<Result<ConsumerStats>>,
}

impl ConsumerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the consumer to stop and wait for it to release its broker client.
    pub async fn close(self) -> Result<ConsumerStats> {
        self.signal.trigger();
        self.task
            .await
            .map_err(|e| Error::Task(format!("consumer for {} failed: {e}", self.topic)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::config::{DecoderKind, OffsetPolicy};
    use crate::decoder::{RawDecoder, SchemaRegistryDecoder};
    use crate::registry::SchemaCache;
    use crate::testing::{frame, ScriptedBroker, StaticSchemaRegistry};
    use kafka_types::{PartitionAssignment, PartitionOffset, RawRecord, Record, TopicPartition};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    const IDLE: Duration = Duration::from_secs(1);

    fn subscription() -> Subscription {
        Subscription {
            topic_pattern: "org.chicago.cta.weather.v1".to_string(),
            offset_policy: OffsetPolicy::Latest,
            decoder_kind: DecoderKind::Raw,
            poll_timeout: Duration::from_millis(100),
            idle_sleep: IDLE,
        }
    }

    fn raw(offset: i64) -> RawRecord {
        RawRecord::new("org.chicago.cta.weather.v1", 0, offset, b"{}".to_vec())
    }

    fn counting_handler() -> (Arc<dyn MessageHandler>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let handler = move |_: &Record| -> anyhow::Result<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        (Arc::new(handler), calls)
    }

    #[test]
    fn test_loop_state_transitions() {
        assert_eq!(LoopState::Draining.next(true), LoopState::Draining);
        assert_eq!(LoopState::Draining.next(false), LoopState::IdleWait);
        assert_eq!(LoopState::IdleWait.next(true), LoopState::Draining);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_then_sleeps_once() {
        let broker = ScriptedBroker::new()
            .then_record(raw(0))
            .then_record(raw(1))
            .then_empty()
            .then_record(raw(2));
        let observer = broker.observer();
        let (handler, calls) = counting_handler();

        let start = Instant::now();
        let handle = Consumer::new(subscription(), broker, Arc::new(RawDecoder), handler).spawn();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let stats = handle.close().await.unwrap();

        let polls = observer.poll_instants();
        // Three immediate polls, then one sleep before the fourth.
        assert_eq!(polls[0], start);
        assert_eq!(polls[1], start);
        assert_eq!(polls[2], start);
        assert_eq!(polls[3] - polls[2], IDLE);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.records, 3);
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_polls_before_idle_sleep_elapses() {
        let broker = ScriptedBroker::new();
        let observer = broker.observer();
        let (handler, _) = counting_handler();

        let handle = Consumer::new(subscription(), broker, Arc::new(RawDecoder), handler).spawn();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let stats = handle.close().await.unwrap();

        let polls = observer.poll_instants();
        assert_eq!(polls.len(), 4);
        for pair in polls.windows(2) {
            assert_eq!(pair[1] - pair[0], IDLE);
        }
        assert_eq!(stats.idle_waits, 4);
        assert_eq!(stats.polls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_does_not_stop_loop() {
        let decoder = SchemaRegistryDecoder::new(Arc::new(StaticSchemaRegistry::new()), SchemaCache::new());
        let broker = ScriptedBroker::new()
            .then_record(RawRecord::new("weather", 0, 0, frame(404, b"{}")))
            .then_record(RawRecord::new("weather", 0, 1, vec![0x00]));
        let observer = broker.observer();
        let (handler, calls) = counting_handler();
        let sub = Subscription {
            decoder_kind: DecoderKind::SchemaRegistry,
            ..subscription()
        };

        let handle = Consumer::new(sub, broker, Arc::new(decoder), handler).spawn();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let stats = handle.close().await.unwrap();

        assert_eq!(stats.decode_errors, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // Both bad records, then the empty poll that led to the idle wait.
        assert_eq!(observer.poll_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_handler_does_not_stop_loop() {
        let broker = ScriptedBroker::new().then_record(raw(0)).then_record(raw(1));
        let observer = broker.observer();
        let handler = |r: &Record| -> anyhow::Result<()> {
            if r.offset == 0 {
                anyhow::bail!("cannot parse station");
            }
            panic!("handler bug");
        };

        let handle = Consumer::new(subscription(), broker, Arc::new(RawDecoder), Arc::new(handler)).spawn();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let stats = handle.close().await.unwrap();

        assert_eq!(stats.handler_errors, 2);
        assert_eq!(stats.records, 2);
        assert_eq!(observer.poll_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_errors_count_as_progress() {
        let broker = ScriptedBroker::new()
            .then_fault(BrokerError::Record {
                topic: "weather".to_string(),
                partition: Some(0),
                reason: "corrupt message".to_string(),
            })
            .then_fault(BrokerError::Transport("timed out".to_string()))
            .then_record(raw(3));
        let observer = broker.observer();
        let (handler, calls) = counting_handler();

        let start = Instant::now();
        let handle = Consumer::new(subscription(), broker, Arc::new(RawDecoder), handler).spawn();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let stats = handle.close().await.unwrap();

        assert_eq!(stats.record_errors, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(observer.poll_instants()[..4].iter().all(|t| *t == start));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_transport_faults_back_off() {
        let fault = || BrokerError::Transport("broker unreachable".to_string());
        let broker = ScriptedBroker::new()
            .then_fault(fault())
            .then_fault(fault())
            .then_fault(fault())
            .then_record(raw(0));
        let observer = broker.observer();
        let (handler, _) = counting_handler();

        let handle = Consumer::new(subscription(), broker, Arc::new(RawDecoder), handler).spawn();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.close().await.unwrap();

        let polls = observer.poll_instants();
        assert_eq!(polls[2], polls[0]);
        assert_eq!(polls[3] - polls[2], IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_policy_is_applied_on_assignment() {
        let proposal: PartitionAssignment = [100, 200, 300]
            .into_iter()
            .enumerate()
            .map(|(p, o)| TopicPartition::new("org.chicago.cta.weather.v1", p as i32, PartitionOffset::Offset(o)))
            .collect();
        let broker = ScriptedBroker::new().with_proposal(proposal);
        let observer = broker.observer();
        let (handler, _) = counting_handler();
        let sub = Subscription {
            offset_policy: OffsetPolicy::Earliest,
            ..subscription()
        };

        let handle = Consumer::new(sub, broker, Arc::new(RawDecoder), handler).spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.close().await.unwrap();

        let assignments = observer.assignments();
        assert_eq!(assignments.len(), 1);
        assert!(assignments[0].iter().all(|tp| tp.offset == PartitionOffset::Beginning));
        assert_eq!(assignments[0].len(), 3);
        assert_eq!(observer.subscribed().as_deref(), Some("org.chicago.cta.weather.v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_assignment_is_fatal_and_closes() {
        let proposal = PartitionAssignment::new(vec![TopicPartition::new("weather", 0, PartitionOffset::Invalid)]);
        let broker = ScriptedBroker::new()
            .with_proposal(proposal)
            .rejecting_assign("offset rewrite refused");
        let observer = broker.observer();
        let (handler, _) = counting_handler();
        let (_signal, shutdown) = ShutdownSignal::channel();

        let result = Consumer::new(subscription(), broker, Arc::new(RawDecoder), handler)
            .run(shutdown)
            .await;

        assert!(matches!(result, Err(Error::Broker(BrokerError::Assignment(_)))));
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_closes_broker() {
        let broker = ScriptedBroker::new().rejecting_subscribe("unknown topic");
        let observer = broker.observer();
        let (handler, _) = counting_handler();
        let (_signal, shutdown) = ShutdownSignal::channel();

        let result = Consumer::new(subscription(), broker, Arc::new(RawDecoder), handler)
            .run(shutdown)
            .await;

        assert!(matches!(result, Err(Error::Broker(BrokerError::Subscribe(_)))));
        assert_eq!(observer.poll_count(), 0);
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_lets_in_flight_poll_finish() {
        let broker = ScriptedBroker::new()
            .with_poll_delay(Duration::from_millis(100))
            .then_record(raw(0))
            .then_record(raw(1));
        let observer = broker.observer();
        let (handler, calls) = counting_handler();

        let handle = Consumer::new(subscription(), broker, Arc::new(RawDecoder), handler).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let signal = handle.shutdown_signal();
        signal.trigger();
        assert!(signal.is_triggered());
        let stats = handle.close().await.unwrap();

        // The first poll was in flight when close was requested; it completed
        // and was dispatched, and no further poll was issued.
        assert_eq!(observer.poll_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.polls, 1);
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_idle_sleep() {
        let broker = ScriptedBroker::new();
        let observer = broker.observer();
        let (handler, _) = counting_handler();
        let sub = Subscription {
            idle_sleep: Duration::from_secs(3600),
            ..subscription()
        };

        let start = Instant::now();
        let handle = Consumer::new(sub, broker, Arc::new(RawDecoder), handler).spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.close().await.unwrap();

        assert!(Instant::now() - start < Duration::from_secs(1));
        assert_eq!(observer.poll_count(), 1);
        assert_eq!(observer.close_count(), 1);
    }
}
