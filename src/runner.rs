//! Runs one consumer per configured topic until shutdown.

use crate::config::AppConfig;
use anyhow::Context;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};
use transit_kafka::{
    BrokerClient, Client, ConsumerHandle, ConsumerStats, KafkaBroker, MessageHandler, Subscription,
};

/// Handlers addressable by the `handler` name in `[[consumers]]` entries.
#[derive(Clone, Default)]
pub struct Handlers {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(name).cloned()
    }
}

/// Final counters of one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerReport {
    pub topic: String,
    pub stats: ConsumerStats,
}

/// Start a Kafka consumer for every configured entry, wait for `shutdown`,
/// then close them all.
pub async fn run_consumers<S>(
    config: &AppConfig,
    handlers: &Handlers,
    shutdown: S,
) -> anyhow::Result<Vec<ConsumerReport>>
where
    S: Future<Output = ()>,
{
    let client = Client::new(config.kafka.clone());
    let kafka = config.kafka.clone();
    run_consumers_with(
        &client,
        config,
        handlers,
        |subscription| {
            KafkaBroker::new(&kafka, subscription.offset_policy)
                .with_context(|| format!("Failed to create consumer for {}", subscription.topic_pattern))
        },
        shutdown,
    )
    .await
}

/// Like [`run_consumers`], with broker clients built by `make_broker`.
///
/// All consumers share `client`'s schema cache. If any consumer fails to
/// start, the ones already running are closed and the error is returned.
pub async fn run_consumers_with<B, F, S>(
    client: &Client,
    config: &AppConfig,
    handlers: &Handlers,
    mut make_broker: F,
    shutdown: S,
) -> anyhow::Result<Vec<ConsumerReport>>
where
    B: BrokerClient + 'static,
    F: FnMut(&Subscription) -> anyhow::Result<B>,
    S: Future<Output = ()>,
{
    let mut running = Vec::with_capacity(config.consumers.len());

    for entry in &config.consumers {
        let started = start_consumer(client, entry, handlers, &mut make_broker);
        match started {
            Ok(handle) => {
                info!(topic = %handle.topic(), handler = %entry.handler, "consumer started");
                running.push(handle);
            }
            Err(e) => {
                error!(topic = %entry.topic_pattern, error = %e, "Failed to start consumer");
                close_all(running).await;
                return Err(e);
            }
        }
    }

    shutdown.await;
    info!(consumers = running.len(), "shutting down consumers");

    let mut reports = Vec::with_capacity(running.len());
    let mut first_error = None;
    for handle in running {
        let topic = handle.topic().to_string();
        match handle.close().await {
            Ok(stats) => reports.push(ConsumerReport { topic, stats }),
            Err(e) => {
                error!(topic = %topic, error = %e, "consumer failed");
                first_error.get_or_insert_with(|| anyhow::Error::new(e).context(format!("Consumer for {topic} failed")));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(reports),
    }
}

fn start_consumer<B, F>(
    client: &Client,
    entry: &crate::config::ConsumerEntry,
    handlers: &Handlers,
    make_broker: &mut F,
) -> anyhow::Result<ConsumerHandle>
where
    B: BrokerClient + 'static,
    F: FnMut(&Subscription) -> anyhow::Result<B>,
{
    let handler = handlers
        .get(&entry.handler)
        .with_context(|| format!("No handler registered as '{}'", entry.handler))?;
    let subscription = Subscription::try_from(entry.to_opts()?)?;
    let broker = make_broker(&subscription)?;
    Ok(client.spawn_with_broker(subscription, broker, handler)?)
}

async fn close_all(handles: Vec<ConsumerHandle>) {
    for handle in handles {
        let topic = handle.topic().to_string();
        if let Err(e) = handle.close().await {
            error!(topic = %topic, error = %e, "Failed to close consumer");
        }
    }
}
