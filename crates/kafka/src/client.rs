use crate::broker::{BrokerClient, KafkaBroker};
use crate::config::{ConsumerConfig, Subscription, SubscriptionOpts};
use crate::consumer::{Consumer, ConsumerHandle};
use crate::decoder::build_decoder;
use crate::dispatch::MessageHandler;
use crate::error::Result;
use crate::registry::{HttpSchemaRegistry, SchemaCache, SchemaRegistry};
use std::sync::Arc;
use tracing::warn;

/// Builds consumers that share broker settings, a schema registry and a
/// schema cache.
///
/// Every consumer created by one client resolves schema ids through the same
/// [`SchemaCache`]; consumers built by different clients share nothing.
#[derive(Clone)]
pub struct Client {
    config: ConsumerConfig,
    registry: Arc<dyn SchemaRegistry>,
    cache: SchemaCache,
}

impl Client {
    /// Create a client talking to the registry at `config.schema_registry_url`.
    pub fn new(config: ConsumerConfig) -> Self {
        let registry = Arc::new(HttpSchemaRegistry::new(config.schema_registry_url.clone()));
        Self::with_registry(config, registry, SchemaCache::new())
    }

    /// Create a client with an explicit registry and cache.
    pub fn with_registry(
        config: ConsumerConfig,
        registry: Arc<dyn SchemaRegistry>,
        cache: SchemaCache,
    ) -> Self {
        Self {
            config,
            registry,
            cache,
        }
    }

    /// Create a consumer backed by a new Kafka broker client.
    pub fn create_consumer(
        &self,
        opts: &SubscriptionOpts,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Consumer<KafkaBroker>> {
        let subscription = Subscription::try_from(opts)?;
        let broker = KafkaBroker::new(&self.config, subscription.offset_policy)?;
        Ok(self.consumer_with_broker(subscription, broker, handler))
    }

    /// Create a consumer over any broker client.
    pub fn consumer_with_broker<B: BrokerClient + 'static>(
        &self,
        subscription: Subscription,
        broker: B,
        handler: Arc<dyn MessageHandler>,
    ) -> Consumer<B> {
        let decoder = build_decoder(
            subscription.decoder_kind,
            self.registry.clone(),
            self.cache.clone(),
        );
        Consumer::new(subscription, broker, decoder, handler)
    }

    /// Subscribe a new Kafka consumer and run it on its own task.
    ///
    /// Subscription failures are returned here rather than from the task.
    pub fn spawn_consumer(
        &self,
        opts: &SubscriptionOpts,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ConsumerHandle> {
        let consumer = self.create_consumer(opts, handler)?;
        subscribe_and_spawn(consumer)
    }

    /// Spawn a subscribed consumer over any broker client.
    pub fn spawn_with_broker<B: BrokerClient + 'static>(
        &self,
        subscription: Subscription,
        broker: B,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ConsumerHandle> {
        let consumer = self.consumer_with_broker(subscription, broker, handler);
        subscribe_and_spawn(consumer)
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.cache
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }
}

fn subscribe_and_spawn<B: BrokerClient + 'static>(mut consumer: Consumer<B>) -> Result<ConsumerHandle> {
    if let Err(e) = consumer.subscribe() {
        if let Err(close_err) = consumer.close() {
            warn!(error = %close_err, "Failed to close consumer after subscribe error");
        }
        return Err(e);
    }
    Ok(consumer.spawn())
}
