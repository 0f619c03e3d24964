//! In-memory doubles for the broker and schema registry.
//!
//! [`ScriptedBroker`] replays a fixed list of poll results and records what
//! the consumer did with it (poll instants, assignments, closes) in a
//! [`BrokerObserver`] that outlives the broker. [`StaticSchemaRegistry`] serves
//! schemas from a map and counts lookups.

use crate::assignment::OnAssign;
use crate::broker::{BrokerClient, BrokerError};
use crate::registry::{RegisteredSchema, RegistryError, SchemaRegistry};
use async_trait::async_trait;
use kafka_types::{PartitionAssignment, RawRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Frame `body` the way schema-coded producers do.
pub fn frame(schema_id: u32, body: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(body.len() + 5);
    value.push(0x00);
    value.extend_from_slice(&schema_id.to_be_bytes());
    value.extend_from_slice(body);
    value
}

#[derive(Debug, Default)]
struct ObservedState {
    subscribed: Option<String>,
    polls: Vec<Instant>,
    assignments: Vec<PartitionAssignment>,
    closes: usize,
}

/// Observations shared between a [`ScriptedBroker`] and the test.
#[derive(Debug, Clone, Default)]
pub struct BrokerObserver {
    state: Arc<Mutex<ObservedState>>,
}

impl BrokerObserver {
    fn lock(&self) -> MutexGuard<'_, ObservedState> {
        // A panicking test thread must not hide the observations.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribed(&self) -> Option<String> {
        self.lock().subscribed.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.lock().polls.len()
    }

    pub fn poll_instants(&self) -> Vec<Instant> {
        self.lock().polls.clone()
    }

    pub fn assignments(&self) -> Vec<PartitionAssignment> {
        self.lock().assignments.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }
}

/// Broker double that replays scripted poll results.
///
/// Once the script runs out every poll reports an empty topic. A proposed
/// assignment, if any, is handed to the subscription's `on_assign` strategy
/// during the first poll, the way a real client rebalances inside `poll`.
#[derive(Default)]
pub struct ScriptedBroker {
    script: VecDeque<Result<Option<RawRecord>, BrokerError>>,
    proposal: Option<PartitionAssignment>,
    on_assign: Option<OnAssign>,
    reject_assign: Option<String>,
    reject_subscribe: Option<String>,
    poll_delay: Option<Duration>,
    observer: BrokerObserver,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_record(mut self, record: RawRecord) -> Self {
        self.script.push_back(Ok(Some(record)));
        self
    }

    pub fn then_empty(mut self) -> Self {
        self.script.push_back(Ok(None));
        self
    }

    pub fn then_fault(mut self, err: BrokerError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    /// Propose `assignment` at the first poll after subscribing.
    pub fn with_proposal(mut self, assignment: PartitionAssignment) -> Self {
        self.proposal = Some(assignment);
        self
    }

    pub fn rejecting_assign(mut self, reason: &str) -> Self {
        self.reject_assign = Some(reason.to_string());
        self
    }

    pub fn rejecting_subscribe(mut self, reason: &str) -> Self {
        self.reject_subscribe = Some(reason.to_string());
        self
    }

    /// Make every poll take `delay` before answering.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }

    pub fn observer(&self) -> BrokerObserver {
        self.observer.clone()
    }

    fn rebalance(&mut self) -> Result<(), BrokerError> {
        let (Some(proposal), Some(on_assign)) = (self.proposal.take(), self.on_assign.clone()) else {
            return Ok(());
        };
        let revised = on_assign(proposal);
        self.assign(&revised)
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    fn subscribe(&mut self, pattern: &str, on_assign: OnAssign) -> Result<(), BrokerError> {
        if let Some(reason) = &self.reject_subscribe {
            return Err(BrokerError::Subscribe(reason.clone()));
        }
        self.on_assign = Some(on_assign);
        self.observer.lock().subscribed = Some(pattern.to_string());
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<Option<RawRecord>, BrokerError> {
        self.observer.lock().polls.push(Instant::now());
        self.rebalance()?;
        if let Some(delay) = self.poll_delay {
            tokio::time::sleep(delay).await;
        }
        self.script.pop_front().unwrap_or(Ok(None))
    }

    fn assign(&mut self, assignment: &PartitionAssignment) -> Result<(), BrokerError> {
        if let Some(reason) = &self.reject_assign {
            return Err(BrokerError::Assignment(reason.clone()));
        }
        self.observer.lock().assignments.push(assignment.clone());
        Ok(())
    }

    fn close(self) -> Result<(), BrokerError> {
        self.observer.lock().closes += 1;
        Ok(())
    }
}

/// Registry double serving schemas from memory.
#[derive(Debug, Default)]
pub struct StaticSchemaRegistry {
    schemas: HashMap<u32, RegisteredSchema>,
    resolves: AtomicUsize,
}

impl StaticSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: RegisteredSchema) -> Self {
        self.schemas.insert(schema.id, schema);
        self
    }

    /// Number of `resolve` calls, hits and misses alike.
    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn resolve(&self, id: u32) -> Result<RegisteredSchema, RegistryError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.schemas.get(&id).cloned().ok_or(RegistryError::NotFound(id))
    }
}
