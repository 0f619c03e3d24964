//! Handler dispatch.
//!
//! Decoded records are handed to a [`MessageHandler`] through a
//! [`Dispatcher`], which turns both returned errors and panics into a
//! [`HandlerError`]. Nothing is retried: a failed record is logged and the
//! loop moves on.

use kafka_types::Record;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Domain callback invoked once per decoded record.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, record: &Record) -> anyhow::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Record) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, record: &Record) -> anyhow::Result<()> {
        self(record)
    }
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("handler failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn MessageHandler>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }

    /// Run the handler on `record`. The record is consumed so the same
    /// decoded value can never be dispatched twice.
    pub fn dispatch(&self, record: Record) -> Result<(), HandlerError> {
        let handler = &self.handler;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&record))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => HandlerError::Failed(e),
            Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())),
        };
        error!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            error = %result,
            "Error while handling message"
        );
        Err(result)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
