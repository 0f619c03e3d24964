//! Current weather conditions.

use kafka_types::Record;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use tracing::info;
use transit_kafka::MessageHandler;

/// Latest reported weather.
#[derive(Debug, Clone, PartialEq)]
pub struct Weather {
    pub temperature: f64,
    pub status: String,
}

impl Default for Weather {
    fn default() -> Self {
        Self {
            temperature: 70.0,
            status: "sunny".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct WeatherUpdate {
    temperature: f64,
    status: String,
}

impl Weather {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a weather record. Both fields are read before either is
    /// updated, so a bad record leaves the model unchanged.
    pub fn process_message(&mut self, record: &Record) -> anyhow::Result<()> {
        let update: WeatherUpdate = record.payload.deserialize()?;
        info!(
            temperature = update.temperature,
            status = %update.status,
            "processing weather message"
        );
        self.temperature = update.temperature;
        self.status = update.status;
        Ok(())
    }
}

/// Weather model shared between a consumer task and its readers.
#[derive(Debug, Clone, Default)]
pub struct SharedWeather {
    inner: Arc<RwLock<Weather>>,
}

impl SharedWeather {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Weather {
        match self.inner.read() {
            Ok(weather) => weather.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl MessageHandler for SharedWeather {
    fn handle(&self, record: &Record) -> anyhow::Result<()> {
        let mut weather = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("weather model lock poisoned"))?;
        weather.process_message(record)
    }
}
