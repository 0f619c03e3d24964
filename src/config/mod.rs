//! Application configuration file.
//!
//! ```toml
//! [kafka]
//! brokers = "PLAINTEXT://localhost:9092"
//! schema_registry_url = "http://localhost:8081"
//!
//! [[consumers]]
//! topic_pattern = "org.chicago.cta.weather.v1"
//! handler = "weather"
//! offset_earliest = true
//! idle_sleep = "500ms"
//! ```
//!
//! `[kafka]` holds the broker settings shared by every consumer. Each
//! `[[consumers]]` entry becomes one consumer and names the handler its
//! records go to.

pub mod duration;

pub use duration::parse_duration_secs;

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use transit_kafka::{ConsumerConfig, SubscriptionOpts};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub kafka: ConsumerConfig,
    #[serde(default)]
    pub consumers: Vec<ConsumerEntry>,
}

/// A duration given either as a number of seconds or as a string such as
/// `"500ms"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DurationSetting {
    Secs(f64),
    Text(String),
}

impl DurationSetting {
    pub fn as_secs(&self) -> anyhow::Result<f64> {
        match self {
            DurationSetting::Secs(secs) => Ok(*secs),
            DurationSetting::Text(text) => parse_duration_secs(text),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerEntry {
    pub topic_pattern: String,
    /// Name the handler was registered under.
    pub handler: String,
    #[serde(default)]
    pub offset_earliest: bool,
    #[serde(default = "default_is_schema_coded")]
    pub is_schema_coded: bool,
    pub idle_sleep: Option<DurationSetting>,
    pub poll_timeout: Option<DurationSetting>,
}

fn default_is_schema_coded() -> bool {
    true
}

impl ConsumerEntry {
    pub fn to_opts(&self) -> anyhow::Result<SubscriptionOpts> {
        let mut opts = SubscriptionOpts::new(self.topic_pattern.clone());
        opts.offset_earliest = self.offset_earliest;
        opts.is_schema_coded = self.is_schema_coded;
        if let Some(idle) = &self.idle_sleep {
            opts.idle_sleep_secs = idle
                .as_secs()
                .with_context(|| format!("Invalid idle_sleep for {}", self.topic_pattern))?;
        }
        if let Some(timeout) = &self.poll_timeout {
            opts.poll_timeout_secs = timeout
                .as_secs()
                .with_context(|| format!("Invalid poll_timeout for {}", self.topic_pattern))?;
        }
        Ok(opts)
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        if config.consumers.is_empty() {
            anyhow::bail!("No [[consumers]] configured");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [kafka]
        brokers = "PLAINTEXT://kafka0:9092"
        group_id = "cta-status"

        [[consumers]]
        topic_pattern = "org.chicago.cta.weather.v1"
        handler = "weather"
        offset_earliest = true
        is_schema_coded = false
        idle_sleep = "500ms"
        poll_timeout = 2

        [[consumers]]
        topic_pattern = "^org.chicago.cta.station.arrivals."
        handler = "arrivals"
    "#;

    #[test]
    fn test_parse_config() {
        let config = AppConfig::from_toml(CONFIG).unwrap();
        assert_eq!(config.kafka.brokers, "PLAINTEXT://kafka0:9092");
        assert_eq!(config.kafka.group_id, "cta-status");
        assert_eq!(config.kafka.schema_registry_url, "http://localhost:8081");
        assert_eq!(config.consumers.len(), 2);

        let weather = config.consumers[0].to_opts().unwrap();
        assert!(weather.offset_earliest);
        assert!(!weather.is_schema_coded);
        assert_eq!(weather.idle_sleep_secs, 0.5);
        assert_eq!(weather.poll_timeout_secs, 2.0);

        let arrivals = config.consumers[1].to_opts().unwrap();
        assert!(!arrivals.offset_earliest);
        assert!(arrivals.is_schema_coded);
        assert_eq!(arrivals.idle_sleep_secs, 1.0);
        assert_eq!(config.consumers[1].handler, "arrivals");
    }

    #[test]
    fn test_kafka_section_is_optional() {
        let config = AppConfig::from_toml(
            r#"
            [[consumers]]
            topic_pattern = "org.chicago.cta.turnstile"
            handler = "turnstile"
            "#,
        )
        .unwrap();
        assert_eq!(config.kafka.brokers, "PLAINTEXT://localhost:9092");
        assert_eq!(config.kafka.group_id, "0");
    }

    #[test]
    fn test_no_consumers_is_an_error() {
        assert!(AppConfig::from_toml("[kafka]\nbrokers = \"localhost:9092\"\n").is_err());
    }

    #[test]
    fn test_bad_duration() {
        let config = AppConfig::from_toml(
            r#"
            [[consumers]]
            topic_pattern = "weather"
            handler = "weather"
            idle_sleep = "soon"
            "#,
        )
        .unwrap();
        assert!(config.consumers[0].to_opts().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consumers.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.consumers[0].topic_pattern, "org.chicago.cta.weather.v1");

        assert!(AppConfig::load_from_file(dir.path().join("missing.toml")).is_err());
    }
}
