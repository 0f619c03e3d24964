//! Transit Consumers Library
//!
//! Kafka consumers that keep in-memory transit status models current.
//!
//! # Features
//!
//! - TOML configuration: broker settings plus one `[[consumers]]` entry per topic
//! - Weather model updated from raw JSON or schema-coded records
//! - Runner that starts every configured consumer and stops them together
//!
//! The consumption loop itself lives in `transit_kafka`.
//!
//! ```ignore
//! let config = AppConfig::load_from_file("consumers.toml")?;
//! let weather = SharedWeather::new();
//! let handlers = Handlers::new().register("weather", Arc::new(weather.clone()));
//! let reports = run_consumers(&config, &handlers, async {
//!     tokio::signal::ctrl_c().await.ok();
//! })
//! .await?;
//! ```

pub mod config;
pub mod models;
pub mod runner;

pub use config::{parse_duration_secs, AppConfig, ConsumerEntry, DurationSetting};
pub use models::{SharedWeather, Weather};
pub use runner::{run_consumers, run_consumers_with, ConsumerReport, Handlers};

/// Initialize tracing with `RUST_LOG` filtering, defaulting to `info`.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
