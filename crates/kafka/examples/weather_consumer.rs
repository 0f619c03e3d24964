use std::sync::Arc;
use transit_kafka::{Client, ConsumerConfig, Payload, Record, SubscriptionOpts};

/// Example consuming schema-coded weather readings.
///
/// To run this example:
/// 1. Start Kafka and a schema registry, e.g. with the Confluent images
///   docker run -d --name kafka -p 9092:9092 apache/kafka:latest
/// 2. Produce protobuf or JSON-schema records to `org.chicago.cta.weather.v1`
/// 3. Run the example, stop it with Ctrl-C
///   cargo run --example weather_consumer

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run_main().await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let client = Client::new(ConsumerConfig::default());

    let opts = SubscriptionOpts {
        offset_earliest: true,
        ..SubscriptionOpts::new("org.chicago.cta.weather.v1")
    };

    let handler = |record: &Record| -> anyhow::Result<()> {
        let json = match &record.payload {
            Payload::Raw(bytes) => serde_json::from_slice(bytes)?,
            other => other.to_json()?,
        };
        tracing::info!(
            partition = record.partition,
            offset = record.offset,
            temperature = %json["temperature"],
            status = %json["status"],
            "weather update"
        );
        Ok(())
    };

    let handle = client.spawn_consumer(&opts, Arc::new(handler))?;

    tokio::signal::ctrl_c().await?;
    let stats = handle.close().await?;
    println!("Consumed {} records ({} decode errors)", stats.records, stats.decode_errors);

    Ok(())
}
