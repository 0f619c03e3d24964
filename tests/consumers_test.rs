use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use transit_consumers::{run_consumers_with, AppConfig, Handlers, SharedWeather};
use transit_kafka::kafka_types::{Payload, RawRecord, Record};
use transit_kafka::testing::{frame, BrokerObserver, ScriptedBroker, StaticSchemaRegistry};
use transit_kafka::{Client, ConsumerConfig, RegisteredSchema, SchemaCache, SchemaType};

const CONFIG: &str = r#"
    [[consumers]]
    topic_pattern = "org.chicago.cta.weather.v1"
    handler = "weather"
    is_schema_coded = false

    [[consumers]]
    topic_pattern = "org.chicago.cta.weather.coded"
    handler = "weather"
    offset_earliest = true
    idle_sleep = "250ms"
"#;

const WEATHER_JSON: &[u8] = br#"{"temperature": 78.5, "status": "cloudy"}"#;

fn test_client(registry: StaticSchemaRegistry) -> Client {
    Client::with_registry(ConsumerConfig::default(), Arc::new(registry), SchemaCache::new())
}

fn brokers(
    scripts: Vec<(&str, ScriptedBroker)>,
) -> (HashMap<String, ScriptedBroker>, HashMap<String, BrokerObserver>) {
    let observers = scripts
        .iter()
        .map(|(topic, broker)| (topic.to_string(), broker.observer()))
        .collect();
    let brokers = scripts
        .into_iter()
        .map(|(topic, broker)| (topic.to_string(), broker))
        .collect();
    (brokers, observers)
}

#[tokio::test(start_paused = true)]
async fn test_raw_weather_record_updates_model() {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    let weather = SharedWeather::new();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let model = weather.clone();
    let recording = move |record: &Record| -> anyhow::Result<()> {
        sink.lock().unwrap().push(record.payload.clone());
        transit_kafka::MessageHandler::handle(&model, record)
    };
    let handlers = Handlers::new().register("weather", Arc::new(recording));

    let (mut scripted, observers) = brokers(vec![
        (
            "org.chicago.cta.weather.v1",
            ScriptedBroker::new().then_record(RawRecord::new(
                "org.chicago.cta.weather.v1",
                0,
                41,
                WEATHER_JSON.to_vec(),
            )),
        ),
        ("org.chicago.cta.weather.coded", ScriptedBroker::new()),
    ]);

    let reports = run_consumers_with(
        &test_client(StaticSchemaRegistry::new()),
        &config,
        &handlers,
        |sub| {
            scripted
                .remove(&sub.topic_pattern)
                .ok_or_else(|| anyhow::anyhow!("no broker for {}", sub.topic_pattern))
        },
        tokio::time::sleep(Duration::from_secs(2)),
    )
    .await
    .unwrap();

    // The handler saw the payload exactly as it was produced.
    assert_eq!(*seen.lock().unwrap(), vec![Payload::Raw(WEATHER_JSON.to_vec())]);
    let current = weather.snapshot();
    assert_eq!(current.temperature, 78.5);
    assert_eq!(current.status, "cloudy");

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].topic, "org.chicago.cta.weather.v1");
    assert_eq!(reports[0].stats.records, 1);
    for observer in observers.values() {
        assert_eq!(observer.close_count(), 1);
    }
    // 250ms idle sleep over two seconds.
    assert!(observers["org.chicago.cta.weather.coded"].poll_count() >= 8);
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_schema_id_is_skipped() {
    let config = AppConfig::from_toml(
        r#"
        [[consumers]]
        topic_pattern = "org.chicago.cta.weather.v1"
        handler = "weather"
        "#,
    )
    .unwrap();
    let weather = SharedWeather::new();
    let handlers = Handlers::new().register("weather", Arc::new(weather.clone()));
    let registry = StaticSchemaRegistry::new()
        .with_schema(RegisteredSchema::new(1, SchemaType::Json, r#"{"type": "object"}"#));

    let mut bad = frame(1, WEATHER_JSON);
    bad[1..5].copy_from_slice(&0xdead_beef_u32.to_be_bytes());
    let topic = "org.chicago.cta.weather.v1";
    let broker = ScriptedBroker::new()
        .then_record(RawRecord::new(topic, 0, 7, bad))
        .then_record(RawRecord::new(topic, 0, 8, frame(1, WEATHER_JSON)));
    let observer = broker.observer();
    let mut broker = Some(broker);

    let reports = run_consumers_with(
        &test_client(registry),
        &config,
        &handlers,
        |_| broker.take().ok_or_else(|| anyhow::anyhow!("broker already taken")),
        tokio::time::sleep(Duration::from_millis(500)),
    )
    .await
    .unwrap();

    let stats = reports[0].stats;
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.records, 1);
    assert_eq!(stats.handler_errors, 0);
    // The good record after the bad one was still polled and applied.
    assert_eq!(weather.snapshot().status, "cloudy");
    assert!(observer.poll_count() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_avro_weather_record_updates_model() {
    let config = AppConfig::from_toml(
        r#"
        [[consumers]]
        topic_pattern = "org.chicago.cta.weather.v1"
        handler = "weather"
        offset_earliest = true
        "#,
    )
    .unwrap();
    let weather = SharedWeather::new();
    let handlers = Handlers::new().register("weather", Arc::new(weather.clone()));
    let registry = StaticSchemaRegistry::new().with_schema(RegisteredSchema::new(
        11,
        SchemaType::Avro,
        r#"{
            "type": "record",
            "name": "weather",
            "namespace": "org.chicago.cta.weather.v1",
            "fields": [
                {"name": "temperature", "type": "double"},
                {"name": "status", "type": "string"}
            ]
        }"#,
    ));

    // double, then string as zig-zag length and UTF-8 bytes
    let mut body = 78.5f64.to_le_bytes().to_vec();
    body.push(12);
    body.extend_from_slice(b"cloudy");
    let topic = "org.chicago.cta.weather.v1";
    let broker = ScriptedBroker::new().then_record(RawRecord::new(topic, 0, 3, frame(11, &body)));
    let mut broker = Some(broker);

    let reports = run_consumers_with(
        &test_client(registry),
        &config,
        &handlers,
        |_| broker.take().ok_or_else(|| anyhow::anyhow!("broker already taken")),
        tokio::time::sleep(Duration::from_millis(500)),
    )
    .await
    .unwrap();

    assert_eq!(reports[0].stats.records, 1);
    assert_eq!(reports[0].stats.decode_errors, 0);
    let current = weather.snapshot();
    assert_eq!(current.temperature, 78.5);
    assert_eq!(current.status, "cloudy");
}

#[tokio::test]
async fn test_unknown_handler_stops_startup() {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    let weather = SharedWeather::new();
    let handlers = Handlers::new().register("arrivals", Arc::new(weather));

    let result = run_consumers_with(
        &test_client(StaticSchemaRegistry::new()),
        &config,
        &handlers,
        |_| Ok(ScriptedBroker::new()),
        async {},
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("No handler registered as 'weather'"));
}

#[tokio::test]
async fn test_started_consumers_are_closed_when_a_later_one_fails() {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    let handlers = Handlers::new().register("weather", Arc::new(SharedWeather::new()));
    let first = ScriptedBroker::new();
    let first_observer = first.observer();
    let mut scripted = vec![
        ScriptedBroker::new().rejecting_subscribe("topic authorization failed"),
        first,
    ];

    let result = run_consumers_with(
        &test_client(StaticSchemaRegistry::new()),
        &config,
        &handlers,
        |_| scripted.pop().ok_or_else(|| anyhow::anyhow!("no more brokers")),
        std::future::pending::<()>(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(first_observer.close_count(), 1);
}
