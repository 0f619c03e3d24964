use thiserror::Error;

use crate::broker::BrokerError;
use crate::decoder::DecodeError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Schema registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Protobuf parse error: {0}")]
    ProtobufParse(String),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(String),

    #[error("Message type not found: {0}")]
    MessageTypeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Consumer task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, Error>;
