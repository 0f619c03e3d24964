//! Error types for kafka-types crate.

use thiserror::Error;

/// Errors that can occur while reading values out of a decoded payload.
#[derive(Error, Debug)]
pub enum KafkaTypesError {
    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid field type for '{field}': expected {expected}, got {actual}")]
    FieldType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid timestamp: seconds={seconds}, nanos={nanos}")]
    InvalidTimestamp { seconds: i64, nanos: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),
}

/// Result type alias for kafka-types operations.
pub type Result<T> = std::result::Result<T, KafkaTypesError>;
