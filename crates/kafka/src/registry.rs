//! Schema registry client and the process-local schema cache.
//!
//! Schema-coded records carry a registry id instead of a schema. The
//! [`SchemaCache`] resolves ids through a [`SchemaRegistry`] on first sight
//! and keeps the compiled result for the life of the process: registered
//! schemas are immutable, so entries are never evicted or replaced.

use crate::proto::{ProtoDecoder, ProtoParser};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors raised while resolving a schema id.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("schema registry request failed: {0}")]
    Http(String),

    #[error("schema registry returned status {status} for schema {id}")]
    Status { id: u32, status: u16 },

    #[error("unknown schema id {0}")]
    NotFound(u32),

    #[error("schema {id} is not usable: {reason}")]
    InvalidSchema { id: u32, reason: String },
}

/// Schema formats a registry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Avro,
    Protobuf,
    Json,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaType::Avro => write!(f, "AVRO"),
            SchemaType::Protobuf => write!(f, "PROTOBUF"),
            SchemaType::Json => write!(f, "JSON"),
        }
    }
}

impl FromStr for SchemaType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVRO" => Ok(SchemaType::Avro),
            "PROTOBUF" => Ok(SchemaType::Protobuf),
            "JSON" => Ok(SchemaType::Json),
            other => Err(format!("unknown schema type: {other}")),
        }
    }
}

/// A schema as stored in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredSchema {
    pub id: u32,
    pub schema_type: SchemaType,
    pub schema: String,
}

impl RegisteredSchema {
    pub fn new(id: u32, schema_type: SchemaType, schema: impl Into<String>) -> Self {
        Self {
            id,
            schema_type,
            schema: schema.into(),
        }
    }
}

/// Lookup of schemas by registry id.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn resolve(&self, id: u32) -> Result<RegisteredSchema, RegistryError>;
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
}

/// Confluent-compatible registry reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSchemaRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSchemaRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn schema_url(&self, id: u32) -> String {
        format!("{}/schemas/ids/{id}", self.base_url)
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn resolve(&self, id: u32) -> Result<RegisteredSchema, RegistryError> {
        let url = self.schema_url(id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Http(format!("Failed to fetch {url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(id));
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                id,
                status: status.as_u16(),
            });
        }

        let body: SchemaResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Http(format!("Failed to read schema {id}: {e}")))?;
        debug!(schema_id = id, "fetched schema from registry");
        parse_schema_response(id, body)
    }
}

fn parse_schema_response(id: u32, body: SchemaResponse) -> Result<RegisteredSchema, RegistryError> {
    // The registry omits schemaType for Avro, its original format.
    let schema_type = match body.schema_type.as_deref() {
        None => SchemaType::Avro,
        Some(s) => s
            .parse()
            .map_err(|reason| RegistryError::InvalidSchema { id, reason })?,
    };
    Ok(RegisteredSchema::new(id, schema_type, body.schema))
}

/// A registered schema prepared for decoding.
#[derive(Debug, Clone)]
pub enum CompiledSchema {
    Protobuf(ProtoDecoder),
    Json,
    Avro(apache_avro::Schema),
}

impl CompiledSchema {
    pub fn compile(schema: &RegisteredSchema) -> Result<Self, RegistryError> {
        match schema.schema_type {
            SchemaType::Protobuf => ProtoParser::parse_str(&schema.schema)
                .map(|parsed| CompiledSchema::Protobuf(ProtoDecoder::new(parsed)))
                .map_err(|e| RegistryError::InvalidSchema {
                    id: schema.id,
                    reason: e.to_string(),
                }),
            SchemaType::Json => Ok(CompiledSchema::Json),
            SchemaType::Avro => compile_avro(schema).map(CompiledSchema::Avro),
        }
    }

    pub fn schema_type(&self) -> SchemaType {
        match self {
            CompiledSchema::Protobuf(_) => SchemaType::Protobuf,
            CompiledSchema::Json => SchemaType::Json,
            CompiledSchema::Avro(_) => SchemaType::Avro,
        }
    }
}

fn compile_avro(schema: &RegisteredSchema) -> Result<apache_avro::Schema, RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidSchema {
        id: schema.id,
        reason,
    };
    let definition: serde_json::Value =
        serde_json::from_str(&schema.schema).map_err(|e| invalid(e.to_string()))?;
    // Datum decoding recurses once per nesting level; only a self-referencing
    // record lets a payload choose its own depth.
    if is_recursive_avro(&definition, &mut Vec::new()) {
        return Err(invalid("recursive Avro records are not supported".to_string()));
    }
    apache_avro::Schema::parse(&definition).map_err(|e| invalid(e.to_string()))
}

fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Whether a named type refers back to a record that encloses it.
fn is_recursive_avro(node: &serde_json::Value, enclosing: &mut Vec<String>) -> bool {
    use serde_json::Value;

    match node {
        Value::String(name) => enclosing.iter().any(|r| r == simple_name(name)),
        Value::Array(branches) => branches.iter().any(|b| is_recursive_avro(b, enclosing)),
        Value::Object(map) => match map.get("type") {
            Some(Value::String(kind)) if kind == "record" || kind == "error" => {
                let name = map.get("name").and_then(Value::as_str).unwrap_or_default();
                enclosing.push(simple_name(name).to_string());
                let recursive = map
                    .get("fields")
                    .and_then(Value::as_array)
                    .map(|fields| {
                        fields.iter().any(|f| {
                            f.get("type")
                                .is_some_and(|t| is_recursive_avro(t, enclosing))
                        })
                    })
                    .unwrap_or(false);
                enclosing.pop();
                recursive
            }
            Some(Value::String(kind)) if kind == "array" => map
                .get("items")
                .is_some_and(|items| is_recursive_avro(items, enclosing)),
            Some(Value::String(kind)) if kind == "map" => map
                .get("values")
                .is_some_and(|values| is_recursive_avro(values, enclosing)),
            Some(Value::String(name)) => enclosing.iter().any(|r| r == simple_name(name)),
            None => false,
            Some(nested) => is_recursive_avro(nested, enclosing),
        },
        _ => false,
    }
}

/// Read-through cache of compiled schemas keyed by registry id.
///
/// Cloning yields another handle to the same map. Each id is written at
/// most once; a later insert for an id already present is discarded and the
/// first value is returned.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    entries: Arc<RwLock<HashMap<u32, Arc<CompiledSchema>>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: u32) -> Option<Arc<CompiledSchema>> {
        self.entries.read().await.get(&id).cloned()
    }

    pub async fn insert(&self, id: u32, schema: CompiledSchema) -> Arc<CompiledSchema> {
        let mut entries = self.entries.write().await;
        entries.entry(id).or_insert_with(|| Arc::new(schema)).clone()
    }

    /// Return the cached schema for `id`, fetching and compiling it on a miss.
    ///
    /// The registry is called without holding the lock, so two consumers
    /// missing on the same id may both fetch; only the first result is kept.
    pub async fn get_or_fetch(
        &self,
        id: u32,
        registry: &dyn SchemaRegistry,
    ) -> Result<Arc<CompiledSchema>, RegistryError> {
        if let Some(hit) = self.get(id).await {
            return Ok(hit);
        }
        let registered = registry.resolve(id).await?;
        let compiled = CompiledSchema::compile(&registered)?;
        debug!(schema_id = id, schema_type = %registered.schema_type, "cached schema");
        Ok(self.insert(id, compiled).await)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
