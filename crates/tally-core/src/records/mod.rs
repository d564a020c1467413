//! Local record collections.
//!
//! A [`Record`] is an opaque JSON object identified by its `id` field.
//! [`RecordStore`] is the narrow interface the sync engine needs; the
//! concrete SQLite store lives in [`crate::db`].

mod memory;
mod observed;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub use memory::MemoryRecordStore;
pub use observed::{ChangeObserver, ObservedRecordStore};

/// A single record: a JSON object with a string or integer `id`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Record {
    id: String,
    fields: Map<String, Value>,
}

impl Record {
    /// Wrap a JSON object, validating its `id` field.
    pub fn from_object(fields: Map<String, Value>) -> Result<Self> {
        let id = match fields.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(Value::Number(id)) if id.is_i64() || id.is_u64() => id.to_string(),
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "record id must be a non-empty string or integer, got {other}"
                )))
            }
            None => return Err(Error::InvalidInput("record has no id field".to_string())),
        };
        Ok(Self { id, fields })
    }

    /// Build a record from any JSON value; only objects are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Self::from_object(fields),
            other => Err(Error::InvalidInput(format!(
                "record must be a JSON object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Parse one JSON document into a record.
    pub fn from_json(raw: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    /// The record id in string form.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Record")
            .field("id", &self.id)
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Visitor invoked once per record by [`RecordStore::iterate`].
pub type RecordVisitor<'a> = dyn FnMut(&Record) -> Result<()> + Send + 'a;

/// Storage for named record collections.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Names of collections that currently hold at least one record.
    async fn collections(&self) -> Result<Vec<String>>;

    /// Every record in a collection, in insertion order.
    async fn get_all(&self, collection: &str) -> Result<Vec<Record>>;

    /// Bulk upsert. Existing ids keep their position.
    async fn save_all(&self, collection: &str, records: Vec<Record>) -> Result<()>;

    /// Insert a new record, failing if the id already exists.
    async fn add(&self, collection: &str, record: Record) -> Result<()>;

    /// Delete by id. Returns whether a record was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Visit each record in insertion order without materializing the
    /// collection, returning the number visited.
    async fn iterate(&self, collection: &str, visitor: &mut RecordVisitor<'_>) -> Result<usize>;

    /// Remove every record from a collection.
    async fn clear(&self, collection: &str) -> Result<()>;
}

pub(crate) fn validate_collection(collection: &str) -> Result<&str> {
    let collection = collection.trim();
    if collection.is_empty() {
        return Err(Error::InvalidInput(
            "collection name cannot be empty".to_string(),
        ));
    }
    Ok(collection)
}
