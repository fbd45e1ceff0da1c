//! Document primitives: references, timestamps, and stored documents.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Field name used by the server-timestamp sentinel.
pub const SERVER_TIMESTAMP_FIELD: &str = "__server_timestamp__";

/// A store-assigned timestamp in microseconds since the Unix epoch.
///
/// Commit timestamps are strictly monotonic per store instance, which makes
/// them the authoritative ordering source for last-write-wins fields like a
/// conversation summary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a timestamp from microseconds since the Unix epoch.
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self(crate::time::now_timestamp_micros())
    }

    /// Microseconds since the Unix epoch.
    pub fn as_micros(self) -> i64 {
        self.0
    }
}

/// A reference to a single document within a collection.
///
/// Collection paths may be nested, e.g. `chats/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    /// Full collection path.
    pub collection: String,
    /// Document id within the collection.
    pub id: String,
}

impl DocumentRef {
    /// Create a reference from a collection path and document id.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Full path of the document, `collection/id`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

/// A document as returned from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document id within its collection.
    pub id: String,
    /// Field data.
    pub data: Map<String, Value>,
    /// Commit time of the write that created the document.
    pub create_time: Timestamp,
    /// Commit time of the most recent write.
    pub update_time: Timestamp,
    /// Monotonic per-document version, bumped on every committed write.
    pub version: u64,
}

impl Document {
    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Decode the document data into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = Value::Object(self.data.clone());
        serde_json::from_value(value).map_err(Error::from)
    }
}

/// Sentinel value resolved to the commit timestamp when the write applies.
///
/// Only recognized in top-level fields of a write payload.
pub fn server_timestamp() -> Value {
    let mut map = Map::new();
    map.insert(SERVER_TIMESTAMP_FIELD.to_string(), Value::Bool(true));
    Value::Object(map)
}

/// Check whether a value is the server-timestamp sentinel.
pub(crate) fn is_server_timestamp(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.len() == 1 && map.get(SERVER_TIMESTAMP_FIELD).is_some(),
        _ => false,
    }
}

/// Convert a write payload into a field map, rejecting non-object payloads.
pub(crate) fn into_fields(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::Serialization(format!(
            "write payload must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// TESTS
// ============================================================================
