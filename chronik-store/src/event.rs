use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Metadata key under which the stream position (`no`) of a stored event is
/// exposed on read. Pre-existing values are preserved verbatim.
pub const POSITION_KEY: &str = "_position";

pub const AGGREGATE_ID_KEY: &str = "_aggregate_id";
pub const AGGREGATE_TYPE_KEY: &str = "_aggregate_type";
pub const AGGREGATE_VERSION_KEY: &str = "_aggregate_version";

/// Immutable domain event envelope.
///
/// Payload is an arbitrary JSON value, metadata is always a JSON object.
/// `created_at` is stored with microsecond precision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: Uuid,
    pub event_name: String,
    pub payload: Value,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            event_name: name.into(),
            ..Self::default()
        }
    }

    pub fn payload<D: Serialize>(mut self, value: D) -> Result<Self> {
        self.payload = serde_json::to_value(&value)?;

        Ok(self)
    }

    pub fn to_payload<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn metadata<M: Serialize>(mut self, value: M) -> Result<Self> {
        let metadata = serde_json::to_value(&value)?;

        match metadata {
            Value::Object(map) => {
                self.metadata = map;

                Ok(self)
            }
            _ => Err(StoreError::MetadataInvalidObjectType),
        }
    }

    pub fn with_added_metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());

        self
    }

    /// The stream position of a stored event, read from `_position`.
    pub fn position(&self) -> Option<i64> {
        self.metadata.get(POSITION_KEY).and_then(Value::as_i64)
    }

    pub fn aggregate_version(&self) -> Option<i64> {
        self.metadata
            .get(AGGREGATE_VERSION_KEY)
            .and_then(Value::as_i64)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_name: String::default(),
            payload: Value::Null,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }
}
