use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};

use crate::event::Event;

/// Logical stream name.
///
/// The substring before the first `-` is the stream's category. The physical
/// table name is `_` followed by the hex-encoded SHA-1 of the full logical
/// name; a prefix before the first `.` is treated as a schema on dialects
/// that support one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> Option<&str> {
        self.0.split_once('-').map(|(category, _)| category)
    }

    pub fn schema(&self) -> Option<&str> {
        self.0.split_once('.').map(|(schema, _)| schema)
    }

    /// Physical table name, without schema qualification.
    pub fn table_name(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.0.as_bytes());

        format!("_{}", hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for StreamName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A stream to be created: logical name, stream metadata and initial events.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    pub name: StreamName,
    pub metadata: Map<String, Value>,
    pub events: Vec<Event>,
}

impl Stream {
    pub fn new<N: Into<StreamName>>(name: N) -> Self {
        Self {
            name: name.into(),
            metadata: Map::new(),
            events: Vec::new(),
        }
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;

        self
    }

    pub fn events(mut self, events: Vec<Event>) -> Self {
        self.events = events;

        self
    }
}

impl Default for StreamName {
    fn default() -> Self {
        Self(String::default())
    }
}
