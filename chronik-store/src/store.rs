use async_trait::async_trait;
use dyn_clone::DynClone;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::event::Event;
use crate::iterator::StreamIterator;
use crate::matcher::MetadataMatcher;
use crate::stream::{Stream, StreamName};

pub const DEFAULT_EVENT_STREAMS_TABLE: &str = "event_streams";
pub const DEFAULT_LOAD_BATCH_SIZE: i64 = 10_000;

/// Append-only event store over per-stream tables and a central
/// `event_streams` registry.
///
/// Streams exist iff their registry row and table exist; `create` establishes
/// both atomically and `delete` tears both down. Within a stream, events read
/// back in `no` order, which is insertion order.
#[async_trait]
pub trait EventStore: DynClone + Send + Sync {
    /// Registers the stream, creates its table and appends the initial
    /// events, all in one transaction unless transaction handling is
    /// disabled.
    async fn create(&self, stream: Stream) -> Result<()>;

    /// Appends a batch of events. An empty batch is a no-op. Fails with a
    /// concurrency error when the write lock cannot be acquired or a
    /// uniqueness constraint is violated; no event of the batch is persisted
    /// in that case.
    async fn append_to(&self, stream_name: &StreamName, events: Vec<Event>) -> Result<()>;

    /// Iterates events with `no >= from_number` (default 1) in ascending
    /// order, filtered by the matcher.
    async fn load(
        &self,
        stream_name: &StreamName,
        from_number: Option<i64>,
        count: Option<i64>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<StreamIterator>;

    /// Iterates events with `no <= from_number` (default `i64::MAX`) in
    /// descending order.
    async fn load_reverse(
        &self,
        stream_name: &StreamName,
        from_number: Option<i64>,
        count: Option<i64>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<StreamIterator>;

    /// Removes the registry row and drops the stream table.
    async fn delete(&self, stream_name: &StreamName) -> Result<()>;

    async fn has_stream(&self, stream_name: &StreamName) -> Result<bool>;

    async fn fetch_stream_metadata(&self, stream_name: &StreamName)
        -> Result<Map<String, Value>>;

    async fn update_stream_metadata(
        &self,
        stream_name: &StreamName,
        metadata: Map<String, Value>,
    ) -> Result<()>;

    /// Ordered page of logical stream names. `filter` is an exact match;
    /// the matcher applies to stream metadata.
    async fn fetch_stream_names(
        &self,
        filter: Option<&str>,
        matcher: Option<&MetadataMatcher>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StreamName>>;

    /// Like `fetch_stream_names`, with a regex filter validated client-side.
    async fn fetch_stream_names_regex(
        &self,
        filter: &str,
        matcher: Option<&MetadataMatcher>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StreamName>>;

    async fn fetch_category_names(
        &self,
        filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>>;

    async fn fetch_category_names_regex(
        &self,
        filter: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>>;
}

dyn_clone::clone_trait_object!(EventStore);

/// Client-side validation for `_regex` filters; empty or malformed patterns
/// never reach the database.
pub fn validate_regex(pattern: &str) -> Result<()> {
    use crate::error::StoreError;

    if pattern.is_empty() {
        return Err(StoreError::InvalidArgument(
            "empty regex pattern given".into(),
        ));
    }

    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|err| StoreError::InvalidArgument(format!("invalid regex pattern: {err}")))
}
