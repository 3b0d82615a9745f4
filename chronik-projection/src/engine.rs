use std::time::Duration;

use async_trait::async_trait;
use chronik_store::StreamName;
use dyn_clone::DynClone;
use serde_json::Value;

use crate::error::Result;
use crate::status::ProjectionStatus;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "mysql")]
pub use mysql::*;
#[cfg(feature = "postgres")]
pub use postgres::*;

pub const DEFAULT_PROJECTIONS_TABLE: &str = "projections";

/// Which streams feed a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStreams {
    /// Every stream whose name does not start with `$`.
    All,
    Categories(Vec<String>),
    Streams(Vec<StreamName>),
}

/// SQL surface of the shared `projections` registry, per dialect.
///
/// Lease semantics: `acquire_lock` succeeds iff no other process holds an
/// effective lease (`locked_until` null or expired); `renew_lock` and
/// `persist` extend the lease of the current holder; a row count of zero on
/// renewal means the lease was lost.
#[async_trait]
pub trait ProjectionEngine: DynClone + Send + Sync {
    /// Inserts an idle registry row with empty position and state unless one
    /// exists.
    async fn create_if_missing(&self, name: &str) -> Result<()>;

    async fn acquire_lock(&self, name: &str, lock_timeout: Duration) -> Result<()>;

    async fn renew_lock(&self, name: &str, lock_timeout: Duration) -> Result<()>;

    /// Marks the projection running again after a reset, renewing the lease.
    async fn start_again(&self, name: &str, lock_timeout: Duration) -> Result<()>;

    async fn persist(
        &self,
        name: &str,
        position: &Value,
        state: &Value,
        lock_timeout: Duration,
    ) -> Result<()>;

    /// Clears position and replaces state, keeping the given status.
    async fn reset_row(&self, name: &str, state: &Value, status: ProjectionStatus) -> Result<()>;

    /// Releases the lease and flips the status back to idle.
    async fn release_lock(&self, name: &str) -> Result<()>;

    /// Writes a desired status; the running projector observes it on its
    /// next poll. A missing row is a `ProjectionNotFound` error.
    async fn update_status(&self, name: &str, status: ProjectionStatus) -> Result<()>;

    async fn delete_row(&self, name: &str) -> Result<()>;

    /// Persisted `(position, state)` of the projection, if the row exists.
    async fn load(&self, name: &str) -> Result<Option<(Value, Value)>>;

    async fn fetch_status(&self, name: &str) -> Result<Option<ProjectionStatus>>;

    async fn fetch_position(&self, name: &str) -> Result<Option<Value>>;

    async fn fetch_state(&self, name: &str) -> Result<Option<Value>>;

    async fn fetch_names(
        &self,
        filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>>;

    async fn fetch_names_regex(&self, filter: &str, limit: i64, offset: i64)
        -> Result<Vec<String>>;

    /// Resolves the streams feeding a projection from the `event_streams`
    /// registry; explicit stream lists pass through untouched.
    async fn fetch_source_streams(&self, source: &SourceStreams) -> Result<Vec<StreamName>>;

    /// DDL for the `projections` registry.
    fn schema_statements(&self) -> Vec<String>;
}

dyn_clone::clone_trait_object!(ProjectionEngine);
