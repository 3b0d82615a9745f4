use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::event::Event;
use crate::stream::StreamName;

#[cfg(feature = "mysql")]
mod mariadb;
#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "mysql")]
pub use mariadb::*;
#[cfg(feature = "mysql")]
pub use mysql::*;
#[cfg(feature = "postgres")]
pub use postgres::*;

/// A value bound into a batch insert, in `column_names()` order.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    String(String),
    Uuid(Uuid),
    Json(Value),
    Timestamp(DateTime<Utc>),
}

/// Bundles the per-stream decisions of a dialect: table DDL, insert column
/// order, and row serialization. Strategies may additionally advertise a
/// query-hint index and a projection of metadata fields onto generated
/// columns.
pub trait PersistenceStrategy: DynClone + Send + Sync {
    /// Ordered DDL statements creating the stream table. `table_name` is
    /// already quoted for the dialect.
    fn create_schema(&self, table_name: &str) -> Vec<String>;

    fn column_names(&self) -> &'static [&'static str];

    /// Flattens a batch into one bind-value group per event, in
    /// `column_names()` order.
    fn prepare_data(&self, events: &[Event]) -> Result<Vec<SqlValue>>;

    /// Physical table name for a stream, including an optional schema
    /// prefix on dialects that support one.
    fn table_name(&self, stream: &StreamName) -> String {
        stream.table_name()
    }

    /// Index to advertise as a query hint (`USE INDEX`) on dialects that
    /// accept one.
    fn index_name(&self) -> Option<&'static str> {
        None
    }

    /// Metadata fields projected onto dedicated columns, as
    /// `(metadata field, column)` pairs. Matchers against these fields are
    /// rewritten to target the column.
    fn indexed_metadata_fields(&self) -> Option<&'static [(&'static str, &'static str)]> {
        None
    }
}

dyn_clone::clone_trait_object!(PersistenceStrategy);
