use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::event::Event;
use crate::strategy::{PersistenceStrategy, SqlValue};

pub(crate) fn row_values(event: &Event) -> Vec<SqlValue> {
    vec![
        SqlValue::String(event.event_id.to_string()),
        SqlValue::String(event.event_name.clone()),
        SqlValue::Json(event.payload.clone()),
        SqlValue::Json(Value::Object(event.metadata.clone())),
        SqlValue::Timestamp(event.created_at),
    ]
}

pub(crate) const WITH_NO_COLUMNS: [&str; 6] = [
    "no",
    "event_id",
    "event_name",
    "payload",
    "metadata",
    "created_at",
];

pub(crate) const WITHOUT_NO_COLUMNS: [&str; 5] =
    ["event_id", "event_name", "payload", "metadata", "created_at"];

/// One stream per aggregate instance; `no` carries the aggregate version.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlAggregateStreamStrategy;

impl PersistenceStrategy for MySqlAggregateStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {table_name} (\n\
             no BIGINT NOT NULL AUTO_INCREMENT,\n\
             event_id CHAR(36) COLLATE utf8mb4_bin NOT NULL,\n\
             event_name VARCHAR(100) COLLATE utf8mb4_bin NOT NULL,\n\
             payload JSON NOT NULL,\n\
             metadata JSON NOT NULL,\n\
             created_at DATETIME(6) NOT NULL,\n\
             aggregate_version INT UNSIGNED GENERATED ALWAYS AS \
             (JSON_EXTRACT(metadata, '$._aggregate_version')) STORED NOT NULL,\n\
             PRIMARY KEY (no),\n\
             UNIQUE KEY ix_event_id (event_id),\n\
             UNIQUE KEY ix_aggregate_version (aggregate_version)\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;"
        )]
    }

    fn column_names(&self) -> &'static [&'static str] {
        &WITH_NO_COLUMNS
    }

    fn prepare_data(&self, events: &[Event]) -> Result<Vec<SqlValue>> {
        let mut values = Vec::with_capacity(events.len() * self.column_names().len());

        for event in events {
            let version = event
                .aggregate_version()
                .ok_or(StoreError::AggregateVersionMissing)?;

            values.push(SqlValue::Int(version));
            values.extend(row_values(event));
        }

        Ok(values)
    }
}

/// One stream per aggregate type. Generated columns back the composite
/// uniqueness and give the event store an index to hint with.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlSingleStreamStrategy;

pub(crate) const SINGLE_STREAM_INDEXED_FIELDS: [(&str, &str); 3] = [
    ("_aggregate_id", "aggregate_id"),
    ("_aggregate_type", "aggregate_type"),
    ("_aggregate_version", "aggregate_version"),
];

impl PersistenceStrategy for MySqlSingleStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {table_name} (\n\
             no BIGINT NOT NULL AUTO_INCREMENT,\n\
             event_id CHAR(36) COLLATE utf8mb4_bin NOT NULL,\n\
             event_name VARCHAR(100) COLLATE utf8mb4_bin NOT NULL,\n\
             payload JSON NOT NULL,\n\
             metadata JSON NOT NULL,\n\
             created_at DATETIME(6) NOT NULL,\n\
             aggregate_version INT UNSIGNED GENERATED ALWAYS AS \
             (JSON_EXTRACT(metadata, '$._aggregate_version')) STORED NOT NULL,\n\
             aggregate_id CHAR(36) GENERATED ALWAYS AS \
             (JSON_UNQUOTE(JSON_EXTRACT(metadata, '$._aggregate_id'))) STORED NOT NULL,\n\
             aggregate_type VARCHAR(150) GENERATED ALWAYS AS \
             (JSON_UNQUOTE(JSON_EXTRACT(metadata, '$._aggregate_type'))) STORED NOT NULL,\n\
             PRIMARY KEY (no),\n\
             UNIQUE KEY ix_event_id (event_id),\n\
             UNIQUE KEY ix_unique_event (aggregate_type, aggregate_id, aggregate_version),\n\
             KEY ix_query_aggregate (aggregate_type, aggregate_id, no)\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;"
        )]
    }

    fn column_names(&self) -> &'static [&'static str] {
        &WITHOUT_NO_COLUMNS
    }

    fn prepare_data(&self, events: &[Event]) -> Result<Vec<SqlValue>> {
        Ok(events.iter().flat_map(row_values).collect())
    }

    fn index_name(&self) -> Option<&'static str> {
        Some("ix_query_aggregate")
    }

    fn indexed_metadata_fields(&self) -> Option<&'static [(&'static str, &'static str)]> {
        Some(&SINGLE_STREAM_INDEXED_FIELDS)
    }
}

/// No aggregate constraints; only `event_id` uniqueness.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlSimpleStreamStrategy;

impl PersistenceStrategy for MySqlSimpleStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {table_name} (\n\
             no BIGINT NOT NULL AUTO_INCREMENT,\n\
             event_id CHAR(36) COLLATE utf8mb4_bin NOT NULL,\n\
             event_name VARCHAR(100) COLLATE utf8mb4_bin NOT NULL,\n\
             payload JSON NOT NULL,\n\
             metadata JSON NOT NULL,\n\
             created_at DATETIME(6) NOT NULL,\n\
             PRIMARY KEY (no),\n\
             UNIQUE KEY ix_event_id (event_id)\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;"
        )]
    }

    fn column_names(&self) -> &'static [&'static str] {
        &WITHOUT_NO_COLUMNS
    }

    fn prepare_data(&self, events: &[Event]) -> Result<Vec<SqlValue>> {
        Ok(events.iter().flat_map(row_values).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_stream_advertises_query_hint_and_projection() {
        let strategy = MySqlSingleStreamStrategy;

        assert_eq!(strategy.index_name(), Some("ix_query_aggregate"));
        assert!(strategy
            .indexed_metadata_fields()
            .unwrap()
            .contains(&("_aggregate_id", "aggregate_id")));
    }

    #[test]
    fn event_id_binds_as_text() {
        let strategy = MySqlSimpleStreamStrategy;
        let events = vec![Event::new("user-created")];

        let values = strategy.prepare_data(&events).unwrap();

        assert!(matches!(&values[0], SqlValue::String(id) if id.len() == 36));
    }

    #[test]
    fn aggregate_strategy_requires_aggregate_version() {
        let strategy = MySqlAggregateStreamStrategy;
        let events = vec![Event::new("user-created")];

        assert!(matches!(
            strategy.prepare_data(&events).unwrap_err(),
            StoreError::AggregateVersionMissing
        ));
    }
}
