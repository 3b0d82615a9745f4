use serde_json::Value;

use crate::codec;
use crate::error::{Result, StoreError};
use crate::event::Event;
use crate::strategy::mysql::{
    SINGLE_STREAM_INDEXED_FIELDS, WITHOUT_NO_COLUMNS, WITH_NO_COLUMNS,
};
use crate::strategy::{PersistenceStrategy, SqlValue};

// MariaDB has no native JSON column type; payload and metadata are LONGTEXT
// guarded by json_valid checks, and bind as encoded strings.
fn row_values(event: &Event) -> Result<Vec<SqlValue>> {
    Ok(vec![
        SqlValue::String(event.event_id.to_string()),
        SqlValue::String(event.event_name.clone()),
        SqlValue::String(codec::encode(&event.payload)?),
        SqlValue::String(codec::encode(&Value::Object(event.metadata.clone()))?),
        SqlValue::Timestamp(event.created_at),
    ])
}

/// One stream per aggregate instance; `no` carries the aggregate version.
#[derive(Debug, Clone, Copy, Default)]
pub struct MariaDbAggregateStreamStrategy;

impl PersistenceStrategy for MariaDbAggregateStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {table_name} (\n\
             no BIGINT NOT NULL AUTO_INCREMENT,\n\
             event_id CHAR(36) COLLATE utf8mb4_bin NOT NULL,\n\
             event_name VARCHAR(100) COLLATE utf8mb4_bin NOT NULL,\n\
             payload LONGTEXT NOT NULL,\n\
             metadata LONGTEXT NOT NULL,\n\
             created_at DATETIME(6) NOT NULL,\n\
             aggregate_version INT UNSIGNED GENERATED ALWAYS AS \
             (JSON_VALUE(metadata, '$._aggregate_version')) PERSISTENT,\n\
             PRIMARY KEY (no),\n\
             UNIQUE KEY ix_event_id (event_id),\n\
             UNIQUE KEY ix_aggregate_version (aggregate_version),\n\
             CHECK (JSON_VALID(payload)),\n\
             CHECK (JSON_VALID(metadata))\n\
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
            values.extend(row_values(event)?);
        }

        Ok(values)
    }
}

/// One stream per aggregate type, with composite uniqueness over persistent
/// generated columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct MariaDbSingleStreamStrategy;

impl PersistenceStrategy for MariaDbSingleStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {table_name} (\n\
             no BIGINT NOT NULL AUTO_INCREMENT,\n\
             event_id CHAR(36) COLLATE utf8mb4_bin NOT NULL,\n\
             event_name VARCHAR(100) COLLATE utf8mb4_bin NOT NULL,\n\
             payload LONGTEXT NOT NULL,\n\
             metadata LONGTEXT NOT NULL,\n\
             created_at DATETIME(6) NOT NULL,\n\
             aggregate_version INT UNSIGNED GENERATED ALWAYS AS \
             (JSON_VALUE(metadata, '$._aggregate_version')) PERSISTENT,\n\
             aggregate_id CHAR(36) GENERATED ALWAYS AS \
             (JSON_VALUE(metadata, '$._aggregate_id')) PERSISTENT,\n\
             aggregate_type VARCHAR(150) GENERATED ALWAYS AS \
             (JSON_VALUE(metadata, '$._aggregate_type')) PERSISTENT,\n\
             PRIMARY KEY (no),\n\
             UNIQUE KEY ix_event_id (event_id),\n\
             UNIQUE KEY ix_unique_event (aggregate_type, aggregate_id, aggregate_version),\n\
             KEY ix_query_aggregate (aggregate_type, aggregate_id, no),\n\
             CHECK (JSON_VALID(payload)),\n\
             CHECK (JSON_VALID(metadata))\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;"
        )]
    }

    fn column_names(&self) -> &'static [&'static str] {
        &WITHOUT_NO_COLUMNS
    }

    fn prepare_data(&self, events: &[Event]) -> Result<Vec<SqlValue>> {
        let mut values = Vec::with_capacity(events.len() * self.column_names().len());

        for event in events {
            values.extend(row_values(event)?);
        }

        Ok(values)
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
pub struct MariaDbSimpleStreamStrategy;

impl PersistenceStrategy for MariaDbSimpleStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {table_name} (\n\
             no BIGINT NOT NULL AUTO_INCREMENT,\n\
             event_id CHAR(36) COLLATE utf8mb4_bin NOT NULL,\n\
             event_name VARCHAR(100) COLLATE utf8mb4_bin NOT NULL,\n\
             payload LONGTEXT NOT NULL,\n\
             metadata LONGTEXT NOT NULL,\n\
             created_at DATETIME(6) NOT NULL,\n\
             PRIMARY KEY (no),\n\
             UNIQUE KEY ix_event_id (event_id),\n\
             CHECK (JSON_VALID(payload)),\n\
             CHECK (JSON_VALID(metadata))\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;"
        )]
    }

    fn column_names(&self) -> &'static [&'static str] {
        &WITHOUT_NO_COLUMNS
    }

    fn prepare_data(&self, events: &[Event]) -> Result<Vec<SqlValue>> {
        let mut values = Vec::with_capacity(events.len() * self.column_names().len());

        for event in events {
            values.extend(row_values(event)?);
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_binds_as_encoded_json_text() {
        let strategy = MariaDbSimpleStreamStrategy;
        let events = vec![Event::new("user-created")
            .payload(serde_json::json!({"name": "John"}))
            .unwrap()];

        let values = strategy.prepare_data(&events).unwrap();

        assert_eq!(values[2], SqlValue::String(r#"{"name":"John"}"#.into()));
    }
}
