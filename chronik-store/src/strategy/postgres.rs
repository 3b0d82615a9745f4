use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::event::Event;
use crate::strategy::{PersistenceStrategy, SqlValue};
use crate::stream::StreamName;

fn row_values(event: &Event) -> Vec<SqlValue> {
    vec![
        SqlValue::Uuid(event.event_id),
        SqlValue::String(event.event_name.clone()),
        SqlValue::Json(event.payload.clone()),
        SqlValue::Json(Value::Object(event.metadata.clone())),
        SqlValue::Timestamp(event.created_at),
    ]
}

fn table_name(stream: &StreamName) -> String {
    match stream.schema() {
        Some(schema) => format!("{}.{}", schema, stream.table_name()),
        None => stream.table_name(),
    }
}

/// One stream per aggregate instance; `no` carries the aggregate version.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAggregateStreamStrategy;

impl PersistenceStrategy for PostgresAggregateStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE {table_name} (\n\
                 no BIGSERIAL,\n\
                 event_id UUID NOT NULL,\n\
                 event_name VARCHAR(100) NOT NULL,\n\
                 payload JSON NOT NULL,\n\
                 metadata JSONB NOT NULL,\n\
                 created_at TIMESTAMP(6) NOT NULL,\n\
                 PRIMARY KEY (no),\n\
                 UNIQUE (event_id)\n\
                 );"
            ),
            format!("CREATE UNIQUE INDEX ON {table_name} ((metadata->>'_aggregate_version'));"),
        ]
    }

    fn column_names(&self) -> &'static [&'static str] {
        &[
            "no",
            "event_id",
            "event_name",
            "payload",
            "metadata",
            "created_at",
        ]
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

    fn table_name(&self, stream: &StreamName) -> String {
        table_name(stream)
    }
}

/// One stream per aggregate type, with composite uniqueness over
/// `(_aggregate_type, _aggregate_id, _aggregate_version)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresSingleStreamStrategy;

impl PersistenceStrategy for PostgresSingleStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE {table_name} (\n\
                 no BIGSERIAL,\n\
                 event_id UUID NOT NULL,\n\
                 event_name VARCHAR(100) NOT NULL,\n\
                 payload JSON NOT NULL,\n\
                 metadata JSONB NOT NULL,\n\
                 created_at TIMESTAMP(6) NOT NULL,\n\
                 PRIMARY KEY (no),\n\
                 CONSTRAINT aggregate_version_not_null CHECK ((metadata->>'_aggregate_version') IS NOT NULL),\n\
                 CONSTRAINT aggregate_type_not_null CHECK ((metadata->>'_aggregate_type') IS NOT NULL),\n\
                 CONSTRAINT aggregate_id_not_null CHECK ((metadata->>'_aggregate_id') IS NOT NULL),\n\
                 UNIQUE (event_id)\n\
                 );"
            ),
            format!(
                "CREATE UNIQUE INDEX ON {table_name} \
                 ((metadata->>'_aggregate_type'), (metadata->>'_aggregate_id'), (metadata->>'_aggregate_version'));"
            ),
            format!(
                "CREATE INDEX ON {table_name} \
                 ((metadata->>'_aggregate_type'), (metadata->>'_aggregate_id'));"
            ),
        ]
    }

    fn column_names(&self) -> &'static [&'static str] {
        &[
            "event_id",
            "event_name",
            "payload",
            "metadata",
            "created_at",
        ]
    }

    fn prepare_data(&self, events: &[Event]) -> Result<Vec<SqlValue>> {
        Ok(events.iter().flat_map(row_values).collect())
    }

    fn table_name(&self, stream: &StreamName) -> String {
        table_name(stream)
    }
}

/// No aggregate constraints; only `event_id` uniqueness.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresSimpleStreamStrategy;

impl PersistenceStrategy for PostgresSimpleStreamStrategy {
    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {table_name} (\n\
             no BIGSERIAL,\n\
             event_id UUID NOT NULL,\n\
             event_name VARCHAR(100) NOT NULL,\n\
             payload JSON NOT NULL,\n\
             metadata JSONB NOT NULL,\n\
             created_at TIMESTAMP(6) NOT NULL,\n\
             PRIMARY KEY (no),\n\
             UNIQUE (event_id)\n\
             );"
        )]
    }

    fn column_names(&self) -> &'static [&'static str] {
        &[
            "event_id",
            "event_name",
            "payload",
            "metadata",
            "created_at",
        ]
    }

    fn prepare_data(&self, events: &[Event]) -> Result<Vec<SqlValue>> {
        Ok(events.iter().flat_map(row_values).collect())
    }

    fn table_name(&self, stream: &StreamName) -> String {
        table_name(stream)
    }
}
