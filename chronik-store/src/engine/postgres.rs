use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::event::Event;
use crate::iterator::{BatchFetcher, StreamIterator};
use crate::lock::{NoLock, WriteLockStrategy};
use crate::matcher::{push_matcher, MetadataMatcher, POSTGRES_STYLE};
use crate::quote::Quoting;
use crate::store::{
    validate_regex, EventStore, DEFAULT_EVENT_STREAMS_TABLE, DEFAULT_LOAD_BATCH_SIZE,
};
use crate::strategy::{PersistenceStrategy, SqlValue};
use crate::stream::{Stream, StreamName};

const UNDEFINED_TABLE: &str = "42P01";
const UNDEFINED_COLUMN: &str = "42703";
const INVALID_REGEX: &str = "2201B";

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

fn runtime(err: sqlx::Error) -> StoreError {
    match sqlstate(&err) {
        Some(code) => StoreError::Runtime {
            code,
            message: err.to_string(),
        },
        None => err.into(),
    }
}

#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    strategy: Arc<dyn PersistenceStrategy>,
    write_lock: Arc<dyn WriteLockStrategy<Postgres>>,
    event_streams_table: String,
    load_batch_size: i64,
    disable_transaction_handling: bool,
}

impl PostgresEventStore {
    pub fn new<S: PersistenceStrategy + 'static>(pool: &PgPool, strategy: S) -> Self {
        Self {
            pool: pool.clone(),
            strategy: Arc::new(strategy),
            write_lock: Arc::new(NoLock),
            event_streams_table: DEFAULT_EVENT_STREAMS_TABLE.to_owned(),
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
            disable_transaction_handling: false,
        }
    }

    pub fn event_streams_table(mut self, table: impl Into<String>) -> Self {
        self.event_streams_table = table.into();

        self
    }

    pub fn load_batch_size(mut self, size: i64) -> Self {
        self.load_batch_size = size.max(1);

        self
    }

    /// Leaves all transaction control to the caller. A failed `create` can
    /// then leave the registry row behind; the table itself is still dropped.
    pub fn disable_transaction_handling(mut self, disable: bool) -> Self {
        self.disable_transaction_handling = disable;

        self
    }

    pub fn write_lock_strategy<L: WriteLockStrategy<Postgres> + 'static>(
        mut self,
        strategy: L,
    ) -> Self {
        self.write_lock = Arc::new(strategy);

        self
    }

    /// DDL for the central `event_streams` registry.
    pub fn schema_statements(event_streams_table: &str) -> Vec<String> {
        let table = Quoting::Double.quote_table(event_streams_table);

        vec![
            format!(
                "CREATE TABLE {table} (\n\
                 no BIGSERIAL,\n\
                 real_stream_name VARCHAR(150) NOT NULL,\n\
                 stream_name VARCHAR(150) NOT NULL,\n\
                 metadata JSONB,\n\
                 category VARCHAR(150),\n\
                 PRIMARY KEY (no),\n\
                 UNIQUE (stream_name)\n\
                 );"
            ),
            format!("CREATE UNIQUE INDEX ON {table} (real_stream_name);"),
            format!("CREATE INDEX ON {table} (category);"),
        ]
    }

    fn streams_table(&self) -> String {
        Quoting::Double.quote_table(&self.event_streams_table)
    }

    fn stream_table(&self, stream: &StreamName) -> String {
        Quoting::Double.quote_table(&self.strategy.table_name(stream))
    }

    async fn create_inner(
        &self,
        conn: &mut PgConnection,
        name: &StreamName,
        metadata: &Map<String, Value>,
        events: Vec<Event>,
    ) -> Result<()> {
        let insert = format!(
            "INSERT INTO {} (real_stream_name, stream_name, metadata, category) \
             VALUES ($1, $2, $3, $4)",
            self.streams_table()
        );

        sqlx::query(&insert)
            .bind(name.as_str())
            .bind(self.strategy.table_name(name))
            .bind(Value::Object(metadata.clone()))
            .bind(name.category())
            .execute(&mut *conn)
            .await
            .map_err(|err| match sqlstate(&err) {
                Some(code) if code.starts_with("23") => {
                    StoreError::StreamExistsAlready(name.to_string())
                }
                _ => runtime(err),
            })?;

        let table = self.stream_table(name);
        for statement in self.strategy.create_schema(&table) {
            sqlx::query(&statement)
                .execute(&mut *conn)
                .await
                .map_err(runtime)?;
        }

        self.append_on(conn, name, events, false).await
    }

    async fn append_on(
        &self,
        conn: &mut PgConnection,
        name: &StreamName,
        events: Vec<Event>,
        own_transaction: bool,
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let values = self.strategy.prepare_data(&events)?;
        let table_name = self.strategy.table_name(name);
        let lock_name = format!("{table_name}_write_lock");

        if !self.write_lock.acquire(&mut *conn, &lock_name).await? {
            return Err(StoreError::Concurrency(format!(
                "failed to acquire write lock for stream {name}"
            )));
        }

        let table = Quoting::Double.quote_table(&table_name);
        let result = self
            .insert_events(conn, &table, name, &values, own_transaction)
            .await;
        let released = self.write_lock.release(&mut *conn, &lock_name).await;

        result?;
        released?;

        Ok(())
    }

    async fn insert_events(
        &self,
        conn: &mut PgConnection,
        table: &str,
        name: &StreamName,
        values: &[SqlValue],
        own_transaction: bool,
    ) -> Result<()> {
        if own_transaction && !self.disable_transaction_handling {
            let mut tx = conn.begin().await?;

            match self.exec_insert(&mut tx, table, name, values).await {
                Ok(()) => Ok(tx.commit().await?),
                Err(err) => {
                    tx.rollback().await?;

                    Err(err)
                }
            }
        } else {
            self.exec_insert(conn, table, name, values).await
        }
    }

    async fn exec_insert(
        &self,
        conn: &mut PgConnection,
        table: &str,
        name: &StreamName,
        values: &[SqlValue],
    ) -> Result<()> {
        let columns = self.strategy.column_names();
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} ({}) ",
            columns.join(", ")
        ));

        qb.push_values(values.chunks(columns.len()), |mut b, row| {
            for value in row {
                match value {
                    SqlValue::Int(v) => b.push_bind(*v),
                    SqlValue::String(v) => b.push_bind(v.clone()),
                    SqlValue::Uuid(v) => b.push_bind(*v),
                    SqlValue::Json(v) => b.push_bind(v.clone()),
                    SqlValue::Timestamp(v) => b.push_bind(*v),
                };
            }
        });

        qb.build()
            .execute(&mut *conn)
            .await
            .map(drop)
            .map_err(|err| match sqlstate(&err).as_deref() {
                Some(UNDEFINED_TABLE) => StoreError::StreamNotFound(name.to_string()),
                Some(code) if code.starts_with("23") => StoreError::Concurrency(format!(
                    "concurrent write to stream {name} detected"
                )),
                _ => runtime(err),
            })
    }

    fn fetcher(
        &self,
        name: &StreamName,
        from_number: i64,
        matcher: Option<&MetadataMatcher>,
        forward: bool,
    ) -> PgBatchFetcher {
        PgBatchFetcher {
            pool: self.pool.clone(),
            table: self.stream_table(name),
            stream: name.to_string(),
            matcher: matcher.cloned(),
            indexed: self.strategy.indexed_metadata_fields(),
            from_number,
            forward,
        }
    }

    /// Maps iteration errors surfacing during the eager probe to the load
    /// contract: unknown matcher columns stay unexpected-value, everything
    /// else means the stream is gone.
    fn load_error(name: &StreamName, err: StoreError) -> StoreError {
        match err {
            err @ StoreError::UnexpectedValue(_) => err,
            StoreError::Runtime { .. } | StoreError::StreamNotFound(_) => {
                StoreError::StreamNotFound(name.to_string())
            }
            err => err,
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn create(&self, stream: Stream) -> Result<()> {
        let Stream {
            name,
            metadata,
            events,
        } = stream;

        let mut conn = self.pool.acquire().await?;

        let result = if self.disable_transaction_handling {
            self.create_inner(&mut conn, &name, &metadata, events).await
        } else {
            let mut tx = conn.begin().await?;

            match self.create_inner(&mut tx, &name, &metadata, events).await {
                Ok(()) => tx.commit().await.map_err(StoreError::from),
                Err(err) => {
                    tx.rollback().await?;

                    Err(err)
                }
            }
        };

        if let Err(err) = result {
            let drop_table = format!("DROP TABLE IF EXISTS {}", self.stream_table(&name));
            let _ = sqlx::query(&drop_table).execute(&mut *conn).await;

            let remove_row = format!(
                "DELETE FROM {} WHERE real_stream_name = $1",
                self.streams_table()
            );
            let _ = sqlx::query(&remove_row)
                .bind(name.as_str())
                .execute(&mut *conn)
                .await;

            return Err(err);
        }

        Ok(())
    }

    async fn append_to(&self, stream_name: &StreamName, events: Vec<Event>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await?;

        self.append_on(&mut conn, stream_name, events, true).await
    }

    async fn load(
        &self,
        stream_name: &StreamName,
        from_number: Option<i64>,
        count: Option<i64>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<StreamIterator> {
        if matches!(count, Some(count) if count <= 0) {
            return Ok(StreamIterator::empty());
        }

        let from = from_number.unwrap_or(1);
        let fetcher = self.fetcher(stream_name, from, matcher, true);
        let mut iterator = StreamIterator::new(
            Box::new(fetcher),
            self.load_batch_size,
            from,
            count,
            true,
        );

        iterator
            .prime()
            .await
            .map_err(|err| Self::load_error(stream_name, err))?;

        Ok(iterator)
    }

    async fn load_reverse(
        &self,
        stream_name: &StreamName,
        from_number: Option<i64>,
        count: Option<i64>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<StreamIterator> {
        if matches!(count, Some(count) if count <= 0) {
            return Ok(StreamIterator::empty());
        }

        let from = from_number.unwrap_or(i64::MAX);
        let fetcher = self.fetcher(stream_name, from, matcher, false);

        let total = fetcher
            .count()
            .await
            .map_err(|err| Self::load_error(stream_name, err))?;

        if total == 0 {
            return Ok(StreamIterator::empty());
        }

        Ok(StreamIterator::new(
            Box::new(fetcher),
            self.load_batch_size,
            from,
            count,
            false,
        ))
    }

    async fn delete(&self, stream_name: &StreamName) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        if self.disable_transaction_handling {
            return self.delete_inner(&mut conn, stream_name).await;
        }

        let mut tx = conn.begin().await?;

        match self.delete_inner(&mut tx, stream_name).await {
            Ok(()) => Ok(tx.commit().await?),
            Err(err) => {
                tx.rollback().await?;

                Err(err)
            }
        }
    }

    async fn has_stream(&self, stream_name: &StreamName) -> Result<bool> {
        let select = format!(
            "SELECT 1 FROM {} WHERE real_stream_name = $1",
            self.streams_table()
        );

        let row: Option<i32> = sqlx::query_scalar(&select)
            .bind(stream_name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(runtime)?;

        Ok(row.is_some())
    }

    async fn fetch_stream_metadata(
        &self,
        stream_name: &StreamName,
    ) -> Result<Map<String, Value>> {
        let select = format!(
            "SELECT metadata FROM {} WHERE real_stream_name = $1",
            self.streams_table()
        );

        let metadata: Option<Value> = sqlx::query_scalar(&select)
            .bind(stream_name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(runtime)?;

        match metadata {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(StoreError::MetadataInvalidObjectType),
            None => Err(StoreError::StreamNotFound(stream_name.to_string())),
        }
    }

    async fn update_stream_metadata(
        &self,
        stream_name: &StreamName,
        metadata: Map<String, Value>,
    ) -> Result<()> {
        let update = format!(
            "UPDATE {} SET metadata = $2 WHERE real_stream_name = $1",
            self.streams_table()
        );

        let updated = sqlx::query(&update)
            .bind(stream_name.as_str())
            .bind(Value::Object(metadata))
            .execute(&self.pool)
            .await
            .map_err(runtime)?
            .rows_affected();

        if updated == 0 {
            return Err(StoreError::StreamNotFound(stream_name.to_string()));
        }

        Ok(())
    }

    async fn fetch_stream_names(
        &self,
        filter: Option<&str>,
        matcher: Option<&MetadataMatcher>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StreamName>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT real_stream_name FROM {} WHERE 1 = 1",
            self.streams_table()
        ));

        if let Some(filter) = filter {
            qb.push(" AND real_stream_name = ");
            qb.push_bind(filter.to_owned());
        }

        if let Some(matcher) = matcher {
            push_matcher(&mut qb, matcher, &POSTGRES_STYLE, None)?;
        }

        qb.push(" ORDER BY real_stream_name ASC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let names: Vec<String> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_enumeration)?;

        Ok(names.into_iter().map(StreamName::new).collect())
    }

    async fn fetch_stream_names_regex(
        &self,
        filter: &str,
        matcher: Option<&MetadataMatcher>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StreamName>> {
        validate_regex(filter)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT real_stream_name FROM {} WHERE real_stream_name ~ ",
            self.streams_table()
        ));
        qb.push_bind(filter.to_owned());

        if let Some(matcher) = matcher {
            push_matcher(&mut qb, matcher, &POSTGRES_STYLE, None)?;
        }

        qb.push(" ORDER BY real_stream_name ASC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let names: Vec<String> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_enumeration)?;

        Ok(names.into_iter().map(StreamName::new).collect())
    }

    async fn fetch_category_names(
        &self,
        filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT category FROM {} WHERE category IS NOT NULL",
            self.streams_table()
        ));

        if let Some(filter) = filter {
            qb.push(" AND category = ");
            qb.push_bind(filter.to_owned());
        }

        qb.push(" GROUP BY category ORDER BY category ASC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        Ok(qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_enumeration)?)
    }

    async fn fetch_category_names_regex(
        &self,
        filter: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        validate_regex(filter)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT category FROM {} WHERE category ~ ",
            self.streams_table()
        ));
        qb.push_bind(filter.to_owned());

        qb.push(" GROUP BY category ORDER BY category ASC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        Ok(qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_enumeration)?)
    }
}

impl PostgresEventStore {
    async fn delete_inner(&self, conn: &mut PgConnection, name: &StreamName) -> Result<()> {
        let remove_row = format!(
            "DELETE FROM {} WHERE real_stream_name = $1",
            self.streams_table()
        );

        let removed = sqlx::query(&remove_row)
            .bind(name.as_str())
            .execute(&mut *conn)
            .await
            .map_err(runtime)?
            .rows_affected();

        if removed == 0 {
            return Err(StoreError::StreamNotFound(name.to_string()));
        }

        // a registry row without a table still commits the removal
        let drop_table = format!("DROP TABLE IF EXISTS {}", self.stream_table(name));
        sqlx::query(&drop_table)
            .execute(&mut *conn)
            .await
            .map_err(runtime)?;

        Ok(())
    }
}

fn classify_enumeration(err: sqlx::Error) -> StoreError {
    match sqlstate(&err).as_deref() {
        Some(UNDEFINED_COLUMN) => {
            StoreError::UnexpectedValue("Unknown field given in metadata matcher".into())
        }
        Some(INVALID_REGEX) => StoreError::InvalidArgument("invalid regex pattern given".into()),
        _ => runtime(err),
    }
}

#[derive(sqlx::FromRow)]
struct PgEventRow {
    no: i64,
    event_id: Uuid,
    event_name: String,
    payload: Value,
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl PgEventRow {
    fn into_row(self) -> Result<(i64, Event)> {
        let metadata = match self.metadata {
            Value::Object(map) => map,
            _ => return Err(StoreError::MetadataInvalidObjectType),
        };

        Ok((
            self.no,
            Event {
                event_id: self.event_id,
                event_name: self.event_name,
                payload: self.payload,
                metadata,
                created_at: self.created_at,
            },
        ))
    }
}

struct PgBatchFetcher {
    pool: PgPool,
    table: String,
    stream: String,
    matcher: Option<MetadataMatcher>,
    indexed: Option<&'static [(&'static str, &'static str)]>,
    from_number: i64,
    forward: bool,
}

impl PgBatchFetcher {
    fn classify(&self, err: sqlx::Error) -> StoreError {
        match sqlstate(&err).as_deref() {
            Some(UNDEFINED_TABLE) => StoreError::StreamNotFound(self.stream.clone()),
            Some(UNDEFINED_COLUMN) => {
                StoreError::UnexpectedValue("Unknown field given in metadata matcher".into())
            }
            _ => runtime(err),
        }
    }
}

#[async_trait]
impl BatchFetcher for PgBatchFetcher {
    async fn fetch(&self, from_number: i64, limit: i64) -> Result<Vec<(i64, Event)>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT no, event_id, event_name, payload, metadata, created_at \
             FROM {} WHERE no ",
            self.table
        ));
        qb.push(if self.forward { ">= " } else { "<= " });
        qb.push_bind(from_number);

        if let Some(matcher) = &self.matcher {
            push_matcher(&mut qb, matcher, &POSTGRES_STYLE, self.indexed)?;
        }

        qb.push(if self.forward {
            " ORDER BY no ASC LIMIT "
        } else {
            " ORDER BY no DESC LIMIT "
        });
        qb.push_bind(limit);

        let rows: Vec<PgEventRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|err| self.classify(err))?;

        rows.into_iter().map(PgEventRow::into_row).collect()
    }

    async fn count(&self) -> Result<i64> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT COUNT(*) FROM {} WHERE no ",
            self.table
        ));
        qb.push(if self.forward { ">= " } else { "<= " });
        qb.push_bind(self.from_number);

        if let Some(matcher) = &self.matcher {
            push_matcher(&mut qb, matcher, &POSTGRES_STYLE, self.indexed)?;
        }

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|err| self.classify(err))?;

        Ok(count)
    }
}
