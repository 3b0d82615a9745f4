use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chronik_store::{validate_regex, Quoting, StreamName};
use serde_json::Value;
use sqlx::{MySql, MySqlPool, QueryBuilder};

use crate::engine::{ProjectionEngine, SourceStreams, DEFAULT_PROJECTIONS_TABLE};
use crate::error::{ProjectionError, Result};
use crate::status::ProjectionStatus;

fn lock_until(lock_timeout: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(lock_timeout.as_millis() as i64)
}

/// Projection registry over MySQL or MariaDB.
#[derive(Clone)]
pub struct MySqlProjectionEngine {
    pool: MySqlPool,
    projections_table: String,
    event_streams_table: String,
}

impl MySqlProjectionEngine {
    pub fn new(pool: &MySqlPool) -> Self {
        Self {
            pool: pool.clone(),
            projections_table: DEFAULT_PROJECTIONS_TABLE.to_owned(),
            event_streams_table: chronik_store::DEFAULT_EVENT_STREAMS_TABLE.to_owned(),
        }
    }

    pub fn projections_table(mut self, table: impl Into<String>) -> Self {
        self.projections_table = table.into();

        self
    }

    pub fn event_streams_table(mut self, table: impl Into<String>) -> Self {
        self.event_streams_table = table.into();

        self
    }

    fn table(&self) -> String {
        Quoting::Backtick.quote_table(&self.projections_table)
    }

    fn streams_table(&self) -> String {
        Quoting::Backtick.quote_table(&self.event_streams_table)
    }
}

#[async_trait]
impl ProjectionEngine for MySqlProjectionEngine {
    async fn create_if_missing(&self, name: &str) -> Result<()> {
        let insert = format!(
            "INSERT IGNORE INTO {} (name, position, state, status, locked_until) \
             VALUES (?, '{{}}', '{{}}', ?, NULL)",
            self.table()
        );

        sqlx::query(&insert)
            .bind(name)
            .bind(ProjectionStatus::Idle.as_str())
            .execute(&self.pool)
            .await
            .map_err(|_| ProjectionError::ProjectionNotCreated(name.to_owned()))?;

        Ok(())
    }

    async fn acquire_lock(&self, name: &str, lock_timeout: Duration) -> Result<()> {
        let update = format!(
            "UPDATE {} SET locked_until = ?, status = ? \
             WHERE name = ? AND (locked_until IS NULL OR locked_until < ?)",
            self.table()
        );

        let updated = sqlx::query(&update)
            .bind(lock_until(lock_timeout))
            .bind(ProjectionStatus::Running.as_str())
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated != 1 {
            return Err(ProjectionError::Runtime(
                "Another projection process is already running".into(),
            ));
        }

        Ok(())
    }

    async fn renew_lock(&self, name: &str, lock_timeout: Duration) -> Result<()> {
        let update = format!("UPDATE {} SET locked_until = ? WHERE name = ?", self.table());

        let updated = sqlx::query(&update)
            .bind(lock_until(lock_timeout))
            .bind(name)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated != 1 {
            return Err(ProjectionError::Runtime(format!(
                "Unable to update lock for projection {name}"
            )));
        }

        Ok(())
    }

    async fn start_again(&self, name: &str, lock_timeout: Duration) -> Result<()> {
        let update = format!(
            "UPDATE {} SET locked_until = ?, status = ? WHERE name = ?",
            self.table()
        );

        let updated = sqlx::query(&update)
            .bind(lock_until(lock_timeout))
            .bind(ProjectionStatus::Running.as_str())
            .bind(name)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated != 1 {
            return Err(ProjectionError::ProjectionNotFound(name.to_owned()));
        }

        Ok(())
    }

    async fn persist(
        &self,
        name: &str,
        position: &Value,
        state: &Value,
        lock_timeout: Duration,
    ) -> Result<()> {
        let update = format!(
            "UPDATE {} SET position = ?, state = ?, locked_until = ? WHERE name = ?",
            self.table()
        );

        sqlx::query(&update)
            .bind(position.clone())
            .bind(state.clone())
            .bind(lock_until(lock_timeout))
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn reset_row(&self, name: &str, state: &Value, status: ProjectionStatus) -> Result<()> {
        let update = format!(
            "UPDATE {} SET position = '{{}}', state = ?, status = ? WHERE name = ?",
            self.table()
        );

        sqlx::query(&update)
            .bind(state.clone())
            .bind(status.as_str())
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn release_lock(&self, name: &str) -> Result<()> {
        let update = format!(
            "UPDATE {} SET locked_until = NULL, status = ? WHERE name = ?",
            self.table()
        );

        sqlx::query(&update)
            .bind(ProjectionStatus::Idle.as_str())
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn update_status(&self, name: &str, status: ProjectionStatus) -> Result<()> {
        let update = format!("UPDATE {} SET status = ? WHERE name = ?", self.table());

        let updated = sqlx::query(&update)
            .bind(status.as_str())
            .bind(name)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated != 1 {
            return Err(ProjectionError::ProjectionNotFound(name.to_owned()));
        }

        Ok(())
    }

    async fn delete_row(&self, name: &str) -> Result<()> {
        let delete = format!("DELETE FROM {} WHERE name = ?", self.table());

        sqlx::query(&delete).bind(name).execute(&self.pool).await?;

        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<(Value, Value)>> {
        let select = format!(
            "SELECT position, state FROM {} WHERE name = ?",
            self.table()
        );

        Ok(sqlx::query_as::<_, (Value, Value)>(&select)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn fetch_status(&self, name: &str) -> Result<Option<ProjectionStatus>> {
        let select = format!("SELECT status FROM {} WHERE name = ?", self.table());

        let status: Option<String> = sqlx::query_scalar(&select)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        status.map(|status| status.parse()).transpose()
    }

    async fn fetch_position(&self, name: &str) -> Result<Option<Value>> {
        let select = format!("SELECT position FROM {} WHERE name = ?", self.table());

        Ok(sqlx::query_scalar(&select)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn fetch_state(&self, name: &str) -> Result<Option<Value>> {
        let select = format!("SELECT state FROM {} WHERE name = ?", self.table());

        Ok(sqlx::query_scalar(&select)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn fetch_names(
        &self,
        filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        let mut qb =
            QueryBuilder::<MySql>::new(format!("SELECT name FROM {} WHERE 1 = 1", self.table()));

        if let Some(filter) = filter {
            qb.push(" AND name = ");
            qb.push_bind(filter.to_owned());
        }

        qb.push(" ORDER BY name ASC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        Ok(qb.build_query_scalar().fetch_all(&self.pool).await?)
    }

    async fn fetch_names_regex(
        &self,
        filter: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        validate_regex(filter).map_err(|err| ProjectionError::InvalidArgument(err.to_string()))?;

        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT name FROM {} WHERE name REGEXP ",
            self.table()
        ));
        qb.push_bind(filter.to_owned());

        qb.push(" ORDER BY name ASC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        Ok(qb.build_query_scalar().fetch_all(&self.pool).await?)
    }

    async fn fetch_source_streams(&self, source: &SourceStreams) -> Result<Vec<StreamName>> {
        match source {
            SourceStreams::Streams(streams) => Ok(streams.clone()),
            SourceStreams::All => {
                let select = format!(
                    "SELECT real_stream_name FROM {} WHERE real_stream_name NOT LIKE '$%'",
                    self.streams_table()
                );

                let names: Vec<String> =
                    sqlx::query_scalar(&select).fetch_all(&self.pool).await?;

                Ok(names.into_iter().map(StreamName::new).collect())
            }
            SourceStreams::Categories(categories) => {
                let mut qb = QueryBuilder::<MySql>::new(format!(
                    "SELECT real_stream_name FROM {} WHERE category IN (",
                    self.streams_table()
                ));

                let mut separated = qb.separated(", ");
                for category in categories {
                    separated.push_bind(category.clone());
                }
                qb.push(")");

                let names: Vec<String> =
                    qb.build_query_scalar().fetch_all(&self.pool).await?;

                Ok(names.into_iter().map(StreamName::new).collect())
            }
        }
    }

    fn schema_statements(&self) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {} (\n\
             no BIGINT NOT NULL AUTO_INCREMENT,\n\
             name VARCHAR(150) COLLATE utf8mb4_bin NOT NULL,\n\
             position JSON,\n\
             state JSON,\n\
             status VARCHAR(28) COLLATE utf8mb4_bin NOT NULL,\n\
             locked_until DATETIME(6),\n\
             PRIMARY KEY (no),\n\
             UNIQUE KEY ix_name (name)\n\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;",
            self.table()
        )]
    }
}
