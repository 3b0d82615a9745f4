use async_trait::async_trait;
use sqlx::Database;

use crate::error::Result;

#[cfg(feature = "mysql")]
use crate::error::StoreError;

/// Named session lock over a database connection.
///
/// The event store derives the lock name from the physical stream table
/// (`<table>_write_lock`) and acquires it on the same pooled connection that
/// performs the insert; session locks do not survive a connection switch.
#[async_trait]
pub trait WriteLockStrategy<DB: Database>: Send + Sync {
    async fn acquire(&self, conn: &mut DB::Connection, name: &str) -> Result<bool>;

    async fn release(&self, conn: &mut DB::Connection, name: &str) -> Result<bool>;
}

/// Default strategy: no locking, every acquire succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLock;

#[async_trait]
impl<DB: Database> WriteLockStrategy<DB> for NoLock {
    async fn acquire(&self, _conn: &mut DB::Connection, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn release(&self, _conn: &mut DB::Connection, _name: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Advisory session locks. Acquisition waits, so it always reports success.
#[cfg(feature = "postgres")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdvisoryLock;

#[cfg(feature = "postgres")]
#[async_trait]
impl WriteLockStrategy<sqlx::Postgres> for PostgresAdvisoryLock {
    async fn acquire(&self, conn: &mut sqlx::PgConnection, name: &str) -> Result<bool> {
        sqlx::query("SELECT pg_advisory_lock(hashtext($1))")
            .bind(name)
            .execute(&mut *conn)
            .await?;

        Ok(true)
    }

    async fn release(&self, conn: &mut sqlx::PgConnection, name: &str) -> Result<bool> {
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;

        Ok(released)
    }
}

/// MySQL error number raised when a metadata lock request deadlocks.
#[cfg(feature = "mysql")]
const ER_LOCK_DEADLOCK: u16 = 3058;

#[cfg(feature = "mysql")]
fn mysql_errno(err: &sqlx::Error) -> Option<u16> {
    err.as_database_error()
        .and_then(|db| db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>())
        .map(|db| db.number())
}

/// `GET_LOCK`-based metadata locks. A deadlock reported by the server is a
/// failed acquisition, not an error.
#[cfg(feature = "mysql")]
#[derive(Debug, Clone, Copy)]
pub struct MySqlMetadataLock {
    timeout_secs: i64,
}

#[cfg(feature = "mysql")]
impl MySqlMetadataLock {
    pub fn new(timeout_secs: i64) -> Self {
        Self { timeout_secs }
    }
}

#[cfg(feature = "mysql")]
impl Default for MySqlMetadataLock {
    fn default() -> Self {
        // wait forever
        Self { timeout_secs: -1 }
    }
}

#[cfg(feature = "mysql")]
#[async_trait]
impl WriteLockStrategy<sqlx::MySql> for MySqlMetadataLock {
    async fn acquire(&self, conn: &mut sqlx::MySqlConnection, name: &str) -> Result<bool> {
        let result = sqlx::query_scalar::<_, Option<i64>>("SELECT GET_LOCK(?, ?)")
            .bind(name)
            .bind(self.timeout_secs)
            .fetch_one(&mut *conn)
            .await;

        match result {
            Ok(row) => Ok(row == Some(1)),
            Err(err) if mysql_errno(&err) == Some(ER_LOCK_DEADLOCK) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn release(&self, conn: &mut sqlx::MySqlConnection, name: &str) -> Result<bool> {
        sqlx::query("DO RELEASE_LOCK(?)")
            .bind(name)
            .execute(&mut *conn)
            .await?;

        Ok(true)
    }
}

/// MariaDB metadata locks. The timeout must be non-negative; `RELEASE_LOCK`
/// is issued as a SELECT and its result set consumed before returning.
#[cfg(feature = "mysql")]
#[derive(Debug, Clone, Copy)]
pub struct MariaDbMetadataLock {
    timeout_secs: i64,
}

#[cfg(feature = "mysql")]
impl MariaDbMetadataLock {
    pub fn new(timeout_secs: i64) -> Result<Self> {
        if timeout_secs < 0 {
            return Err(StoreError::InvalidArgument(
                "lock timeout must not be negative".into(),
            ));
        }

        Ok(Self { timeout_secs })
    }
}

#[cfg(feature = "mysql")]
impl Default for MariaDbMetadataLock {
    fn default() -> Self {
        Self {
            timeout_secs: 0xFFFFFF,
        }
    }
}

#[cfg(feature = "mysql")]
#[async_trait]
impl WriteLockStrategy<sqlx::MySql> for MariaDbMetadataLock {
    async fn acquire(&self, conn: &mut sqlx::MySqlConnection, name: &str) -> Result<bool> {
        let result = sqlx::query_scalar::<_, Option<i64>>("SELECT GET_LOCK(?, ?)")
            .bind(name)
            .bind(self.timeout_secs)
            .fetch_one(&mut *conn)
            .await;

        match result {
            Ok(row) => Ok(row == Some(1)),
            Err(err) if mysql_errno(&err) == Some(ER_LOCK_DEADLOCK) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn release(&self, conn: &mut sqlx::MySqlConnection, name: &str) -> Result<bool> {
        let released: Option<i64> = sqlx::query_scalar("SELECT RELEASE_LOCK(?)")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;

        Ok(released == Some(1))
    }
}

#[cfg(all(test, feature = "mysql"))]
mod tests {
    use super::*;

    #[test]
    fn mariadb_rejects_negative_timeout() {
        assert!(matches!(
            MariaDbMetadataLock::new(-1).unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
        assert!(MariaDbMetadataLock::new(0).is_ok());
    }
}
