#![cfg(feature = "mysql")]

mod store;

use chronik_store::{MariaDbMetadataLock, MariaDbSingleStreamStrategy, MySqlEventStore};
use sqlx::MySqlPool;
use tokio::sync::OnceCell;

static POOL: OnceCell<Option<MySqlPool>> = OnceCell::const_new();

/// Tests run against the database at `CHRONIK_MARIADB_URL` and are skipped
/// when the variable is unset.
async fn pool() -> Option<&'static MySqlPool> {
    POOL.get_or_init(|| async {
        let Ok(dsn) = std::env::var("CHRONIK_MARIADB_URL") else {
            return None;
        };

        let pool = MySqlPool::connect(&dsn).await.expect("connect mariadb");

        for statement in MySqlEventStore::schema_statements("event_streams") {
            let _ = sqlx::query(&statement).execute(&pool).await;
        }

        Some(pool)
    })
    .await
    .as_ref()
}

fn store(pool: &MySqlPool) -> MySqlEventStore {
    MySqlEventStore::new(pool, MariaDbSingleStreamStrategy)
        .write_lock_strategy(MariaDbMetadataLock::default())
}

#[tokio::test]
async fn round_trip() {
    let Some(pool) = pool().await else { return };
    store::test_round_trip(&store(pool), "mdb_round_trip")
        .await
        .unwrap();
}

#[tokio::test]
async fn load_bounds() {
    let Some(pool) = pool().await else { return };
    store::test_load_bounds(&store(pool), "mdb_load_bounds")
        .await
        .unwrap();
}

#[tokio::test]
async fn version_collision() {
    let Some(pool) = pool().await else { return };
    store::test_version_collision(&store(pool), "mdb_collision")
        .await
        .unwrap();
}

#[tokio::test]
async fn metadata_matcher() {
    let Some(pool) = pool().await else { return };
    store::test_metadata_matcher(&store(pool), "mdb_matcher")
        .await
        .unwrap();
}
