#![cfg(feature = "mysql")]

mod projection;

use chronik_projection::{
    GapDetection, MySqlProjectionEngine, ProjectionEngine, ProjectionManager, ProjectorOptions,
};
use chronik_store::{
    EventStore, MySqlEventStore, MySqlSimpleStreamStrategy, Quoting, Stream, StreamName,
};
use sqlx::MySqlPool;
use tokio::sync::OnceCell;

use projection::{count_events, event, CountState};

static POOL: OnceCell<Option<MySqlPool>> = OnceCell::const_new();

/// Tests run against the database at `CHRONIK_MYSQL_URL` and are skipped
/// when the variable is unset.
async fn pool() -> Option<&'static MySqlPool> {
    POOL.get_or_init(|| async {
        let Ok(dsn) = std::env::var("CHRONIK_MYSQL_URL") else {
            return None;
        };

        let pool = MySqlPool::connect(&dsn).await.expect("connect mysql");

        for statement in MySqlEventStore::schema_statements("event_streams") {
            let _ = sqlx::query(&statement).execute(&pool).await;
        }

        for statement in MySqlProjectionEngine::new(&pool).schema_statements() {
            let _ = sqlx::query(&statement).execute(&pool).await;
        }

        Some(pool)
    })
    .await
    .as_ref()
}

fn store(pool: &MySqlPool) -> MySqlEventStore {
    MySqlEventStore::new(pool, MySqlSimpleStreamStrategy)
}

fn manager(pool: &MySqlPool) -> ProjectionManager {
    ProjectionManager::new(
        Box::new(store(pool)),
        Box::new(MySqlProjectionEngine::new(pool)),
    )
}

#[tokio::test]
async fn projector_folds_and_resumes() {
    let Some(pool) = pool().await else { return };
    projection::test_projector_folds_and_resumes(&manager(pool), &store(pool), "my_fold")
        .await
        .unwrap();
}

#[tokio::test]
async fn named_handlers_skip_unmatched() {
    let Some(pool) = pool().await else { return };
    projection::test_named_handlers_skip_unmatched(&manager(pool), &store(pool), "my_named")
        .await
        .unwrap();
}

#[tokio::test]
async fn query_returns_state() {
    let Some(pool) = pool().await else { return };
    projection::test_query_returns_state(&manager(pool), &store(pool), "my_query")
        .await
        .unwrap();
}

#[tokio::test]
async fn stop_command() {
    let Some(pool) = pool().await else { return };
    projection::test_stop_command(&manager(pool), &store(pool), "my_stop")
        .await
        .unwrap();
}

#[tokio::test]
async fn reset_command() {
    let Some(pool) = pool().await else { return };
    projection::test_reset_command(&manager(pool), &store(pool), "my_reset")
        .await
        .unwrap();
}

#[tokio::test]
async fn emit_and_delete_incl_emitted() {
    let Some(pool) = pool().await else { return };
    projection::test_emit_and_delete_incl_emitted(&manager(pool), &store(pool), "my_emit")
        .await
        .unwrap();
}

#[tokio::test]
async fn lease_coordination() {
    let Some(pool) = pool().await else { return };
    let engine = MySqlProjectionEngine::new(pool);
    projection::test_lease_coordination(&engine, "my_lease")
        .await
        .unwrap();
}

#[tokio::test]
async fn read_model_projection() {
    let Some(pool) = pool().await else { return };
    projection::test_read_model_projection(&manager(pool), &store(pool), "my_read_model")
        .await
        .unwrap();
}

#[tokio::test]
async fn gap_detection_defers_then_skips_permanent_holes() {
    let Some(pool) = pool().await else { return };

    let store = store(pool);
    let manager = manager(pool);
    let stream = StreamName::new("my_gap-stream");

    let _ = store.delete(&stream).await;
    let _ = manager
        .create_projection::<CountState>("my_gap", ProjectorOptions::new())
        .delete(false)
        .await;

    store
        .create(Stream::new(stream.clone()).events(vec![
            event("one"),
            event("two"),
            event("three"),
        ]))
        .await
        .unwrap();

    // carve a permanent hole at no = 3, as a rolled-back transaction would
    let table = Quoting::Backtick.quote_table(&stream.table_name());
    sqlx::query(&format!("DELETE FROM {table} WHERE no = 3"))
        .execute(pool)
        .await
        .unwrap();

    store
        .append_to(&stream, vec![event("four"), event("five")])
        .await
        .unwrap();

    let mut projector = manager
        .create_projection::<CountState>(
            "my_gap",
            ProjectorOptions::new().gap_detection(GapDetection::new(vec![0])),
        )
        .from_stream(stream.clone())
        .unwrap()
        .when_any(Box::new(count_events))
        .unwrap();

    // first pass aborts at the hole and waits for the writer to surface
    projector.run(false).await.unwrap();
    assert_eq!(projector.state().count, 2);

    // ladder exhausted: the hole is permanent, skip over it
    projector.run(false).await.unwrap();
    assert_eq!(projector.state().count, 4);

    projector.delete(false).await.unwrap();
    store.delete(&stream).await.unwrap();
}
