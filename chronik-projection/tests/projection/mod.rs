use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chronik_projection::{
    ProjectionEngine, ProjectionError, ProjectionManager, ProjectionStatus, ProjectorContext,
    ProjectorOptions, ReadModel, ReadModelContext,
};
use chronik_store::{Event, EventStore, StreamName};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CountState {
    pub count: i64,
    pub names: Vec<String>,
}

pub fn event(name: &str) -> Event {
    Event::new(name).payload(json!({"n": name})).unwrap()
}

pub fn count_events<'a>(
    state: &'a mut CountState,
    event: Event,
    _ctx: &'a ProjectorContext,
) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        state.count += 1;
        state.names.push(event.event_name);

        Ok(())
    })
}

pub fn emit_copy<'a>(
    state: &'a mut CountState,
    event: Event,
    ctx: &'a ProjectorContext,
) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        ctx.emit(event).await?;
        state.count += 1;

        Ok(())
    })
}

pub async fn test_projector_folds_and_resumes(
    manager: &ProjectionManager,
    store: &dyn EventStore,
    name: &str,
) -> anyhow::Result<()> {
    let stream = StreamName::new(format!("{name}-stream"));
    let _ = store.delete(&stream).await;
    let _ = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .delete(false)
        .await;

    store
        .create(chronik_store::Stream::new(stream.clone()).events(vec![
            event("one"),
            event("two"),
            event("three"),
        ]))
        .await?;

    let mut projector = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .from_stream(stream.clone())?
        .when_any(Box::new(count_events))?;

    projector.run(false).await?;

    assert_eq!(projector.state().count, 3);
    assert_eq!(
        manager.fetch_projection_status(name).await?,
        ProjectionStatus::Idle
    );

    let positions = manager.fetch_projection_stream_positions(name).await?;
    assert_eq!(positions[stream.as_str()], json!(3));

    // a fresh projector resumes from the persisted checkpoint
    store
        .append_to(&stream, vec![event("four"), event("five")])
        .await?;

    let mut projector = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .from_stream(stream.clone())?
        .when_any(Box::new(count_events))?;

    projector.run(false).await?;

    assert_eq!(projector.state().count, 5);
    assert_eq!(
        projector.state().names[3..],
        ["four".to_owned(), "five".to_owned()]
    );

    projector.delete(false).await?;
    store.delete(&stream).await?;

    Ok(())
}

pub async fn test_named_handlers_skip_unmatched(
    manager: &ProjectionManager,
    store: &dyn EventStore,
    name: &str,
) -> anyhow::Result<()> {
    let stream = StreamName::new(format!("{name}-stream"));
    let _ = store.delete(&stream).await;
    let _ = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .delete(false)
        .await;

    store
        .create(chronik_store::Stream::new(stream.clone()).events(vec![
            event("matched"),
            event("ignored"),
            event("matched"),
        ]))
        .await?;

    let mut handlers: HashMap<String, chronik_projection::Handler<CountState, ProjectorContext>> =
        HashMap::new();
    handlers.insert("matched".to_owned(), Box::new(count_events));

    let mut projector = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .from_stream(stream.clone())?
        .when(handlers)?;

    projector.run(false).await?;

    // unmatched events advance the position but invoke no handler
    assert_eq!(projector.state().count, 2);

    let positions = manager.fetch_projection_stream_positions(name).await?;
    assert_eq!(positions[stream.as_str()], json!(3));

    projector.delete(false).await?;
    store.delete(&stream).await?;

    Ok(())
}

pub async fn test_query_returns_state(
    manager: &ProjectionManager,
    store: &dyn EventStore,
    name: &str,
) -> anyhow::Result<()> {
    let first = StreamName::new(format!("{name}-first"));
    let second = StreamName::new(format!("{name}-second"));

    for stream in [&first, &second] {
        let _ = store.delete(stream).await;
        store
            .create(
                chronik_store::Stream::new(stream.clone())
                    .events(vec![event("created"), event("changed")]),
            )
            .await?;
    }

    fn fold<'a>(
        state: &'a mut CountState,
        event: Event,
        _ctx: &'a chronik_projection::QueryContext,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            state.count += 1;
            state.names.push(event.event_name);

            Ok(())
        })
    }

    let mut query = manager
        .create_query::<CountState>()
        .from_streams(vec![first.clone(), second.clone()])?
        .when_any(Box::new(fold))?;

    query.run().await?;

    assert_eq!(query.state().count, 4);

    store.delete(&first).await?;
    store.delete(&second).await?;

    Ok(())
}

pub async fn test_stop_command(
    manager: &ProjectionManager,
    store: &dyn EventStore,
    name: &str,
) -> anyhow::Result<()> {
    let stream = StreamName::new(format!("{name}-stream"));
    let _ = store.delete(&stream).await;
    let _ = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .delete(false)
        .await;

    store
        .create(chronik_store::Stream::new(stream.clone()).events(vec![event("one")]))
        .await?;

    let mut projector = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .from_stream(stream.clone())?
        .when_any(Box::new(count_events))?;

    projector.run(false).await?;

    manager.stop_projection(name).await?;
    assert_eq!(
        manager.fetch_projection_status(name).await?,
        ProjectionStatus::Stopping
    );

    // the next run observes the command and settles back to idle
    projector.run(false).await?;
    assert_eq!(
        manager.fetch_projection_status(name).await?,
        ProjectionStatus::Idle
    );

    projector.delete(false).await?;
    store.delete(&stream).await?;

    Ok(())
}

pub async fn test_reset_command(
    manager: &ProjectionManager,
    store: &dyn EventStore,
    name: &str,
) -> anyhow::Result<()> {
    let stream = StreamName::new(format!("{name}-stream"));
    let _ = store.delete(&stream).await;
    let _ = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .delete(false)
        .await;

    store
        .create(
            chronik_store::Stream::new(stream.clone())
                .events(vec![event("one"), event("two")]),
        )
        .await?;

    let mut projector = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .from_stream(stream.clone())?
        .when_any(Box::new(count_events))?;

    projector.run(false).await?;
    assert_eq!(projector.state().count, 2);

    manager.reset_projection(name).await?;

    // reset re-seeds the state and replays from scratch, not on top
    projector.run(false).await?;
    assert_eq!(projector.state().count, 2);

    let positions = manager.fetch_projection_stream_positions(name).await?;
    assert_eq!(positions[stream.as_str()], json!(2));

    projector.delete(false).await?;
    store.delete(&stream).await?;

    Ok(())
}

pub async fn test_emit_and_delete_incl_emitted(
    manager: &ProjectionManager,
    store: &dyn EventStore,
    name: &str,
) -> anyhow::Result<()> {
    let stream = StreamName::new(format!("{name}-stream"));
    let emitted = StreamName::new(name);

    let _ = store.delete(&stream).await;
    let _ = store.delete(&emitted).await;
    let _ = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .delete(false)
        .await;

    store
        .create(
            chronik_store::Stream::new(stream.clone())
                .events(vec![event("one"), event("two")]),
        )
        .await?;

    let mut projector = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .from_stream(stream.clone())?
        .when_any(Box::new(emit_copy))?;

    projector.run(false).await?;

    assert!(store.has_stream(&emitted).await?);
    let copied = store.load(&emitted, None, None, None).await?.count().await?;
    assert_eq!(copied, 2);

    manager.delete_projection(name, true).await?;
    projector.run(false).await?;

    assert!(!store.has_stream(&emitted).await?);
    assert!(matches!(
        manager.fetch_projection_status(name).await.unwrap_err(),
        ProjectionError::ProjectionNotFound(_)
    ));

    store.delete(&stream).await?;

    Ok(())
}

pub async fn test_lease_coordination(
    engine: &dyn ProjectionEngine,
    name: &str,
) -> anyhow::Result<()> {
    let _ = engine.delete_row(name).await;
    engine.create_if_missing(name).await?;

    engine.acquire_lock(name, Duration::from_secs(10)).await?;

    // an effective lease excludes every other process
    let err = engine
        .acquire_lock(name, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("Another projection process is already running"));

    engine.release_lock(name).await?;

    // an expired lease transfers ownership
    engine.acquire_lock(name, Duration::from_millis(50)).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    engine.acquire_lock(name, Duration::from_secs(10)).await?;

    engine.release_lock(name).await?;
    engine.delete_row(name).await?;

    Ok(())
}

pub struct MemoryReadModel {
    pub rows: Mutex<Vec<String>>,
    pub initialized: AtomicBool,
    pub persist_calls: AtomicUsize,
}

impl MemoryReadModel {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            persist_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReadModel for MemoryReadModel {
    async fn init(&self) -> anyhow::Result<()> {
        self.initialized.store(true, Ordering::SeqCst);

        Ok(())
    }

    async fn is_initialized(&self) -> anyhow::Result<bool> {
        Ok(self.initialized.load(Ordering::SeqCst))
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.rows.lock().unwrap().clear();

        Ok(())
    }

    async fn delete(&self) -> anyhow::Result<()> {
        self.rows.lock().unwrap().clear();
        self.initialized.store(false, Ordering::SeqCst);

        Ok(())
    }

    async fn persist(&self) -> anyhow::Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

fn collect_rows<'a>(
    state: &'a mut CountState,
    event: Event,
    ctx: &'a ReadModelContext<MemoryReadModel>,
) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        ctx.read_model().rows.lock().unwrap().push(event.event_name);
        state.count += 1;

        Ok(())
    })
}

pub async fn test_read_model_projection(
    manager: &ProjectionManager,
    store: &dyn EventStore,
    name: &str,
) -> anyhow::Result<()> {
    let stream = StreamName::new(format!("{name}-stream"));
    let _ = store.delete(&stream).await;
    let _ = manager
        .create_projection::<CountState>(name, ProjectorOptions::new())
        .delete(false)
        .await;

    store
        .create(
            chronik_store::Stream::new(stream.clone())
                .events(vec![event("one"), event("two")]),
        )
        .await?;

    let mut projector = manager
        .create_read_model_projection::<CountState, _>(
            name,
            MemoryReadModel::new(),
            ProjectorOptions::new(),
        )
        .from_stream(stream.clone())?
        .when_any(Box::new(collect_rows))?;

    projector.run(false).await?;

    assert!(projector.read_model().initialized.load(Ordering::SeqCst));
    assert_eq!(
        projector.read_model().rows.lock().unwrap().as_slice(),
        &["one".to_owned(), "two".to_owned()]
    );
    assert!(projector.read_model().persist_calls.load(Ordering::SeqCst) >= 1);

    projector.delete(true).await?;
    store.delete(&stream).await?;

    Ok(())
}
