use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronik_store::{EventStore, StoreError, StreamName};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::engine::{ProjectionEngine, SourceStreams};
use crate::error::{ProjectionError, Result};
use crate::gap::GapDetection;
use crate::merged::MergedStreamIterator;
use crate::options::ProjectorOptions;
use crate::projector::{Handler, Handlers};
use crate::status::ProjectionStatus;

/// External target a read-model projection writes into.
///
/// Handlers perform the actual writes through the concrete model; the
/// projector drives its lifecycle and flushes it on every checkpoint.
#[async_trait]
pub trait ReadModel: Send + Sync {
    async fn init(&self) -> anyhow::Result<()>;

    async fn is_initialized(&self) -> anyhow::Result<bool>;

    async fn reset(&self) -> anyhow::Result<()>;

    async fn delete(&self) -> anyhow::Result<()>;

    /// Flushed immediately before each projection checkpoint.
    async fn persist(&self) -> anyhow::Result<()>;
}

/// Handler-facing API of a running read-model projection.
pub struct ReadModelContext<M> {
    pub(crate) stream_name: Arc<RwLock<Option<String>>>,
    pub(crate) stopped: Arc<AtomicBool>,
    read_model: Arc<M>,
}

impl<M> Clone for ReadModelContext<M> {
    fn clone(&self) -> Self {
        Self {
            stream_name: self.stream_name.clone(),
            stopped: self.stopped.clone(),
            read_model: self.read_model.clone(),
        }
    }
}

impl<M> ReadModelContext<M> {
    fn new(read_model: Arc<M>) -> Self {
        Self {
            stream_name: Arc::new(RwLock::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
            read_model,
        }
    }

    pub fn stream_name(&self) -> Option<String> {
        self.stream_name.read().clone()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn read_model(&self) -> &M {
        &self.read_model
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        *self.stream_name.write() = None;
    }
}

/// Projection that folds source streams into an external read model instead
/// of an emitted stream. Lease handling, gap detection and control commands
/// behave exactly as in [`crate::Projector`].
pub struct ReadModelProjector<S, M> {
    name: String,
    store: Box<dyn EventStore>,
    engine: Box<dyn ProjectionEngine>,
    options: ProjectorOptions,
    read_model: Arc<M>,
    source: Option<SourceStreams>,
    handlers: Option<Arc<Handlers<S, ReadModelContext<M>>>>,
    init: Option<Box<dyn Fn() -> S + Send + Sync>>,
    gap: Option<GapDetection>,
    ctx: ReadModelContext<M>,
    state: S,
    positions: BTreeMap<String, i64>,
    status: ProjectionStatus,
    is_stopped: bool,
    last_lock_update: Option<DateTime<Utc>>,
    event_counter: usize,
    cycle_observed_events: bool,
}

impl<S, M> ReadModelProjector<S, M>
where
    S: Default + Serialize + DeserializeOwned + Send + 'static,
    M: ReadModel + 'static,
{
    pub fn new(
        name: impl Into<String>,
        store: Box<dyn EventStore>,
        engine: Box<dyn ProjectionEngine>,
        read_model: M,
        options: ProjectorOptions,
    ) -> Self {
        let read_model = Arc::new(read_model);
        let gap = options.gap_detection.clone();

        Self {
            name: name.into(),
            store,
            engine,
            options,
            read_model: read_model.clone(),
            source: None,
            handlers: None,
            init: None,
            gap,
            ctx: ReadModelContext::new(read_model),
            state: S::default(),
            positions: BTreeMap::new(),
            status: ProjectionStatus::Idle,
            is_stopped: false,
            last_lock_update: None,
            event_counter: 0,
            cycle_observed_events: false,
        }
    }

    pub fn init<F: Fn() -> S + Send + Sync + 'static>(mut self, init: F) -> Result<Self> {
        if self.init.is_some() {
            return Err(ProjectionError::InvalidArgument(
                "projection already initialized".into(),
            ));
        }

        self.state = init();
        self.init = Some(Box::new(init));

        Ok(self)
    }

    pub fn from_stream(self, stream: impl Into<StreamName>) -> Result<Self> {
        self.from_streams(vec![stream.into()])
    }

    pub fn from_streams(mut self, streams: Vec<StreamName>) -> Result<Self> {
        self.set_source(SourceStreams::Streams(streams))?;

        Ok(self)
    }

    pub fn from_category(self, category: impl Into<String>) -> Result<Self> {
        self.from_categories(vec![category.into()])
    }

    pub fn from_categories(mut self, categories: Vec<String>) -> Result<Self> {
        self.set_source(SourceStreams::Categories(categories))?;

        Ok(self)
    }

    pub fn from_all(mut self) -> Result<Self> {
        self.set_source(SourceStreams::All)?;

        Ok(self)
    }

    fn set_source(&mut self, source: SourceStreams) -> Result<()> {
        if self.source.is_some() {
            return Err(ProjectionError::InvalidArgument(
                "source streams already set".into(),
            ));
        }

        self.source = Some(source);

        Ok(())
    }

    pub fn when(
        mut self,
        handlers: HashMap<String, Handler<S, ReadModelContext<M>>>,
    ) -> Result<Self> {
        if self.handlers.is_some() {
            return Err(ProjectionError::InvalidArgument(
                "handlers already configured".into(),
            ));
        }

        self.handlers = Some(Arc::new(Handlers::Named(handlers)));

        Ok(self)
    }

    pub fn when_any(mut self, handler: Handler<S, ReadModelContext<M>>) -> Result<Self> {
        if self.handlers.is_some() {
            return Err(ProjectionError::InvalidArgument(
                "handlers already configured".into(),
            ));
        }

        self.handlers = Some(Arc::new(Handlers::Any(handler)));

        Ok(self)
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_model(&self) -> &M {
        &self.read_model
    }

    fn initial_state(&self) -> S {
        match &self.init {
            Some(init) => init(),
            None => S::default(),
        }
    }

    async fn fetch_remote_status(&self) -> Result<ProjectionStatus> {
        Ok(self
            .engine
            .fetch_status(&self.name)
            .await?
            .unwrap_or(ProjectionStatus::Running))
    }

    pub async fn run(&mut self, keep_running: bool) -> Result<()> {
        if self.handlers.is_none() {
            return Err(ProjectionError::InvalidArgument(
                "no handlers configured".into(),
            ));
        }

        if self.source.is_none() {
            return Err(ProjectionError::InvalidArgument(
                "no source streams configured".into(),
            ));
        }

        match self.fetch_remote_status().await? {
            ProjectionStatus::Stopping => {
                self.load().await?;
                self.stop().await?;

                return Ok(());
            }
            ProjectionStatus::Deleting => {
                self.delete(false).await?;

                return Ok(());
            }
            ProjectionStatus::DeletingInclEmittedEvents => {
                self.delete(true).await?;

                return Ok(());
            }
            ProjectionStatus::Resetting => {
                self.reset().await?;

                if keep_running {
                    self.start_again().await?;
                }
            }
            _ => {}
        }

        self.engine.create_if_missing(&self.name).await?;
        self.engine
            .acquire_lock(&self.name, self.options.lock_timeout)
            .await?;
        self.last_lock_update = Some(Utc::now());
        self.status = ProjectionStatus::Running;
        self.ctx.reset();

        if !self.read_model.is_initialized().await? {
            self.read_model.init().await?;
        }

        let result = self.run_inner(keep_running).await;

        // a cycle that observed events leaves the lease in place; the next
        // run takes over after expiry
        let released = if self.cycle_observed_events {
            Ok(())
        } else {
            self.status = ProjectionStatus::Idle;
            self.engine.release_lock(&self.name).await
        };

        result?;
        released?;

        Ok(())
    }

    async fn run_inner(&mut self, keep_running: bool) -> Result<()> {
        self.is_stopped = false;
        self.prepare_stream_positions().await?;
        self.load().await?;

        loop {
            let mut sources = Vec::new();

            for (stream, position) in self.positions.clone() {
                let name = StreamName::new(stream);

                match self
                    .store
                    .load(&name, Some(position + 1), self.options.load_count, None)
                    .await
                {
                    Ok(iterator) => sources.push((name, iterator)),
                    Err(StoreError::StreamNotFound(_)) => continue,
                    Err(err) => return Err(err.into()),
                }
            }

            let mut merged = MergedStreamIterator::new(sources);
            let completed = self.process(&mut merged).await?;

            if !completed {
                if let Some(gap) = &self.gap {
                    let millis = gap.sleep_ms();

                    if millis > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
                    }
                }

                if let Some(gap) = &mut self.gap {
                    gap.track_retry();
                }

                self.persist().await?;
            } else {
                if let Some(gap) = &mut self.gap {
                    gap.reset_retries();
                }

                if self.event_counter == 0 {
                    tokio::time::sleep(self.options.sleep).await;
                    self.update_lock().await?;
                } else {
                    self.persist().await?;
                }
            }

            self.cycle_observed_events = self.event_counter > 0;
            self.event_counter = 0;

            match self.fetch_remote_status().await? {
                ProjectionStatus::Stopping => self.stop().await?,
                ProjectionStatus::Deleting => self.delete(false).await?,
                ProjectionStatus::DeletingInclEmittedEvents => self.delete(true).await?,
                ProjectionStatus::Resetting => {
                    self.reset().await?;

                    if keep_running {
                        self.start_again().await?;
                    }
                }
                _ => {}
            }

            if !keep_running || self.is_stopped {
                break;
            }

            self.prepare_stream_positions().await?;
        }

        Ok(())
    }

    async fn process(&mut self, merged: &mut MergedStreamIterator) -> Result<bool> {
        let Some(handlers) = self.handlers.clone() else {
            return Err(ProjectionError::InvalidArgument(
                "no handlers configured".into(),
            ));
        };

        while let Some((stream, event)) = merged.next().await? {
            if let Some(hook) = &self.options.signal_hook {
                hook();
            }

            let Some(position) = event.position() else {
                return Err(ProjectionError::Runtime(format!(
                    "event {} carries no position",
                    event.event_id
                )));
            };

            let previous = self
                .positions
                .get(stream.as_str())
                .copied()
                .unwrap_or(0);

            if let Some(gap) = &self.gap {
                if gap.is_gap(previous, position)
                    && gap.should_retry(Utc::now(), event.created_at)
                {
                    debug!(
                        projection = %self.name,
                        stream = %stream,
                        expected = previous + 1,
                        seen = position,
                        "gap detected, aborting cycle"
                    );

                    return Ok(false);
                }
            }

            self.positions.insert(stream.to_string(), position);
            self.event_counter += 1;

            *self.ctx.stream_name.write() = Some(stream.to_string());

            handlers.dispatch(&mut self.state, event, &self.ctx).await?;

            if self.ctx.is_stopped() {
                self.stop().await?;
            }

            if self.event_counter == self.options.persist_block_size {
                self.persist().await?;
                self.event_counter = 0;

                if !matches!(
                    self.fetch_remote_status().await?,
                    ProjectionStatus::Running | ProjectionStatus::Idle
                ) {
                    self.is_stopped = true;
                }
            }

            if self.is_stopped {
                break;
            }
        }

        Ok(true)
    }

    async fn prepare_stream_positions(&mut self) -> Result<()> {
        let Some(source) = &self.source else {
            return Err(ProjectionError::InvalidArgument(
                "no source streams configured".into(),
            ));
        };

        for stream in self.engine.fetch_source_streams(source).await? {
            self.positions.entry(stream.to_string()).or_insert(0);
        }

        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        let Some((position, state)) = self.engine.load(&self.name).await? else {
            return Ok(());
        };

        if let Value::Object(map) = position {
            for (stream, no) in map {
                if let Some(no) = no.as_i64() {
                    self.positions.insert(stream, no);
                }
            }
        }

        match state {
            Value::Null => {}
            Value::Object(map) if map.is_empty() => {}
            state => self.state = serde_json::from_value(state)?,
        }

        Ok(())
    }

    async fn persist(&mut self) -> Result<()> {
        self.read_model.persist().await?;

        let position = serde_json::to_value(&self.positions)?;
        let state = serde_json::to_value(&self.state)?;

        self.engine
            .persist(&self.name, &position, &state, self.options.lock_timeout)
            .await
    }

    async fn update_lock(&mut self) -> Result<()> {
        let now = Utc::now();
        let threshold = chrono::Duration::milliseconds(
            self.options.update_lock_threshold.as_millis() as i64
        );

        let due = self
            .last_lock_update
            .map_or(true, |last| last + threshold <= now);

        if !due {
            return Ok(());
        }

        self.engine
            .renew_lock(&self.name, self.options.lock_timeout)
            .await?;
        self.last_lock_update = Some(now);

        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.persist().await?;
        self.is_stopped = true;

        match self
            .engine
            .update_status(&self.name, ProjectionStatus::Idle)
            .await
        {
            Ok(()) | Err(ProjectionError::ProjectionNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        self.status = ProjectionStatus::Idle;

        Ok(())
    }

    /// Clears position and state, re-seeds state and resets the read model.
    pub async fn reset(&mut self) -> Result<()> {
        debug!(projection = %self.name, "resetting");

        self.positions.clear();
        self.state = self.initial_state();
        self.read_model.reset().await?;

        let state = serde_json::to_value(&self.state)?;
        self.engine
            .reset_row(&self.name, &state, self.status)
            .await?;

        Ok(())
    }

    /// Removes the registry row, optionally deleting the read model too.
    pub async fn delete(&mut self, delete_read_model: bool) -> Result<()> {
        debug!(projection = %self.name, delete_read_model, "deleting");

        self.engine.delete_row(&self.name).await?;

        if delete_read_model {
            self.read_model.delete().await?;
        }

        self.is_stopped = true;
        self.positions.clear();
        self.state = self.initial_state();
        self.status = ProjectionStatus::Idle;

        Ok(())
    }

    async fn start_again(&mut self) -> Result<()> {
        self.is_stopped = false;
        self.engine
            .start_again(&self.name, self.options.lock_timeout)
            .await?;
        self.status = ProjectionStatus::Running;
        self.last_lock_update = Some(Utc::now());

        Ok(())
    }
}
