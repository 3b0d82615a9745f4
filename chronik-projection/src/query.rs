use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chronik_store::{EventStore, StoreError, StreamName};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

use crate::engine::{ProjectionEngine, SourceStreams};
use crate::error::{ProjectionError, Result};
use crate::merged::MergedStreamIterator;
use crate::projector::{Handler, Handlers};

/// Handler-facing API of a running query.
#[derive(Clone)]
pub struct QueryContext {
    pub(crate) stream_name: Arc<RwLock<Option<String>>>,
    pub(crate) stopped: Arc<AtomicBool>,
}

impl QueryContext {
    fn new() -> Self {
        Self {
            stream_name: Arc::new(RwLock::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stream_name(&self) -> Option<String> {
        self.stream_name.read().clone()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        *self.stream_name.write() = None;
    }
}

/// A projection without locking, persistence or emission: it folds its
/// source streams once and leaves the result in memory.
pub struct ProjectionQuery<S> {
    store: Box<dyn EventStore>,
    engine: Box<dyn ProjectionEngine>,
    source: Option<SourceStreams>,
    handlers: Option<Arc<Handlers<S, QueryContext>>>,
    init: Option<Box<dyn Fn() -> S + Send + Sync>>,
    ctx: QueryContext,
    state: S,
    positions: BTreeMap<String, i64>,
}

impl<S> ProjectionQuery<S>
where
    S: Default + Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(store: Box<dyn EventStore>, engine: Box<dyn ProjectionEngine>) -> Self {
        Self {
            store,
            engine,
            source: None,
            handlers: None,
            init: None,
            ctx: QueryContext::new(),
            state: S::default(),
            positions: BTreeMap::new(),
        }
    }

    pub fn init<F: Fn() -> S + Send + Sync + 'static>(mut self, init: F) -> Result<Self> {
        if self.init.is_some() {
            return Err(ProjectionError::InvalidArgument(
                "query already initialized".into(),
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

    pub fn when(mut self, handlers: HashMap<String, Handler<S, QueryContext>>) -> Result<Self> {
        if self.handlers.is_some() {
            return Err(ProjectionError::InvalidArgument(
                "handlers already configured".into(),
            ));
        }

        self.handlers = Some(Arc::new(Handlers::Named(handlers)));

        Ok(self)
    }

    pub fn when_any(mut self, handler: Handler<S, QueryContext>) -> Result<Self> {
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

    pub fn reset(&mut self) {
        self.positions.clear();
        self.state = match &self.init {
            Some(init) => init(),
            None => S::default(),
        };
    }

    /// Folds all source streams to completion (or until a handler stops the
    /// query) and returns with the final state in memory.
    pub async fn run(&mut self) -> Result<()> {
        let Some(handlers) = self.handlers.clone() else {
            return Err(ProjectionError::InvalidArgument(
                "no handlers configured".into(),
            ));
        };

        let Some(source) = self.source.clone() else {
            return Err(ProjectionError::InvalidArgument(
                "no source streams configured".into(),
            ));
        };

        self.ctx.reset();

        for stream in self.engine.fetch_source_streams(&source).await? {
            self.positions.entry(stream.to_string()).or_insert(0);
        }

        let mut sources = Vec::new();

        for (stream, position) in self.positions.clone() {
            let name = StreamName::new(stream);

            match self.store.load(&name, Some(position + 1), None, None).await {
                Ok(iterator) => sources.push((name, iterator)),
                Err(StoreError::StreamNotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let mut merged = MergedStreamIterator::new(sources);

        while let Some((stream, event)) = merged.next().await? {
            if let Some(position) = event.position() {
                self.positions.insert(stream.to_string(), position);
            }

            *self.ctx.stream_name.write() = Some(stream.to_string());

            handlers.dispatch(&mut self.state, event, &self.ctx).await?;

            if self.ctx.is_stopped() {
                break;
            }
        }

        Ok(())
    }
}
