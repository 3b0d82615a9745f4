use chronik_store::EventStore;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::engine::ProjectionEngine;
use crate::error::{ProjectionError, Result};
use crate::options::ProjectorOptions;
use crate::projector::Projector;
use crate::query::ProjectionQuery;
use crate::read_model::{ReadModel, ReadModelProjector};
use crate::status::ProjectionStatus;

/// Factory for projectors and CRUD over the `projections` registry.
///
/// Control commands write the desired status; a running projector observes
/// it on its next polling cycle.
#[derive(Clone)]
pub struct ProjectionManager {
    store: Box<dyn EventStore>,
    engine: Box<dyn ProjectionEngine>,
}

impl ProjectionManager {
    pub fn new(store: Box<dyn EventStore>, engine: Box<dyn ProjectionEngine>) -> Self {
        Self { store, engine }
    }

    pub fn create_projection<S>(
        &self,
        name: impl Into<String>,
        options: ProjectorOptions,
    ) -> Projector<S>
    where
        S: Default + Serialize + DeserializeOwned + Send + 'static,
    {
        Projector::new(name, self.store.clone(), self.engine.clone(), options)
    }

    pub fn create_read_model_projection<S, M>(
        &self,
        name: impl Into<String>,
        read_model: M,
        options: ProjectorOptions,
    ) -> ReadModelProjector<S, M>
    where
        S: Default + Serialize + DeserializeOwned + Send + 'static,
        M: ReadModel + 'static,
    {
        ReadModelProjector::new(
            name,
            self.store.clone(),
            self.engine.clone(),
            read_model,
            options,
        )
    }

    pub fn create_query<S>(&self) -> ProjectionQuery<S>
    where
        S: Default + Serialize + DeserializeOwned + Send + 'static,
    {
        ProjectionQuery::new(self.store.clone(), self.engine.clone())
    }

    pub async fn stop_projection(&self, name: &str) -> Result<()> {
        self.engine
            .update_status(name, ProjectionStatus::Stopping)
            .await
    }

    pub async fn reset_projection(&self, name: &str) -> Result<()> {
        self.engine
            .update_status(name, ProjectionStatus::Resetting)
            .await
    }

    pub async fn delete_projection(&self, name: &str, delete_emitted_events: bool) -> Result<()> {
        let status = if delete_emitted_events {
            ProjectionStatus::DeletingInclEmittedEvents
        } else {
            ProjectionStatus::Deleting
        };

        self.engine.update_status(name, status).await
    }

    pub async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        self.engine.fetch_names(filter, limit, offset).await
    }

    pub async fn fetch_projection_names_regex(
        &self,
        filter: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        self.engine.fetch_names_regex(filter, limit, offset).await
    }

    pub async fn fetch_projection_status(&self, name: &str) -> Result<ProjectionStatus> {
        self.engine
            .fetch_status(name)
            .await?
            .ok_or_else(|| ProjectionError::ProjectionNotFound(name.to_owned()))
    }

    pub async fn fetch_projection_stream_positions(&self, name: &str) -> Result<Value> {
        self.engine
            .fetch_position(name)
            .await?
            .ok_or_else(|| ProjectionError::ProjectionNotFound(name.to_owned()))
    }

    pub async fn fetch_projection_state(&self, name: &str) -> Result<Value> {
        self.engine
            .fetch_state(name)
            .await?
            .ok_or_else(|| ProjectionError::ProjectionNotFound(name.to_owned()))
    }
}
