// Re-export the event store and the projection engine under one roof
pub use chronik_store::*;

pub use chronik_projection::{
    GapDetection, Handler, Handlers, ProjectionEngine, ProjectionError, ProjectionManager,
    ProjectionQuery, ProjectionStatus, Projector, ProjectorContext, ProjectorOptions,
    QueryContext, ReadModel, ReadModelContext, ReadModelProjector, SourceStreams,
};

#[cfg(feature = "mysql")]
pub use chronik_projection::MySqlProjectionEngine;

#[cfg(feature = "postgres")]
pub use chronik_projection::PostgresProjectionEngine;

/// Result alias for projection work; the store side has its own in
/// [`chronik_store`].
pub use chronik_projection::Result as ProjectionResult;
