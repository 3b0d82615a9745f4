use chronik_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("projection {0} not found")]
    ProjectionNotFound(String),

    #[error("projection {0} was not created")]
    ProjectionNotCreated(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Runtime(String),

    #[error("store `{0}`")]
    Store(#[from] StoreError),

    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("handler `{0}`")]
    Handler(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
