#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stream {0} already exists")]
    StreamExistsAlready(String),

    #[error("stream {0} not found")]
    StreamNotFound(String),

    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("missing _aggregate_version in event metadata")]
    AggregateVersionMissing,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    UnexpectedValue(String),

    #[error("database error {code}: {message}")]
    Runtime { code: String, message: String },

    #[error("metadata must be an object")]
    MetadataInvalidObjectType,

    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("uuid `{0}`")]
    Uuid(#[from] uuid::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
