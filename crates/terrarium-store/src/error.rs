use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db file path is not set")]
    PathNotConfigured,

    #[error("db file does not exist: {0}")]
    SnapshotMissing(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
