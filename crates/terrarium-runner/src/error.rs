use terrarium_domain::{DomainError, TerrariumId};
use terrarium_store::StoreError;
use terrarium_tofu::ExecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("a previous request is still in progress (trId: {0})")]
    InProgress(TerrariumId),

    #[error("tofu error: {0}")]
    Exec(#[from] ExecError),

    #[error("execution task panicked: {0}")]
    Panicked(String),

    #[error("no request found (trId: {0})")]
    NoRequest(TerrariumId),

    #[error("status log file does not exist: {0}")]
    LogMissing(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no terrarium (trId: {0})")]
    NotFound(TerrariumId),

    #[error("the terrarium (trId: {0}) already exists")]
    AlreadyExists(TerrariumId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("no providers for terrarium (trId: {0})")]
    NoProviders(TerrariumId),

    #[error("cannot decode output of provider {provider}: {source}")]
    Decode {
        provider: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RunError {
    /// Captured tool output carried by a failed or cancelled run.
    pub fn output(&self) -> Option<&str> {
        match self {
            RunError::Exec(e) => e.output(),
            _ => None,
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        RunError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
