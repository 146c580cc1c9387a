use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("not specified the terrarium ID")]
    MissingId,

    #[error("invalid terrarium ID {0:?}: must be a single path segment")]
    InvalidId(String),

    #[error("invalid request ID {0:?}: must be a single path segment")]
    InvalidRequestId(String),

    #[error("invalid enrichments for terrarium (trId: {0}): value must not be empty")]
    EmptyEnrichments(String),

    #[error("invalid enrichments for terrarium (trId: {id}): {value:?} must be a relative path without '.' or '..'")]
    InvalidEnrichments { id: String, value: String },

    #[error("the terrarium (trId: {id}) is already used for another purpose ({current})")]
    EnrichmentConflict {
        id: String,
        current: String,
        requested: String,
    },
}
