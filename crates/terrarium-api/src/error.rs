use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use terrarium_domain::DomainError;
use terrarium_runner::RunError;
use tracing::warn;

use crate::response::ApiResponse;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Tool output captured before the failure, if any.
    pub detail: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        ApiError { status, message: msg.into(), detail: None }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = ApiResponse::failure(self.message);
        body.detail = self.detail;
        (self.status, Json(body)).into_response()
    }
}

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        let detail = e.output().map(str::to_string);
        let mut err = match &e {
            RunError::InProgress(_)
            | RunError::AlreadyExists(_)
            | RunError::Domain(DomainError::EnrichmentConflict { .. }) => {
                ApiError::conflict(e.to_string())
            }
            RunError::NotFound(_) | RunError::NoRequest(_) | RunError::LogMissing(_) => {
                ApiError::not_found(e.to_string())
            }
            RunError::Domain(_) | RunError::NoProviders(_) => ApiError::bad_request(e.to_string()),
            _ => {
                warn!(error = %e, "request failed");
                ApiError::internal(e.to_string())
            }
        };
        err.detail = detail;
        err
    }
}
