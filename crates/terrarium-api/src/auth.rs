use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::response::ApiResponse;
use crate::state::AppState;

/// Path that stays reachable without a token for health checks.
pub const READYZ_PATH: &str = "/terrarium/readyz";

/// Axum middleware that requires `Authorization: Bearer <token>` when a token
/// is configured.
///
/// Returns 401 for missing, malformed, or incorrect tokens.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };
    if request.uri().path() == READYZ_PATH {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected.as_str() => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::failure("Unauthorized")),
        )
            .into_response(),
    }
}
