use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use terrarium_domain::RequestId;

use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Take the request id from `X-Request-Id` (or generate one), expose it to
/// handlers as an `Extension<RequestId>` and echo it on the response.
///
/// The id names a log file, so a header value that is not a plain path
/// segment is rejected with 400.
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let req_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RequestId::new)
        .unwrap_or_else(RequestId::generate);
    if let Err(e) = req_id.validate() {
        return ApiError::bad_request(e.to_string()).into_response();
    }

    request.extensions_mut().insert(req_id.clone());
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(req_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
