use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use clipfetch_service::metric;

use crate::endpoints::ResponseError;
use crate::service::RequestService;

/// The header carrying the shared API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests that do not present the configured API key.
pub async fn require_api_key(
    State(service): State<RequestService>,
    request: Request,
    next: Next,
) -> Result<Response, ResponseError> {
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if !service.is_authorized(api_key) {
        metric!(counter("requests.unauthorized") += 1);
        return Err((StatusCode::FORBIDDEN, "Invalid API Key").into());
    }

    Ok(next.run(request).await)
}
