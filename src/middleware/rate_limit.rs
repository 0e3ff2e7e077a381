use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::db::AppState;
use crate::error::AppError;
use crate::rate_limit::Admission;
use crate::util::client_ip;

pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Per-client sliding-window limit for the public API. Clients are keyed by
/// forwarded address, then peer address, then a shared `unknown` bucket.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = client_ip(request.headers(), request.extensions())
        .unwrap_or_else(|| "unknown".to_string());
    let limit = state.limiter.capacity();

    let (remaining, mut response) = match state.limiter.try_acquire(&client) {
        Admission::Admitted { remaining } => (remaining, next.run(request).await),
        Admission::Limited { retry_after } => {
            tracing::warn!("Rate limit exceeded for {}", client);
            // Round up so clients never retry before a slot frees
            let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let err = AppError::RateLimited {
                remaining: 0,
                retry_after_secs: retry_after_secs.max(1),
            };
            (0, err.into_response())
        }
    };

    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
    response
}
