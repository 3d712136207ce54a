//! Failures that end a request at the HTTP boundary.
//!
//! Predicate failures (wrong code, email mismatch, rejected embed) are not
//! errors here: handlers answer them with a 200 envelope carrying a boolean.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use super::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("insufficient privileges")]
    Forbidden,
    #[error("rate limited, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] StoreError),
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            Self::Forbidden => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
            Self::RateLimited {
                retry_after_seconds,
            } => {
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response();
                response.headers_mut().insert(
                    RETRY_AFTER,
                    HeaderValue::from(retry_after_seconds.max(1)),
                );
                response
            }
            Self::UpstreamUnavailable(err) => {
                // Detail stays in the log; callers get a generic message.
                error!("Upstream failure: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Service temporarily unavailable",
                )
                    .into_response()
            }
        }
    }
}
