//! Request-level errors and their HTTP mapping
//!
//! Every failure is per-request. Messages for token and key failures are
//! deliberately generic; downstream failures never echo lower-level detail.

use crate::abuse::{BatchError, RateLimitResult};
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use feedgate_common::ErrorBody;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// Unparseable body, wrong JSON types, out-of-range fields
    #[error("{0}")]
    MalformedInput(String),

    /// Empty batch, too many URLs, or a URL failing the safety check
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Missing, unknown, expired or replayed anti-forgery token
    #[error("Invalid or expired CSRF token.")]
    TokenInvalid,

    #[error("Unauthorized.")]
    Unauthorized,

    #[error("Request body exceeds the {limit_kb} KB limit.")]
    PayloadTooLarge { limit_kb: usize },

    #[error("Rate limit exceeded. Please slow down and try again.")]
    RateLimited(RateLimitResult),

    #[error("No articles found.")]
    NothingFound,

    #[error("Not found.")]
    NotFound,

    /// The fetch/render collaborator failed after validation passed
    #[error("Feed processing failed. Please try again later.")]
    DownstreamFailure,

    #[error("Internal error.")]
    Internal,
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::MalformedInput(_) | GateError::Batch(_) | GateError::TokenInvalid => {
                StatusCode::BAD_REQUEST
            }
            GateError::Unauthorized => StatusCode::UNAUTHORIZED,
            GateError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GateError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GateError::NothingFound | GateError::NotFound => StatusCode::NOT_FOUND,
            GateError::DownstreamFailure | GateError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ErrorBody::new(self.to_string());

        let limit = match self {
            GateError::RateLimited(limit) => {
                body.retry_after = limit.retry_after();
                Some(limit)
            }
            _ => None,
        };

        let mut response = (status, Json(body)).into_response();

        if let Some(limit) = limit {
            let headers = response.headers_mut();
            for (name, value) in limit.headers() {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(name, value);
                }
            }
            if let Some(secs) = limit.retry_after() {
                headers.insert("retry-after", HeaderValue::from(secs));
            }
        }

        response
    }
}
