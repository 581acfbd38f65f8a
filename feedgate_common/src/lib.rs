//! Feedgate Common - Shared wire types for the request-safety gate
//!
//! This crate contains the request/response bodies and protocol constants
//! used by the gate server and by clients that talk to it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Request body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of a URL safety check
///
/// `reason` is empty exactly when the URL is allowed; the constructors are the
/// only way to build one so that invariant holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    allowed: bool,
    reason: String,
}

impl SafetyVerdict {
    /// The URL may be fetched
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    /// The URL must not be fetched
    pub fn blocked(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug_assert!(!reason.is_empty(), "blocked verdict needs a reason");
        Self {
            allowed: false,
            reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Response to `GET /token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Opaque single-use anti-forgery token
    pub token: String,

    /// Seconds until the token expires
    pub expires_in: u64,
}

/// Body of `POST /fetch-batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchBatchRequest {
    /// Candidate feed URLs, in the order they should be fetched
    pub urls: Vec<String>,

    /// How many days of articles to include
    #[serde(default = "default_days_back")]
    pub days_back: i64,
}

fn default_days_back() -> i64 {
    constants::DEFAULT_DAYS_BACK
}

impl FetchBatchRequest {
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Body of `POST /validate`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub url: String,
}

impl ValidateRequest {
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Response to `POST /validate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub url: String,

    #[serde(flatten)]
    pub verdict: SafetyVerdict,
}

/// Batch handed to the downstream renderer once every URL has passed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub urls: Vec<String>,
    pub days_back: u32,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,

    /// Seconds until the rate window resets (429 only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retry_after: None,
        }
    }
}

/// Constants for the protocol
pub mod constants {
    /// Header carrying the anti-forgery token
    pub const CSRF_HEADER: &str = "X-CSRF-Token";

    /// `days_back` used when the request omits it
    pub const DEFAULT_DAYS_BACK: i64 = 3;

    /// Default inclusive `days_back` bound
    pub const MIN_DAYS_BACK: u32 = 1;
    pub const MAX_DAYS_BACK: u32 = 30;

    /// Default maximum number of feed URLs per batch
    pub const MAX_FEEDS: usize = 10;

    /// Default maximum request body size (64 KB)
    pub const MAX_BODY_BYTES: usize = 64 * 1024;

    /// Default token lifetime in seconds
    pub const TOKEN_TTL_SECONDS: u64 = 300;

    /// Redis key prefix for anti-forgery tokens
    pub const TOKEN_PREFIX: &str = "csrf:";

    /// Redis key prefix for rate limit windows
    pub const RATE_LIMIT_PREFIX: &str = "rl";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_reason_empty_iff_allowed() {
        let ok = SafetyVerdict::allowed();
        assert!(ok.is_allowed());
        assert!(ok.reason().is_empty());

        let blocked = SafetyVerdict::blocked("URL could not be parsed.");
        assert!(!blocked.is_allowed());
        assert_eq!(blocked.reason(), "URL could not be parsed.");
    }

    #[test]
    fn test_fetch_batch_request_defaults_days_back() {
        let req = FetchBatchRequest::from_slice(br#"{"urls": ["https://example.com/feed"]}"#)
            .unwrap();
        assert_eq!(req.urls, vec!["https://example.com/feed".to_string()]);
        assert_eq!(req.days_back, constants::DEFAULT_DAYS_BACK);
    }

    #[test]
    fn test_fetch_batch_request_rejects_wrong_types() {
        let err = FetchBatchRequest::from_slice(br#"{"urls": "https://example.com"}"#);
        assert!(matches!(err, Err(ProtocolError::Json(_))));

        let err = FetchBatchRequest::from_slice(br#"{"urls": [], "days_back": "three"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_validate_response_flattens_verdict() {
        let resp = ValidateResponse {
            url: "ftp://example.com/".to_string(),
            verdict: SafetyVerdict::blocked("Scheme 'ftp' is not permitted."),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["url"], "ftp://example.com/");
        assert_eq!(json["allowed"], false);
        assert_eq!(json["reason"], "Scheme 'ftp' is not permitted.");
    }

    #[test]
    fn test_error_body_omits_missing_retry_after() {
        let json = serde_json::to_string(&ErrorBody::new("Unauthorized.")).unwrap();
        assert_eq!(json, r#"{"error":"Unauthorized."}"#);
    }
}
