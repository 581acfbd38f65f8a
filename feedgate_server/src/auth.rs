//! Bearer API key check for the fetch-triggering routes

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Outcome of an API key check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    /// A configured key was presented
    Accepted,
    /// No keys are configured (development only); request allowed
    Disabled,
    /// Missing or unknown key
    Rejected,
}

impl KeyCheck {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, KeyCheck::Rejected)
    }
}

/// Holds digests of the configured keys
#[derive(Clone)]
pub struct ApiKeyGuard {
    digests: Vec<[u8; 32]>,
}

impl ApiKeyGuard {
    pub fn new(keys: &[String]) -> Self {
        Self {
            digests: keys.iter().map(|k| digest(k)).collect(),
        }
    }

    pub fn is_enforced(&self) -> bool {
        !self.digests.is_empty()
    }

    /// Check the `Authorization: Bearer <key>` header
    pub fn check(&self, headers: &HeaderMap) -> KeyCheck {
        if !self.is_enforced() {
            return KeyCheck::Disabled;
        }

        let provided = match extract_bearer_token(headers) {
            Some(key) if !key.is_empty() => digest(key),
            _ => return KeyCheck::Rejected,
        };

        // Compare every digest so timing does not depend on which key matched
        let matched = self
            .digests
            .iter()
            .fold(false, |found, stored| found | digests_equal(stored, &provided));

        if matched {
            KeyCheck::Accepted
        } else {
            KeyCheck::Rejected
        }
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

fn digests_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let (scheme, key) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| key.trim())
}
