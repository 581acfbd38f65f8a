//! Feed batch limits: URL count plus per-URL SSRF checks

use super::ssrf::{UrlRejection, UrlValidator};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("At least one feed URL is required.")]
    Empty,

    #[error("A maximum of {max} feed URLs are allowed per request.")]
    TooMany { max: usize, got: usize },

    #[error("Rejected URL '{url}': {reason}")]
    Rejected { url: String, reason: UrlRejection },
}

/// Applies count limits to a batch and validates each URL in order
#[derive(Clone)]
pub struct FeedRequestValidator {
    urls: UrlValidator,
    max_feeds: usize,
}

impl FeedRequestValidator {
    pub fn new(urls: UrlValidator, max_feeds: usize) -> Self {
        Self { urls, max_feeds }
    }

    /// Check only the batch size; performs no lookups
    pub fn check_count(&self, urls: &[String]) -> Result<(), BatchError> {
        if urls.is_empty() {
            return Err(BatchError::Empty);
        }
        if urls.len() > self.max_feeds {
            return Err(BatchError::TooMany {
                max: self.max_feeds,
                got: urls.len(),
            });
        }
        Ok(())
    }

    /// Validate a batch, stopping at the first rejected URL
    pub async fn validate_batch(&self, urls: &[String]) -> Result<(), BatchError> {
        self.check_count(urls)?;

        for url in urls {
            if let Err(reason) = self.urls.check(url).await {
                return Err(BatchError::Rejected {
                    url: url.clone(),
                    reason,
                });
            }
        }

        Ok(())
    }
}
