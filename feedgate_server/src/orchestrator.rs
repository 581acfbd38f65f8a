//! Request orchestration for the token and fetch-batch calls
//!
//! Each step runs in strict order and a failing step stops the call before
//! the next one runs. Nothing reaches the renderer until the token has been
//! spent and every URL in the batch has passed.

use crate::abuse::{FeedRequestValidator, UrlValidator};
use crate::csrf::TokenStore;
use crate::error::GateError;
use crate::pipeline::{Artifact, FeedBatch, FeedPipeline, PipelineError};
use feedgate_common::{FetchBatchRequest, SafetyVerdict, TokenResponse};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct RequestOrchestrator {
    tokens: TokenStore,
    feeds: FeedRequestValidator,
    urls: UrlValidator,
    pipeline: Arc<dyn FeedPipeline>,
    days_back: RangeInclusive<u32>,
}

impl RequestOrchestrator {
    pub fn new(
        tokens: TokenStore,
        urls: UrlValidator,
        max_feeds: usize,
        pipeline: Arc<dyn FeedPipeline>,
        days_back: RangeInclusive<u32>,
    ) -> Self {
        Self {
            tokens,
            feeds: FeedRequestValidator::new(urls.clone(), max_feeds),
            urls,
            pipeline,
            days_back,
        }
    }

    /// Issue a fresh single-use token
    pub async fn issue_token(&self) -> Result<TokenResponse, GateError> {
        let token = self.tokens.issue().await.map_err(|e| {
            tracing::error!("Failed to issue CSRF token: {}", e);
            GateError::Internal
        })?;

        Ok(TokenResponse {
            token,
            expires_in: self.tokens.ttl().as_secs(),
        })
    }

    /// Single URL verdict, no token involved
    pub async fn check_url(&self, url: &str) -> SafetyVerdict {
        self.urls.check_safe(url).await
    }

    /// Spend the token, validate the batch, then hand it to the renderer
    pub async fn fetch_batch(&self, token: Option<&str>, body: &[u8]) -> Result<Artifact, GateError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("fetch_batch", %request_id);
        self.run_fetch_batch(token, body).instrument(span).await
    }

    async fn run_fetch_batch(&self, token: Option<&str>, body: &[u8]) -> Result<Artifact, GateError> {
        let token = token.map(str::trim).unwrap_or_default();
        if token.is_empty() || !self.tokens.consume(token).await {
            tracing::info!("Rejected fetch-batch: invalid or missing CSRF token");
            return Err(GateError::TokenInvalid);
        }

        let request = FetchBatchRequest::from_slice(body)
            .map_err(|e| GateError::MalformedInput(e.to_string()))?;
        let batch = self.admit(request).await?;

        tracing::info!(
            "Forwarding {} feed(s) to renderer, days_back={}",
            batch.urls.len(),
            batch.days_back
        );

        match self.pipeline.produce(&batch).await {
            Ok(artifact) => {
                tracing::info!("Renderer returned {} bytes", artifact.bytes.len());
                Ok(artifact)
            }
            Err(PipelineError::Empty) => Err(GateError::NothingFound),
            Err(e) => {
                tracing::error!("Feed pipeline failed: {}", e);
                Err(GateError::DownstreamFailure)
            }
        }
    }

    /// Shape checks first (cheap), then the per-URL checks (DNS)
    async fn admit(&self, request: FetchBatchRequest) -> Result<FeedBatch, GateError> {
        let days_back = u32::try_from(request.days_back)
            .ok()
            .filter(|days| self.days_back.contains(days))
            .ok_or_else(|| {
                GateError::MalformedInput(format!(
                    "'days_back' must be between {} and {}.",
                    self.days_back.start(),
                    self.days_back.end()
                ))
            })?;

        self.feeds.check_count(&request.urls)?;

        if let Err(e) = self.feeds.validate_batch(&request.urls).await {
            tracing::info!("Rejected fetch-batch: {}", e);
            return Err(e.into());
        }

        Ok(FeedBatch {
            urls: request.urls,
            days_back,
        })
    }
}
