//! Hand-off to the fetch/render collaborator
//!
//! The gate never fetches feeds itself. Once a batch has passed every check
//! it is forwarded to a renderer service that scrapes the feeds and returns
//! the produced document.

use bytes::Bytes;
use feedgate_common::RenderRequest;
use futures_util::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// Document produced by the renderer
#[derive(Debug, Clone)]
pub struct Artifact {
    pub content_type: String,
    pub filename: Option<String>,
    pub bytes: Bytes,
}

/// A fully validated batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedBatch {
    pub urls: Vec<String>,
    pub days_back: u32,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Renderer ran but found no articles in the window
    #[error("renderer found no articles")]
    Empty,

    #[error("renderer returned status {0}")]
    Status(u16),

    #[error("renderer request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The excluded fetch/render stage
pub trait FeedPipeline: Send + Sync {
    fn produce<'a>(&'a self, batch: &'a FeedBatch) -> BoxFuture<'a, Result<Artifact, PipelineError>>;
}

/// Forwards validated batches to a renderer over HTTP
pub struct RemoteRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteRenderer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        // Redirects would let the renderer endpoint bounce us somewhere unchecked
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl FeedPipeline for RemoteRenderer {
    fn produce<'a>(&'a self, batch: &'a FeedBatch) -> BoxFuture<'a, Result<Artifact, PipelineError>> {
        Box::pin(async move {
            let request = RenderRequest {
                urls: batch.urls.clone(),
                days_back: batch.days_back,
            };

            let response = self.client.post(&self.endpoint).json(&request).send().await?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(PipelineError::Empty);
            }
            if !status.is_success() {
                return Err(PipelineError::Status(status.as_u16()));
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            let filename = response
                .headers()
                .get(reqwest::header::CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .and_then(attachment_filename);

            let bytes = response.bytes().await?;

            Ok(Artifact {
                content_type,
                filename,
                bytes,
            })
        })
    }
}

/// Pull `filename="..."` out of a Content-Disposition value
fn attachment_filename(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty() && !name.contains(['/', '\\', '"']))
}
