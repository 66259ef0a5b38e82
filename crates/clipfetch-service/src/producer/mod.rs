//! Turning a [`FetchKey`] into [`VideoMetadata`].
//!
//! This is the slow and failure-prone part of serving a request. The [`VideoPipeline`] first
//! scrapes the video page with an [`Extractor`] and then, if requested, runs the video through a
//! [`Transformer`] to remove the watermark. All failures along the way are reported as a
//! [`FetchError`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::types::{FetchKey, VideoMetadata};

mod extract;
mod transform;

pub use extract::{Extractor, PageExtractor};
pub use transform::{FfmpegTransformer, Transformer};

/// An error that happens while producing [`VideoMetadata`].
///
/// The same error is handed to every caller that was waiting on the failed computation, which is
/// why it needs to be cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The video page could not be fetched, for example because of a connection problem or an
    /// error response.
    #[error("failed to fetch video page: {0}")]
    Extraction(String),
    /// The video page was fetched, but is missing an expected element.
    #[error("video page has no {0}")]
    MissingContent(&'static str),
    /// The watermark removal failed.
    #[error("failed to remove watermark: {0}")]
    Transform(String),
    /// The producer did not finish within the configured timeout.
    #[error("fetching timed out after {0:?}")]
    Timeout(Duration),
    /// An unexpected error in clipfetch itself.
    #[error("internal error")]
    InternalError,
}

impl FetchError {
    /// A short name of the variant for use in metrics.
    pub fn as_tag(&self) -> &'static str {
        match self {
            FetchError::Extraction(_) => "extraction",
            FetchError::MissingContent(_) => "missing_content",
            FetchError::Transform(_) => "transform",
            FetchError::Timeout(_) => "timeout",
            FetchError::InternalError => "internal",
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// A potentially slow computation of the [`VideoMetadata`] for a [`FetchKey`].
pub trait Producer: Send + Sync + 'static {
    fn produce<'a>(&'a self, key: &'a FetchKey) -> BoxFuture<'a, FetchResult<VideoMetadata>>;
}

/// The production [`Producer`]: extraction followed by an optional transform.
#[derive(Clone)]
pub struct VideoPipeline {
    extractor: Arc<dyn Extractor>,
    transformer: Arc<dyn Transformer>,
}

impl std::fmt::Debug for VideoPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPipeline").finish_non_exhaustive()
    }
}

impl VideoPipeline {
    pub fn new(extractor: Arc<dyn Extractor>, transformer: Arc<dyn Transformer>) -> Self {
        Self {
            extractor,
            transformer,
        }
    }

    /// Creates the pipeline with the [`PageExtractor`] and [`FfmpegTransformer`].
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let extractor = PageExtractor::from_config(&config.extraction)?;
        let transformer = FfmpegTransformer::from_config(&config.transform);
        Ok(Self::new(Arc::new(extractor), Arc::new(transformer)))
    }

    async fn run(&self, key: &FetchKey) -> FetchResult<VideoMetadata> {
        let mut metadata = self.extractor.extract(&key.url).await?;
        tracing::debug!(url = %key.url, video_url = %metadata.video_url, "Extracted video page");

        if key.remove_watermark {
            metadata.video_url = self.transformer.transform(&metadata.video_url, key).await?;
            tracing::debug!(url = %key.url, output = %metadata.video_url, "Removed watermark");
        }

        Ok(metadata)
    }
}

impl Producer for VideoPipeline {
    fn produce<'a>(&'a self, key: &'a FetchKey) -> BoxFuture<'a, FetchResult<VideoMetadata>> {
        Box::pin(self.run(key))
    }
}

/// Returns `true` for URLs the [`PageExtractor`] is able to fetch.
pub fn is_supported_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
