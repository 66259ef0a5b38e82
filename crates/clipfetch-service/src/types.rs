use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Identifies one unit of work: a video page plus every flag that changes the result.
///
/// Two requests for the same page with and without watermark removal produce different
/// results, so they must never share a cache slot or an in-flight computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchKey {
    /// The page the video is scraped from.
    pub url: Url,
    /// Whether the video should be passed through the watermark removal transform.
    #[serde(default)]
    pub remove_watermark: bool,
}

impl FetchKey {
    pub fn new(url: Url, remove_watermark: bool) -> Self {
        Self {
            url,
            remove_watermark,
        }
    }

    /// A stable, filesystem-safe digest of this key.
    ///
    /// This is used by persistent stores and to name transform outputs.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(if self.remove_watermark { b"1" } else { b"0" });
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)?;
        if self.remove_watermark {
            f.write_str(" (watermark removed)")?;
        }
        Ok(())
    }
}

/// The metadata extracted from a video page.
///
/// This is never mutated after it was produced, and is shared between all waiters as an
/// `Arc<VideoMetadata>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Where the video can be fetched from.
    ///
    /// When the watermark was removed, this is the path of the transformed file instead.
    pub video_url: String,
    pub title: String,
    pub author: String,
}

/// Where a [`Resolution`] was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// A fresh entry already existed in the cache store.
    Cache,
    /// The producer ran for this request, or for a concurrent request it was coalesced with.
    Producer,
}

/// The successful outcome of [`FetchCoordinator::resolve`](crate::coordinator::FetchCoordinator::resolve).
#[derive(Debug, Clone)]
pub struct Resolution {
    pub metadata: Arc<VideoMetadata>,
    pub source: ResolutionSource,
}

impl Resolution {
    pub fn cached(metadata: Arc<VideoMetadata>) -> Self {
        Self {
            metadata,
            source: ResolutionSource::Cache,
        }
    }

    pub fn produced(metadata: Arc<VideoMetadata>) -> Self {
        Self {
            metadata,
            source: ResolutionSource::Producer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str, remove_watermark: bool) -> FetchKey {
        FetchKey::new(url.parse().unwrap(), remove_watermark)
    }

    #[test]
    fn test_cache_key_depends_on_flag() {
        let plain = key("https://example.com/@someone/video/1", false);
        let clean = key("https://example.com/@someone/video/1", true);

        assert_ne!(plain, clean);
        assert_ne!(plain.cache_key(), clean.cache_key());
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = key("https://example.com/@someone/video/1", true);
        let b = key("https://example.com/@someone/video/1", true);

        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key().len(), 64);
        assert!(a.cache_key().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_metadata_field_names() {
        let metadata = VideoMetadata {
            video_url: "https://cdn.example.com/v.mp4".into(),
            title: "T".into(),
            author: "A".into(),
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "video_url": "https://cdn.example.com/v.mp4",
                "title": "T",
                "author": "A",
            })
        );
    }
}
