//! The request/response layer on top of the [`FetchCoordinator`].
//!
//! The [`RequestService`] is the state shared by all HTTP handlers. It checks the credential
//! presented by a request and turns a [`Resolution`] into the [`DownloadResponse`] sent back to
//! the client.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use clipfetch_service::config::Config;
use clipfetch_service::coordinator::FetchCoordinator;
use clipfetch_service::producer::FetchResult;
use clipfetch_service::services::SharedServices;
use clipfetch_service::types::{FetchKey, Resolution, ResolutionSource, VideoMetadata};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How a successful download request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// The video was fetched for this request, or for a concurrent one it was coalesced with.
    Success,
    /// A fresh result was already cached.
    Cached,
}

/// The body of a successful `/download` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub status: DownloadStatus,
    pub data: Arc<VideoMetadata>,
}

impl From<Resolution> for DownloadResponse {
    fn from(resolution: Resolution) -> Self {
        let status = match resolution.source {
            ResolutionSource::Cache => DownloadStatus::Cached,
            ResolutionSource::Producer => DownloadStatus::Success,
        };
        Self {
            status,
            data: resolution.metadata,
        }
    }
}

/// The underlying service for the HTTP request handlers.
#[derive(Clone)]
pub struct RequestService {
    inner: Arc<RequestServiceInner>,
}

struct RequestServiceInner {
    /// The SHA-256 digest of the configured credential.
    credential: [u8; 32],
    coordinator: FetchCoordinator,
}

impl RequestService {
    /// Creates the service and all shared services from the configuration.
    ///
    /// Fails if no `credential` is configured.
    pub fn create(config: Config) -> Result<Self> {
        let credential = config
            .credential
            .clone()
            .filter(|credential| !credential.is_empty())
            .context("no `credential` configured, refusing to serve unauthenticated requests")?;

        let SharedServices { coordinator, .. } = SharedServices::new(config)?;
        Ok(Self::new(coordinator, credential))
    }

    pub fn new(coordinator: FetchCoordinator, credential: impl Into<String>) -> Self {
        let credential: String = credential.into();
        let inner = RequestServiceInner {
            credential: Sha256::digest(credential.as_bytes()).into(),
            coordinator,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Checks the API key presented by a request.
    ///
    /// The digests of both keys are compared in constant time, so the time taken does not depend
    /// on how much of the key was guessed right.
    pub fn is_authorized(&self, api_key: Option<&str>) -> bool {
        let Some(api_key) = api_key else {
            return false;
        };
        let presented: [u8; 32] = Sha256::digest(api_key.as_bytes()).into();
        let difference = presented
            .iter()
            .zip(&self.inner.credential)
            .fold(0, |acc, (a, b)| acc | (a ^ b));
        difference == 0
    }

    /// Resolves the video for `key`.
    pub async fn download(&self, key: FetchKey) -> FetchResult<DownloadResponse> {
        let resolution = self.inner.coordinator.resolve(key).await?;
        Ok(resolution.into())
    }
}

impl fmt::Debug for RequestService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestService")
            .field("coordinator", &self.inner.coordinator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_to_start_without_credential() {
        let config = Config {
            credential: None,
            cache_dir: None,
            ..Default::default()
        };
        let error = RequestService::create(config).unwrap_err();
        assert!(error.to_string().contains("no `credential` configured"));

        let config = Config {
            credential: Some(String::new()),
            cache_dir: None,
            ..Default::default()
        };
        assert!(RequestService::create(config).is_err());
    }

    fn service(credential: &str) -> RequestService {
        let config = Config {
            cache_dir: None,
            ..Default::default()
        };
        let SharedServices { coordinator, .. } = SharedServices::new(config).unwrap();
        RequestService::new(coordinator, credential)
    }

    #[test]
    fn test_is_authorized() {
        let service = service("s3cret");

        assert!(service.is_authorized(Some("s3cret")));
        assert!(!service.is_authorized(None));
        assert!(!service.is_authorized(Some("")));
        assert!(!service.is_authorized(Some("s3cre")));
        assert!(!service.is_authorized(Some("s3cret ")));
        assert!(!service.is_authorized(Some("S3CRET")));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&DownloadStatus::Cached).unwrap(),
            r#""cached""#
        );
        assert_eq!(
            serde_json::to_string(&DownloadStatus::Success).unwrap(),
            r#""success""#
        );
    }
}
