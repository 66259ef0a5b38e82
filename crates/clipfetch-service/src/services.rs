//! Provides the shared clipfetch services and a way to initialize them.
//!
//! [`SharedServices`] wires the configured [`CacheStore`](crate::caching::CacheStore) and the
//! [`VideoPipeline`] into a [`FetchCoordinator`] according to the provided [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching;
use crate::config::Config;
use crate::coordinator::FetchCoordinator;
use crate::producer::VideoPipeline;

pub struct SharedServices {
    pub config: Config,
    pub coordinator: FetchCoordinator,
}

impl SharedServices {
    pub fn new(config: Config) -> Result<Self> {
        let store = caching::store_from_config(&config).context("failed to create cache store")?;
        let pipeline =
            VideoPipeline::from_config(&config).context("failed to create video pipeline")?;

        let coordinator = FetchCoordinator::new(
            store,
            Arc::new(pipeline),
            config.cache_ttl(),
            config.producer_timeout,
        );

        Ok(Self {
            config,
            coordinator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_with_filesystem_cache() {
        clipfetch_test::setup();
        let cache_dir = clipfetch_test::tempdir();
        let config = Config {
            cache_dir: Some(cache_dir.path().to_owned()),
            ..Default::default()
        };

        let services = SharedServices::new(config).unwrap();
        assert_eq!(services.coordinator.in_flight(), 0);
        assert!(cache_dir.path().join("videos").is_dir());
        assert!(cache_dir.path().join("tmp").is_dir());
    }
}
