//! Storage for resolved [`VideoMetadata`].
//!
//! The [`FetchCoordinator`](crate::coordinator::FetchCoordinator) only talks to a
//! [`CacheStore`]. Two implementations are provided:
//!
//! - [`InMemoryCacheStore`]: entries live in a size-bounded in-process cache and are lost on
//!   restart.
//! - [`FilesystemCacheStore`]: entries are persisted as JSON files below the configured
//!   `cache_dir` and survive restarts. Expired files are ignored on read and removed by
//!   [`cleanup`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::config::Config;
use crate::types::{FetchKey, VideoMetadata};

mod cleanup;
mod fs;
mod memory;

pub use cleanup::cleanup;
pub use fs::FilesystemCacheStore;
pub use memory::InMemoryCacheStore;

/// The longest time an entry is kept, regardless of the requested TTL.
///
/// Deadlines are computed as `now + ttl`, which would overflow for huge TTLs.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// An error talking to a [`CacheStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheStoreError {
    /// The store could not be read from.
    #[error("cache read failed: {0}")]
    Read(String),
    /// The store rejected or failed to persist a new entry.
    #[error("cache write failed: {0}")]
    Write(String),
}

/// A key/value store with per-entry expiration.
///
/// Both operations are expected to be fast compared to the producer, and to be callable for
/// distinct keys concurrently.
pub trait CacheStore: Send + Sync + 'static {
    /// Looks up a fresh entry for `key`.
    ///
    /// Expired entries are reported as `Ok(None)`.
    fn get<'a>(
        &'a self,
        key: &'a FetchKey,
    ) -> BoxFuture<'a, Result<Option<Arc<VideoMetadata>>, CacheStoreError>>;

    /// Stores `value` for `key`, to be considered fresh for `ttl`.
    ///
    /// TTLs longer than [`MAX_TTL`] are capped.
    fn set<'a>(
        &'a self,
        key: &'a FetchKey,
        value: Arc<VideoMetadata>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheStoreError>>;
}

/// Creates the cache store according to the configuration.
///
/// A configured `cache_dir` selects the [`FilesystemCacheStore`], otherwise results are only
/// kept in memory.
pub fn store_from_config(config: &Config) -> std::io::Result<Arc<dyn CacheStore>> {
    match FilesystemCacheStore::from_config(config)? {
        Some(store) => {
            tracing::info!(
                path = %store.cache_dir().display(),
                "Using filesystem cache"
            );
            store.clear_tmp()?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!(
                capacity = config.in_memory_capacity,
                "Using in-memory cache"
            );
            Ok(Arc::new(InMemoryCacheStore::new(config.in_memory_capacity)))
        }
    }
}
