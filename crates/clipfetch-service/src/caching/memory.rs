use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use crate::types::{FetchKey, VideoMetadata};

use super::{CacheStore, CacheStoreError, MAX_TTL};

/// An item saved in the in-memory moka cache.
#[derive(Clone, Debug)]
struct InMemoryItem {
    /// When to evict this item from the in-memory cache.
    deadline: Instant,
    /// The actual data.
    data: Arc<VideoMetadata>,
}

/// A struct implementing [`moka::Expiry`] that uses the [`InMemoryItem`] [`Instant`] as the explicit
/// expiration time.
struct CacheExpiration;

/// Returns the duration between the `current_time` and `target_time` in the future.
/// In case the `target_time` is already elapsed (it is in the past relative to `current_time`), this
/// will return `Some(ZERO)`.
fn saturating_duration_since(current_time: Instant, target_time: Instant) -> Option<Duration> {
    Some(
        target_time
            .checked_duration_since(current_time)
            .unwrap_or_default(),
    )
}

impl moka::Expiry<FetchKey, InMemoryItem> for CacheExpiration {
    fn expire_after_create(
        &self,
        _key: &FetchKey,
        value: &InMemoryItem,
        current_time: Instant,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }

    fn expire_after_update(
        &self,
        _key: &FetchKey,
        value: &InMemoryItem,
        current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        saturating_duration_since(current_time, value.deadline)
    }
}

/// A [`CacheStore`] that keeps entries in process memory.
///
/// The store holds at most `capacity` entries, evicting the least recently used ones first.
#[derive(Clone, Debug)]
pub struct InMemoryCacheStore {
    cache: moka::future::Cache<FetchKey, InMemoryItem>,
}

impl InMemoryCacheStore {
    pub fn new(capacity: u64) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(capacity)
            .name("videos")
            .expire_after(CacheExpiration)
            .build();

        Self { cache }
    }

    /// The number of entries currently held, including ones that are pending eviction.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get<'a>(
        &'a self,
        key: &'a FetchKey,
    ) -> BoxFuture<'a, Result<Option<Arc<VideoMetadata>>, CacheStoreError>> {
        Box::pin(async move {
            // moka evicts lazily, so an expired item might still be returned here.
            let item = self
                .cache
                .get(key)
                .await
                .filter(|item| item.deadline > Instant::now());
            Ok(item.map(|item| item.data))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a FetchKey,
        value: Arc<VideoMetadata>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheStoreError>> {
        Box::pin(async move {
            let item = InMemoryItem {
                deadline: Instant::now() + ttl.min(MAX_TTL),
                data: value,
            };
            self.cache.insert(key.clone(), item).await;
            Ok(())
        })
    }
}
