//! The core of clipfetch: resolving video pages into cached [`VideoMetadata`](types::VideoMetadata).
//!
//! Requests are funneled through the [`FetchCoordinator`](coordinator::FetchCoordinator), which
//! serves fresh results from a [`CacheStore`](caching::CacheStore) and otherwise runs the
//! [`Producer`](producer::Producer) at most once per key, no matter how many callers ask for
//! the same key concurrently.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod producer;
pub mod services;
pub mod types;
pub mod utils;

#[cfg(any(feature = "test", test))]
#[allow(unused)]
pub mod test;
