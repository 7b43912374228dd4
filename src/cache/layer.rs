//! Cache layer that orchestrates caching logic with fetching.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheKey, CacheResult};

/// Cache layer that manages TTL logic in front of a producer.
///
/// Storage problems are logged and never fail a fetch; the producer's own
/// errors are returned unchanged and nothing is cached for them.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// How long a stored entry is served without re-running the producer
  ttl: Duration,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      ttl: Duration::minutes(5),
    }
  }

  /// Set the time-to-live for cached data.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  fn is_fresh(&self, timestamp: DateTime<Utc>) -> bool {
    Utc::now() - timestamp < self.ttl
  }

  /// Return the cached value for `key` if fresh, otherwise run `producer` and store its result.
  pub async fn fetch_with_cache<T, K, F, Fut>(&self, key: &K, producer: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    K: CacheKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let hash = key.cache_hash();

    match self.storage.get_entry::<T>(&hash) {
      Ok(Some(entry)) if self.is_fresh(entry.timestamp) => {
        debug!(key = %key.description(), cached_at = %entry.timestamp, "cache hit");
        return Ok(CacheResult::from_cache(entry));
      }
      Ok(_) => {}
      Err(e) => warn!(key = %key.description(), error = %e, "cache read failed"),
    }

    let data = producer().await?;

    let entry = CacheEntry::now(data);
    if let Err(e) = self
      .storage
      .store_entry(&hash, &key.description(), &entry)
    {
      warn!(key = %key.description(), error = %e, "cache write failed");
    }

    Ok(CacheResult::from_network(entry.data))
  }

  /// Drop the entries for `keys` unconditionally.
  pub fn purge<'a, K>(&self, keys: impl IntoIterator<Item = &'a K>)
  where
    K: CacheKey + ?Sized + 'a,
  {
    for key in keys {
      debug!(key = %key.description(), "purging cache entry");
      if let Err(e) = self.storage.remove_entry(&key.cache_hash()) {
        warn!(key = %key.description(), error = %e, "cache purge failed");
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      ttl: self.ttl,
    }
  }
}
