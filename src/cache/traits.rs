//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one cached value.
///
/// The hash is the storage key; the description is kept alongside for debugging.
pub trait CacheKey {
  /// Stable, fixed-length storage key
  fn cache_hash(&self) -> String;

  /// Human-readable description of what is cached
  fn description(&self) -> String;
}

/// A persisted value and when it was stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  pub timestamp: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  pub fn now(data: T) -> Self {
    Self {
      data,
      timestamp: Utc::now(),
    }
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from freshly produced data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a fresh cache entry.
  pub fn from_cache(entry: CacheEntry<T>) -> Self {
    Self {
      data: entry.data,
      source: CacheSource::Cache,
      cached_at: Some(entry.timestamp),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// The producer ran
  Network,
  /// Served from a fresh cache entry
  Cache,
}
