//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use super::traits::CacheEntry;
use crate::db::Database;

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get the entry stored under `key`.
  fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>>;

  /// Store (or overwrite) the entry under `key`.
  fn store_entry<T: Serialize>(&self, key: &str, description: &str, entry: &CacheEntry<T>)
    -> Result<()>;

  /// Remove the entry under `key`. Missing keys are not an error.
  fn remove_entry(&self, key: &str) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get_entry<T: DeserializeOwned>(&self, _key: &str) -> Result<Option<CacheEntry<T>>> {
    Ok(None) // Always miss
  }

  fn store_entry<T: Serialize>(
    &self,
    _key: &str,
    _description: &str,
    _entry: &CacheEntry<T>,
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove_entry(&self, _key: &str) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Remove every entry, including ones no current key maps to.
  pub fn clear(&self) -> Result<usize> {
    self
      .db
      .conn()?
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }
}

impl CacheStorage for SqliteStorage {
  fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
    let conn = self.db.conn()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM cache_entries WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    let Some((data, cached_at)) = row else {
      return Ok(None);
    };

    // An entry written by an older item layout is treated as a miss
    let data: T = match serde_json::from_slice(&data) {
      Ok(data) => data,
      Err(e) => {
        warn!(key, error = %e, "discarding undecodable cache entry");
        return Ok(None);
      }
    };

    Ok(Some(CacheEntry {
      data,
      timestamp: parse_datetime(&cached_at)?,
    }))
  }

  fn store_entry<T: Serialize>(
    &self,
    key: &str,
    description: &str,
    entry: &CacheEntry<T>,
  ) -> Result<()> {
    let data =
      serde_json::to_vec(&entry.data).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO cache_entries (cache_key, description, data, cached_at)
         VALUES (?, ?, ?, ?)",
        params![key, description, data, entry.timestamp.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn remove_entry(&self, key: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute("DELETE FROM cache_entries WHERE cache_key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove cache entry: {}", e))?;

    Ok(())
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::open_in_memory().unwrap())
  }

  #[test]
  fn test_store_then_get() {
    let storage = storage();
    let entry = CacheEntry::now(vec!["a".to_string(), "b".to_string()]);
    storage.store_entry("k", "test", &entry).unwrap();

    let cached: CacheEntry<Vec<String>> = storage.get_entry("k").unwrap().unwrap();
    assert_eq!(cached.data, entry.data);
    assert_eq!(cached.timestamp, entry.timestamp);
  }

  #[test]
  fn test_overwrite_replaces_entry() {
    let storage = storage();
    storage.store_entry("k", "test", &CacheEntry::now(1u32)).unwrap();
    storage.store_entry("k", "test", &CacheEntry::now(2u32)).unwrap();

    let cached: CacheEntry<u32> = storage.get_entry("k").unwrap().unwrap();
    assert_eq!(cached.data, 2);
  }

  #[test]
  fn test_remove_missing_key_is_ok() {
    let storage = storage();
    storage.remove_entry("nothing-here").unwrap();
  }

  #[test]
  fn test_undecodable_entry_is_a_miss() {
    let storage = storage();
    storage.store_entry("k", "test", &CacheEntry::now("text")).unwrap();

    let cached: Option<CacheEntry<Vec<u32>>> = storage.get_entry("k").unwrap();
    assert!(cached.is_none());
  }

  #[test]
  fn test_clear_removes_everything() {
    let storage = storage();
    storage.store_entry("a", "test", &CacheEntry::now(1u32)).unwrap();
    storage.store_entry("b", "test", &CacheEntry::now(2u32)).unwrap();

    assert_eq!(storage.clear().unwrap(), 2);
    assert!(storage.get_entry::<u32>("a").unwrap().is_none());
  }
}
