//! Key-value settings store with change notifications.
//!
//! Credentials and the last generated report live here. Values are JSON so
//! callers can store anything serde understands.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::db::Database;
use crate::items::SourceKind;

/// Storage area, mirroring the per-device / synced split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
  Local,
  Sync,
}

impl Area {
  fn as_str(self) -> &'static str {
    match self {
      Area::Local => "local",
      Area::Sync => "sync",
    }
  }
}

/// Emitted after a key's value actually changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsChange {
  pub area: Area,
  pub key: String,
}

/// Key under which the most recent summary is kept.
pub const LAST_REPORT_KEY: &str = "report.last";

pub fn token_key(source: SourceKind) -> String {
  format!("{}.token", source)
}

pub fn url_key(source: SourceKind) -> String {
  format!("{}.url", source)
}

/// Behavioral list overriding the config file, e.g. `jira.ongoing_statuses`.
pub fn list_key(source: SourceKind, name: &str) -> String {
  format!("{}.{}", source, name)
}

/// The source a key belongs to, if any.
pub fn source_for_key(key: &str) -> Option<SourceKind> {
  let (prefix, _) = key.split_once('.')?;
  SourceKind::ALL.into_iter().find(|source| source.name() == prefix)
}

pub trait SettingsStore: Send + Sync {
  fn get_value(&self, area: Area, key: &str) -> Result<Option<Value>>;

  fn set_value(&self, area: Area, key: &str, value: Value) -> Result<()>;

  /// Removing a missing key is not an error.
  fn remove(&self, area: Area, key: &str) -> Result<()>;

  /// Receive a notification for every subsequent change.
  fn subscribe(&self) -> broadcast::Receiver<SettingsChange>;
}

/// Typed access on top of the raw JSON values.
pub trait SettingsExt {
  fn get<T: DeserializeOwned>(&self, area: Area, key: &str) -> Result<Option<T>>;
  fn set<T: Serialize>(&self, area: Area, key: &str, value: &T) -> Result<()>;
}

impl<S: SettingsStore + ?Sized> SettingsExt for S {
  fn get<T: DeserializeOwned>(&self, area: Area, key: &str) -> Result<Option<T>> {
    self
      .get_value(area, key)?
      .map(|v| serde_json::from_value(v).map_err(|e| eyre!("Invalid value for {}: {}", key, e)))
      .transpose()
  }

  fn set<T: Serialize>(&self, area: Area, key: &str, value: &T) -> Result<()> {
    let value =
      serde_json::to_value(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.set_value(area, key, value)
  }
}

/// Settings kept in the `settings` table of the shared database.
pub struct SqliteSettings {
  db: Database,
  changes: broadcast::Sender<SettingsChange>,
}

impl SqliteSettings {
  pub fn new(db: Database) -> Self {
    let (changes, _) = broadcast::channel(64);
    Self { db, changes }
  }

  fn notify(&self, area: Area, key: &str) {
    // No subscribers is fine
    let _ = self.changes.send(SettingsChange {
      area,
      key: key.to_string(),
    });
  }
}

impl SettingsStore for SqliteSettings {
  fn get_value(&self, area: Area, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = self
      .db
      .conn()?
      .query_row(
        "SELECT value FROM settings WHERE area = ? AND key = ?",
        params![area.as_str(), key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read setting {}: {}", key, e))?;

    raw
      .map(|s| serde_json::from_str(&s).map_err(|e| eyre!("Corrupt setting {}: {}", key, e)))
      .transpose()
  }

  fn set_value(&self, area: Area, key: &str, value: Value) -> Result<()> {
    if self.get_value(area, key)?.as_ref() == Some(&value) {
      return Ok(());
    }

    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO settings (area, key, value) VALUES (?, ?, ?)",
        params![area.as_str(), key, value.to_string()],
      )
      .map_err(|e| eyre!("Failed to write setting {}: {}", key, e))?;

    self.notify(area, key);
    Ok(())
  }

  fn remove(&self, area: Area, key: &str) -> Result<()> {
    let removed = self
      .db
      .conn()?
      .execute(
        "DELETE FROM settings WHERE area = ? AND key = ?",
        params![area.as_str(), key],
      )
      .map_err(|e| eyre!("Failed to remove setting {}: {}", key, e))?;

    if removed > 0 {
      self.notify(area, key);
    }
    Ok(())
  }

  fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
    self.changes.subscribe()
  }
}
