//! Adapters that fetch activity from external systems and normalize it.
//!
//! Every source follows the same rules:
//! - Missing credentials are not an error; the source yields no items
//! - Transport and auth failures are returned to the caller
//! - Sub-queries fail independently; only all of them failing is an error

mod api_types;
pub mod calendar;
pub mod confluence;
pub mod github;
pub mod http;
pub mod jira;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::cache::CacheKey;
use crate::config::Config;
use crate::items::{SourceKind, WorkItem};
use crate::settings::{list_key, token_key, url_key, Area, SettingsExt, SettingsStore};

pub use calendar::CalendarSource;
pub use confluence::ConfluenceSource;
pub use github::GitHubSource;
pub use jira::JiraSource;

/// A token and, for self-hosted services, the base URL it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
  pub token: String,
  pub url: Option<String>,
}

#[async_trait]
pub trait Source: Send + Sync {
  fn kind(&self) -> SourceKind;

  /// Fingerprint of everything that shapes this source's results.
  fn cache_scope(&self) -> Result<String>;

  /// Whether credentials are available.
  async fn is_connected(&self) -> Result<bool>;

  /// Fetch and normalize the user's recent items.
  async fn fetch_items(&self, now: DateTime<Local>) -> Result<Vec<WorkItem>>;

  /// Check `credentials` against the service without storing them.
  async fn validate_credentials(&self, credentials: &Credentials) -> Result<bool>;
}

/// Cache key for one source's fetched items.
#[derive(Debug, Clone)]
pub struct SourceKey {
  pub source: SourceKind,
  pub scope: String,
}

impl CacheKey for SourceKey {
  fn cache_hash(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(format!("work_items:{}:{}", self.source, self.scope).as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    format!("{} work items", self.source)
  }
}

/// Stored token for `source`, then the STANDUP_<SOURCE>_TOKEN variable.
pub fn stored_token(settings: &dyn SettingsStore, source: SourceKind) -> Result<Option<String>> {
  let stored: Option<String> = settings.get(Area::Local, &token_key(source))?;
  Ok(stored.or_else(|| Config::env_token(source)))
}

/// Stored base URL for `source`, then the configured one.
pub fn stored_url(
  settings: &dyn SettingsStore,
  source: SourceKind,
  configured: Option<&str>,
) -> Result<Option<String>> {
  let stored: Option<String> = settings.get(Area::Local, &url_key(source))?;
  Ok(stored.or_else(|| configured.map(String::from)))
}

/// A behavioral list from the sync area, falling back to the config file.
pub fn resolve_list(
  settings: &dyn SettingsStore,
  source: SourceKind,
  name: &str,
  configured: &[String],
) -> Result<Vec<String>> {
  let stored: Option<Vec<String>> = settings.get(Area::Sync, &list_key(source, name))?;
  Ok(stored.unwrap_or_else(|| configured.to_vec()))
}

/// Concatenate sub-query results in order, skipping the ones that failed.
///
/// Fails only when every part failed, with the first part's error.
pub fn merge_parts(
  source: SourceKind,
  parts: Vec<(&'static str, Result<Vec<WorkItem>>)>,
) -> Result<Vec<WorkItem>> {
  let total = parts.len();
  let mut items = Vec::new();
  let mut first_error = None;
  let mut failed = 0;

  for (name, part) in parts {
    match part {
      Ok(mut found) => items.append(&mut found),
      Err(e) => {
        warn!(source = %source, query = name, error = %e, "query failed");
        failed += 1;
        first_error.get_or_insert(e);
      }
    }
  }

  match first_error {
    Some(e) if failed == total => Err(e),
    _ => Ok(items),
  }
}
