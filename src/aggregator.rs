//! Runs every source through the cache and merges their items.

use chrono::{DateTime, Local};
use color_eyre::Result;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CacheSource, CacheStorage};
use crate::items::{ConnectionStatus, SourceKind, WorkItem};
use crate::settings::{source_for_key, SettingsChange, SettingsStore};
use crate::sources::{Source, SourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
  /// Serve fresh cache entries
  Normal,
  /// Purge every source's entry first
  Force,
}

pub struct Aggregator<S: CacheStorage> {
  /// In output order
  sources: Vec<Arc<dyn Source>>,
  cache: CacheLayer<S>,
  changes: broadcast::Receiver<SettingsChange>,
}

impl<S: CacheStorage> Aggregator<S> {
  pub fn new(sources: Vec<Arc<dyn Source>>, cache: CacheLayer<S>, settings: &dyn SettingsStore) -> Self {
    Self {
      sources,
      cache,
      changes: settings.subscribe(),
    }
  }

  fn key_for(source: &dyn Source) -> Result<SourceKey> {
    Ok(SourceKey {
      source: source.kind(),
      scope: source.cache_scope()?,
    })
  }

  /// Drop cached items of the sources `matches` selects.
  pub fn purge(&self, matches: impl Fn(SourceKind) -> bool) {
    let keys: Vec<SourceKey> = self
      .sources
      .iter()
      .filter(|s| matches(s.kind()))
      .filter_map(|s| match Self::key_for(s.as_ref()) {
        Ok(key) => Some(key),
        Err(e) => {
          warn!(source = %s.kind(), error = %e, "cannot compute cache key");
          None
        }
      })
      .collect();
    self.cache.purge(&keys);
  }

  /// Purge sources whose settings changed since the last collection.
  fn apply_settings_changes(&mut self) {
    let mut touched = BTreeSet::new();
    loop {
      match self.changes.try_recv() {
        Ok(change) => {
          debug!(area = ?change.area, key = %change.key, "setting changed");
          touched.extend(source_for_key(&change.key));
        }
        Err(TryRecvError::Lagged(missed)) => {
          warn!(missed, "missed settings changes, purging every source");
          touched.extend(SourceKind::ALL);
        }
        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
      }
    }

    // Confluence falls back to the Jira credentials
    if touched.contains(&SourceKind::Jira) {
      touched.insert(SourceKind::Confluence);
    }

    if !touched.is_empty() {
      debug!(?touched, "settings changed");
      self.purge(|kind| touched.contains(&kind));
    }
  }

  async fn collect_from(&self, source: &dyn Source, now: DateTime<Local>) -> Vec<WorkItem> {
    let kind = source.kind();
    let result = match Self::key_for(source) {
      Ok(key) => {
        self
          .cache
          .fetch_with_cache(&key, || source.fetch_items(now))
          .await
      }
      Err(e) => Err(e),
    };

    match result {
      Ok(fetched) => {
        debug!(
          source = %kind,
          count = fetched.data.len(),
          from_cache = fetched.source == CacheSource::Cache,
          cached_at = ?fetched.cached_at,
          "collected items"
        );
        fetched.data
      }
      Err(e) => {
        warn!(source = %kind, error = %e, "source failed, continuing without it");
        Vec::new()
      }
    }
  }

  /// Every source's items, concatenated in source order.
  ///
  /// A failing source contributes nothing and never fails the whole collection.
  pub async fn collect_work_items(&mut self, now: DateTime<Local>, refresh: Refresh) -> Vec<WorkItem> {
    self.apply_settings_changes();
    if refresh == Refresh::Force {
      info!("forcing refresh of all sources");
      self.purge(|_| true);
    }

    let collected = join_all(
      self
        .sources
        .iter()
        .map(|source| self.collect_from(source.as_ref(), now)),
    )
    .await;

    collected.into_iter().flatten().collect()
  }

  pub async fn connection_status(&self) -> ConnectionStatus {
    let checks = join_all(self.sources.iter().map(|source| async move {
      let connected = source.is_connected().await.unwrap_or_else(|e| {
        warn!(source = %source.kind(), error = %e, "connection check failed");
        false
      });
      (source.kind(), connected)
    }))
    .await;

    ConnectionStatus::from_pairs(checks)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::settings::{Area, SettingsExt, SqliteSettings};
  use crate::sources::Credentials;
  use async_trait::async_trait;
  use chrono::{TimeZone, Utc};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FakeSource {
    kind: SourceKind,
    titles: Option<Vec<&'static str>>,
    calls: AtomicUsize,
  }

  impl FakeSource {
    fn ok(kind: SourceKind, titles: Vec<&'static str>) -> Arc<Self> {
      Arc::new(Self {
        kind,
        titles: Some(titles),
        calls: AtomicUsize::new(0),
      })
    }

    fn failing(kind: SourceKind) -> Arc<Self> {
      Arc::new(Self {
        kind,
        titles: None,
        calls: AtomicUsize::new(0),
      })
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Source for FakeSource {
    fn kind(&self) -> SourceKind {
      self.kind
    }

    fn cache_scope(&self) -> Result<String> {
      Ok("fake".to_string())
    }

    async fn is_connected(&self) -> Result<bool> {
      match self.titles {
        Some(_) => Ok(true),
        None => Err(eyre!("no settings")),
      }
    }

    async fn fetch_items(&self, _now: DateTime<Local>) -> Result<Vec<WorkItem>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let titles = self.titles.as_ref().ok_or_else(|| eyre!("service unavailable"))?;
      Ok(
        titles
          .iter()
          .map(|t| WorkItem::new(self.kind, *t, Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()))
          .collect(),
      )
    }

    async fn validate_credentials(&self, _credentials: &Credentials) -> Result<bool> {
      Ok(true)
    }
  }

  fn now() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 1, 9, 10, 0, 0).unwrap()
  }

  fn aggregator(sources: &[Arc<FakeSource>], settings: &SqliteSettings) -> Aggregator<SqliteStorage> {
    let sources = sources
      .iter()
      .map(|s| s.clone() as Arc<dyn Source>)
      .collect();
    let cache = CacheLayer::new(SqliteStorage::new(Database::open_in_memory().unwrap()));
    Aggregator::new(sources, cache, settings)
  }

  fn titles(items: &[WorkItem]) -> Vec<&str> {
    items.iter().map(|i| i.title.as_str()).collect()
  }

  #[tokio::test]
  async fn test_failing_source_is_isolated() {
    let settings = SqliteSettings::new(Database::open_in_memory().unwrap());
    let mut aggregator = aggregator(
      &[
        FakeSource::ok(SourceKind::Jira, vec!["ABC-1", "ABC-2"]),
        FakeSource::failing(SourceKind::GitHub),
        FakeSource::ok(SourceKind::Calendar, vec!["Standup"]),
      ],
      &settings,
    );

    let items = aggregator.collect_work_items(now(), Refresh::Normal).await;
    assert_eq!(titles(&items), ["ABC-1", "ABC-2", "Standup"]);
  }

  #[tokio::test]
  async fn test_cached_items_are_reused_until_forced() {
    let settings = SqliteSettings::new(Database::open_in_memory().unwrap());
    let jira = FakeSource::ok(SourceKind::Jira, vec!["ABC-1"]);
    let mut aggregator = aggregator(&[jira.clone()], &settings);

    aggregator.collect_work_items(now(), Refresh::Normal).await;
    let items = aggregator.collect_work_items(now(), Refresh::Normal).await;
    assert_eq!(titles(&items), ["ABC-1"]);
    assert_eq!(jira.calls(), 1);

    aggregator.collect_work_items(now(), Refresh::Force).await;
    assert_eq!(jira.calls(), 2);
  }

  #[tokio::test]
  async fn test_failures_are_not_cached() {
    let settings = SqliteSettings::new(Database::open_in_memory().unwrap());
    let github = FakeSource::failing(SourceKind::GitHub);
    let mut aggregator = aggregator(&[github.clone()], &settings);

    aggregator.collect_work_items(now(), Refresh::Normal).await;
    aggregator.collect_work_items(now(), Refresh::Normal).await;
    assert_eq!(github.calls(), 2);
  }

  #[tokio::test]
  async fn test_settings_change_purges_that_source() {
    let settings = SqliteSettings::new(Database::open_in_memory().unwrap());
    let jira = FakeSource::ok(SourceKind::Jira, vec!["ABC-1"]);
    let github = FakeSource::ok(SourceKind::GitHub, vec!["PR"]);
    let mut aggregator = aggregator(&[jira.clone(), github.clone()], &settings);

    aggregator.collect_work_items(now(), Refresh::Normal).await;
    settings.set(Area::Local, "github.token", &"rotated").unwrap();
    aggregator.collect_work_items(now(), Refresh::Normal).await;

    assert_eq!(jira.calls(), 1);
    assert_eq!(github.calls(), 2);
  }

  #[tokio::test]
  async fn test_connection_status_treats_errors_as_disconnected() {
    let settings = SqliteSettings::new(Database::open_in_memory().unwrap());
    let aggregator = aggregator(
      &[
        FakeSource::ok(SourceKind::Jira, vec![]),
        FakeSource::failing(SourceKind::GitHub),
      ],
      &settings,
    );

    let status = aggregator.connection_status().await;
    assert!(status.is_connected(SourceKind::Jira));
    assert!(!status.is_connected(SourceKind::GitHub));
    assert!(!status.is_connected(SourceKind::Calendar));
  }
}
