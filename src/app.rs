use chrono::{DateTime, Duration, Local, NaiveDate};
use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::aggregator::{Aggregator, Refresh};
use crate::auth::{calendar_token_provider, TokenProvider};
use crate::cache::{CacheLayer, CacheStorage, NoopStorage, SqliteStorage};
use crate::classify::{Boundaries, Classifier};
use crate::config::Config;
use crate::db::Database;
use crate::items::{GroupedWorkItems, SourceKind, WorkItem};
use crate::report;
use crate::settings::{list_key, token_key, url_key, Area, SettingsExt, SettingsStore, SqliteSettings};
use crate::sources::http::build_client;
use crate::sources::{
  CalendarSource, ConfluenceSource, Credentials, GitHubSource, JiraSource, Source,
};
use crate::summary::{last_summary, store_summary, StreamEnd, SummaryClient};

/// Options for a report run
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
  pub refresh: bool,
  pub json: bool,
  pub since: Option<NaiveDate>,
  pub no_cache: bool,
}

/// Lists the sync area may override, per source
const BEHAVIORAL_LISTS: &[(SourceKind, &str)] = &[
  (SourceKind::Jira, "ongoing_statuses"),
  (SourceKind::Jira, "closed_statuses"),
  (SourceKind::GitHub, "repositories"),
  (SourceKind::Calendar, "exclude_keywords"),
];

/// Main application state
pub struct App {
  config: Config,
  db: Database,
  settings: Arc<SqliteSettings>,
  http: Client,
  calendar_tokens: Arc<dyn TokenProvider>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open()?;
    Self::with_database(config, db)
  }

  pub fn with_database(config: Config, db: Database) -> Result<Self> {
    let settings = Arc::new(SqliteSettings::new(db.clone()));
    let calendar_tokens = calendar_token_provider(&config, settings.clone());
    Ok(Self {
      config,
      db,
      settings,
      http: build_client()?,
      calendar_tokens,
    })
  }

  fn source(&self, kind: SourceKind, since: Option<NaiveDate>) -> Arc<dyn Source> {
    let settings: Arc<dyn SettingsStore> = self.settings.clone();
    match kind {
      SourceKind::Jira => Arc::new(self.jira().with_since(since)),
      SourceKind::GitHub => Arc::new(GitHubSource::new(
        self.http.clone(),
        settings,
        self.config.github.clone(),
      )),
      SourceKind::Calendar => Arc::new(CalendarSource::new(
        self.http.clone(),
        self.calendar_tokens.clone(),
        settings,
        self.config.calendar.clone(),
      )),
      SourceKind::Confluence => Arc::new(ConfluenceSource::new(
        self.http.clone(),
        settings,
        self.config.confluence.clone(),
        self.config.jira.clone(),
      )),
    }
  }

  fn jira(&self) -> JiraSource {
    JiraSource::new(
      self.http.clone(),
      self.settings.clone(),
      self.config.jira.clone(),
    )
  }

  /// Enabled sources in output order
  fn sources(&self, since: Option<NaiveDate>) -> Vec<Arc<dyn Source>> {
    SourceKind::ALL
      .into_iter()
      .filter(|kind| *kind != SourceKind::Confluence || self.config.confluence.enabled)
      .map(|kind| self.source(kind, since))
      .collect()
  }

  fn cache(&self) -> CacheLayer<SqliteStorage> {
    CacheLayer::new(SqliteStorage::new(self.db.clone()))
      .with_ttl(Duration::minutes(self.config.cache.ttl_minutes))
  }

  fn classifier(&self, now: DateTime<Local>) -> Result<Classifier> {
    Ok(Classifier::new(
      self.jira().ongoing_statuses()?,
      Boundaries::at(&now),
    ))
  }

  async fn collect_with<S: CacheStorage>(
    &self,
    cache: CacheLayer<S>,
    now: DateTime<Local>,
    options: &ReportOptions,
  ) -> Vec<WorkItem> {
    let refresh = if options.refresh {
      Refresh::Force
    } else {
      Refresh::Normal
    };
    let mut aggregator = Aggregator::new(self.sources(options.since), cache, self.settings.as_ref());
    aggregator.collect_work_items(now, refresh).await
  }

  async fn collect(&self, now: DateTime<Local>, options: &ReportOptions) -> Vec<WorkItem> {
    if options.no_cache || !self.config.cache.enabled {
      self
        .collect_with(CacheLayer::new(NoopStorage), now, options)
        .await
    } else {
      self.collect_with(self.cache(), now, options).await
    }
  }

  pub async fn report(&self, options: ReportOptions) -> Result<()> {
    let now = Local::now();
    let items = self.collect(now, &options).await;
    let classifier = self.classifier(now)?;
    let grouped = classifier.display_rules().group(items);
    info!(items = grouped.len(), "report ready");

    if options.json {
      let json = serde_json::to_string_pretty(&grouped)
        .map_err(|e| eyre!("Failed to serialize report: {}", e))?;
      println!("{}", json);
    } else {
      print!("{}", report::render_text(&grouped, |item| classifier.is_stale(item)));
    }
    Ok(())
  }

  pub async fn summary(&self, cached: bool, options: ReportOptions) -> Result<()> {
    if cached {
      return match last_summary(self.settings.as_ref())? {
        Some(stored) => {
          println!(
            "Generated {}\n\n{}",
            stored.generated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            stored.text
          );
          Ok(())
        }
        None => Err(eyre!("No summary has been generated yet")),
      };
    }

    let client = SummaryClient::from_config(self.http.clone(), &self.config.summary)?;
    let now = Local::now();
    let items = self.collect(now, &options).await;
    let grouped: GroupedWorkItems = self.classifier(now)?.group(items);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    let watcher = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        on_ctrl_c.cancel();
      }
    });

    let outcome = client
      .generate(&grouped, &cancel, |piece| {
        print!("{}", piece);
        let _ = std::io::stdout().flush();
      })
      .await;
    watcher.abort();
    println!();

    match &outcome.end {
      StreamEnd::Completed => {
        store_summary(self.settings.as_ref(), &outcome)?;
        Ok(())
      }
      StreamEnd::Cancelled => {
        eprintln!("Summary cancelled.");
        Ok(())
      }
      StreamEnd::Failed(reason) => Err(eyre!("Summary failed: {}", reason)),
    }
  }

  /// Drop cached items of `kind` under its current settings.
  fn purge_source(&self, kind: SourceKind) {
    let aggregator = Aggregator::new(self.sources(None), self.cache(), self.settings.as_ref());
    // Confluence falls back to the Jira credentials
    aggregator.purge(|source| {
      source == kind || (kind == SourceKind::Jira && source == SourceKind::Confluence)
    });
  }

  pub async fn connect(&self, kind: SourceKind, token: String, url: Option<String>) -> Result<()> {
    if kind == SourceKind::Calendar && self.config.calendar.token_command.is_some() {
      warn!("calendar.token_command is set, a stored token will be ignored");
    }

    if let Some(url) = &url {
      Url::parse(url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
    }

    let credentials = Credentials { token, url };
    let source = self.source(kind, None);
    if !source.validate_credentials(&credentials).await? {
      return Err(eyre!("{} rejected the credentials", kind));
    }

    self.settings.set(Area::Local, &token_key(kind), &credentials.token)?;
    if let Some(url) = &credentials.url {
      self.settings.set(Area::Local, &url_key(kind), url)?;
    }
    self.purge_source(kind);

    println!("Connected {}.", kind);
    Ok(())
  }

  pub async fn disconnect(&self, kind: SourceKind) -> Result<()> {
    self.purge_source(kind);
    self.settings.remove(Area::Local, &token_key(kind))?;
    self.settings.remove(Area::Local, &url_key(kind))?;
    println!("Disconnected {}.", kind);
    Ok(())
  }

  pub async fn status(&self) -> Result<()> {
    let aggregator = Aggregator::new(self.sources(None), CacheLayer::new(NoopStorage), self.settings.as_ref());
    let status = aggregator.connection_status().await;
    for (kind, connected) in status.iter() {
      let state = if connected { "connected" } else { "not connected" };
      println!("{:<12}{}", kind.name(), state);
    }
    if !self.config.confluence.enabled {
      println!("{:<12}disabled", SourceKind::Confluence.name());
    }
    Ok(())
  }

  pub fn purge(&self) -> Result<()> {
    let removed = SqliteStorage::new(self.db.clone()).clear()?;
    println!("Removed {} cached entries.", removed);
    Ok(())
  }

  fn check_list(kind: SourceKind, name: &str) -> Result<()> {
    if BEHAVIORAL_LISTS
      .iter()
      .any(|(source, list)| *source == kind && *list == name)
    {
      return Ok(());
    }
    let known: Vec<String> = BEHAVIORAL_LISTS
      .iter()
      .map(|(source, list)| format!("{} {}", source, list))
      .collect();
    Err(eyre!(
      "Unknown list {} {} (known: {})",
      kind,
      name,
      known.join(", ")
    ))
  }

  /// Override a configured list in the sync area.
  pub fn set_list(&self, kind: SourceKind, name: &str, values: Vec<String>) -> Result<()> {
    Self::check_list(kind, name)?;
    self.settings.set(Area::Sync, &list_key(kind, name), &values)?;
    self.purge_source(kind);
    Ok(())
  }

  /// Go back to the configured list.
  pub fn unset_list(&self, kind: SourceKind, name: &str) -> Result<()> {
    Self::check_list(kind, name)?;
    self.purge_source(kind);
    self.settings.remove(Area::Sync, &list_key(kind, name))?;
    Ok(())
  }
}
