//! Confluence pages and blog posts the user edited recently.
//!
//! Shares the Jira base URL and token unless Confluence has its own.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use color_eyre::Result;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, warn};

use super::api_types::{ApiContent, ApiContentSearchResponse};
use super::http::{credentials_accepted, get_json, join_url};
use super::{stored_token, stored_url, Credentials, Source};
use crate::classify::yesterday_or_last_friday;
use crate::config::{ConfluenceConfig, JiraConfig};
use crate::items::{SourceKind, WorkItem};
use crate::settings::SettingsStore;

pub const STATUS_UPDATED: &str = "Updated";
const PAGE_LIMIT: u32 = 50;

pub struct ConfluenceSource {
  http: Client,
  settings: Arc<dyn SettingsStore>,
  config: ConfluenceConfig,
  jira: JiraConfig,
}

impl ConfluenceSource {
  pub fn new(
    http: Client,
    settings: Arc<dyn SettingsStore>,
    config: ConfluenceConfig,
    jira: JiraConfig,
  ) -> Self {
    Self {
      http,
      settings,
      config,
      jira,
    }
  }

  pub fn enabled(&self) -> bool {
    self.config.enabled
  }

  fn url(&self) -> Result<Option<String>> {
    let settings = self.settings.as_ref();
    if let Some(url) = stored_url(settings, SourceKind::Confluence, self.config.url.as_deref())? {
      return Ok(Some(url));
    }
    stored_url(settings, SourceKind::Jira, self.jira.url.as_deref())
  }

  fn token(&self) -> Result<Option<String>> {
    let settings = self.settings.as_ref();
    match stored_token(settings, SourceKind::Confluence)? {
      Some(token) => Ok(Some(token)),
      None => stored_token(settings, SourceKind::Jira),
    }
  }

  fn credentials(&self) -> Result<Option<(String, String)>> {
    match (self.url()?, self.token()?) {
      (Some(url), Some(token)) => Ok(Some((url, token))),
      _ => Ok(None),
    }
  }
}

#[async_trait]
impl Source for ConfluenceSource {
  fn kind(&self) -> SourceKind {
    SourceKind::Confluence
  }

  fn cache_scope(&self) -> Result<String> {
    Ok(self.url()?.unwrap_or_default())
  }

  async fn is_connected(&self) -> Result<bool> {
    Ok(self.enabled() && self.credentials()?.is_some())
  }

  async fn fetch_items(&self, now: DateTime<Local>) -> Result<Vec<WorkItem>> {
    if !self.enabled() {
      return Ok(Vec::new());
    }
    let Some((url, token)) = self.credentials()? else {
      debug!("confluence is not connected");
      return Ok(Vec::new());
    };

    let since = yesterday_or_last_friday(&now).with_timezone(&Utc).date_naive();
    let cql = contributions_cql(since);
    debug!(cql, "searching confluence");

    let request = self
      .http
      .get(join_url(&url, "rest/api/content/search"))
      .bearer_auth(&token)
      .query(&[
        ("cql", cql),
        ("limit", PAGE_LIMIT.to_string()),
        ("expand", "history.lastUpdated,version".to_string()),
      ]);
    let response: ApiContentSearchResponse = get_json(request, "search Confluence content").await?;

    let base = response.links.base.unwrap_or(url);
    Ok(
      response
        .results
        .into_iter()
        .filter_map(|content| into_work_item(content, &base))
        .collect(),
    )
  }

  async fn validate_credentials(&self, credentials: &Credentials) -> Result<bool> {
    let Some(url) = credentials.url.clone().or(self.url()?) else {
      return Ok(false);
    };

    let request = self
      .http
      .get(join_url(&url, "rest/api/user/current"))
      .bearer_auth(&credentials.token);
    credentials_accepted(request, "validate Confluence credentials").await
  }
}

fn contributions_cql(since: NaiveDate) -> String {
  format!(
    "contributor = currentUser() AND lastmodified >= \"{}\" AND type in (page, blogpost) ORDER BY lastmodified DESC",
    since.format("%Y-%m-%d")
  )
}

fn into_work_item(content: ApiContent, base: &str) -> Option<WorkItem> {
  let Some(updated_at) = content.last_modified() else {
    warn!(title = %content.title, "skipping content without a modification time");
    return None;
  };

  let mut item = WorkItem::new(SourceKind::Confluence, content.title, updated_at)
    .with_status(STATUS_UPDATED);
  item.url = content.links.webui.map(|path| join_url(base, &path));
  Some(item)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::settings::{token_key, url_key, Area, SettingsExt, SqliteSettings};
  use chrono::TimeZone;
  use mockito::{Matcher, Server};

  fn source(enabled: bool, jira_url: Option<String>, jira_token: Option<&str>) -> ConfluenceSource {
    let settings = SqliteSettings::new(Database::open_in_memory().unwrap());
    if let Some(token) = jira_token {
      settings.set(Area::Local, &token_key(SourceKind::Jira), &token).unwrap();
    }
    ConfluenceSource::new(
      crate::sources::http::build_client().unwrap(),
      Arc::new(settings),
      ConfluenceConfig { enabled, url: None },
      JiraConfig {
        url: jira_url,
        ..JiraConfig::default()
      },
    )
  }

  #[test]
  fn test_cql_uses_date_only() {
    let cql = contributions_cql(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
    assert!(cql.starts_with("contributor = currentUser() AND lastmodified >= \"2024-01-05\""));
    assert!(cql.contains("type in (page, blogpost)"));
  }

  #[tokio::test]
  async fn test_disabled_source_fetches_nothing() {
    let source = source(false, Some("http://127.0.0.1:9".to_string()), Some("tok"));
    assert!(!source.is_connected().await.unwrap());
    let now = Local.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap();
    assert!(source.fetch_items(now).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_fetch_uses_jira_credentials() {
    let mut server = Server::new_async().await;
    let search = server
      .mock("GET", "/rest/api/content/search")
      .match_header("authorization", "Bearer tok")
      .match_query(Matcher::Regex("contributor".into()))
      .with_status(200)
      .with_body(
        serde_json::json!({
          "results": [
            {
              "title": "Release checklist",
              "history": {"lastUpdated": {"when": "2024-01-05T16:00:00.000Z"}},
              "_links": {"webui": "/spaces/ENG/pages/42"}
            },
            {"title": "No timestamp", "_links": {}}
          ],
          "_links": {"base": "https://wiki.test/wiki"}
        })
        .to_string(),
      )
      .create_async()
      .await;

    let source = source(true, Some(server.url()), Some("tok"));
    let now = Local.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap();
    let items = source.fetch_items(now).await.unwrap();

    search.assert_async().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Release checklist");
    assert_eq!(items[0].status.as_deref(), Some(STATUS_UPDATED));
    assert_eq!(items[0].url.as_deref(), Some("https://wiki.test/wiki/spaces/ENG/pages/42"));
    assert_eq!(
      items[0].updated_at,
      Utc.with_ymd_and_hms(2024, 1, 5, 16, 0, 0).unwrap()
    );
  }

  #[tokio::test]
  async fn test_own_url_takes_precedence() {
    let settings = SqliteSettings::new(Database::open_in_memory().unwrap());
    settings
      .set(Area::Local, &url_key(SourceKind::Confluence), &"https://wiki.test")
      .unwrap();
    let source = ConfluenceSource::new(
      crate::sources::http::build_client().unwrap(),
      Arc::new(settings),
      ConfluenceConfig::default(),
      JiraConfig {
        url: Some("https://jira.test".to_string()),
        ..JiraConfig::default()
      },
    );
    assert_eq!(source.url().unwrap().as_deref(), Some("https://wiki.test"));
  }
}
