//! Jira issues assigned to the user.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use color_eyre::Result;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, warn};

use super::api_types::{parse_timestamp, ApiJiraIssue, ApiJiraSearchResponse};
use super::http::{credentials_accepted, get_json, join_url};
use super::{merge_parts, resolve_list, stored_token, stored_url, Credentials, Source};
use crate::classify::previous_workday;
use crate::config::JiraConfig;
use crate::items::{SourceKind, WorkItem};
use crate::settings::SettingsStore;

const SEARCH_FIELDS: &str = "summary,status,updated,assignee";
const MAX_RESULTS: u32 = 100;

/// Everything a fetch needs, resolved from settings and config.
struct JiraSettings {
  url: String,
  token: String,
  ongoing_statuses: Vec<String>,
  closed_statuses: Vec<String>,
}

pub struct JiraSource {
  http: Client,
  settings: Arc<dyn SettingsStore>,
  config: JiraConfig,
  /// Lower bound for closed issues; previous workday when unset
  since: Option<NaiveDate>,
}

impl JiraSource {
  pub fn new(http: Client, settings: Arc<dyn SettingsStore>, config: JiraConfig) -> Self {
    Self {
      http,
      settings,
      config,
      since: None,
    }
  }

  pub fn with_since(mut self, since: Option<NaiveDate>) -> Self {
    self.since = since;
    self
  }

  /// Statuses that put an item in the "ongoing" bucket.
  pub fn ongoing_statuses(&self) -> Result<Vec<String>> {
    resolve_list(
      self.settings.as_ref(),
      SourceKind::Jira,
      "ongoing_statuses",
      &self.config.ongoing_statuses,
    )
  }

  fn closed_statuses(&self) -> Result<Vec<String>> {
    resolve_list(
      self.settings.as_ref(),
      SourceKind::Jira,
      "closed_statuses",
      &self.config.closed_statuses,
    )
  }

  fn url(&self) -> Result<Option<String>> {
    stored_url(self.settings.as_ref(), SourceKind::Jira, self.config.url.as_deref())
  }

  fn resolve(&self) -> Result<Option<JiraSettings>> {
    let (Some(url), Some(token)) = (self.url()?, stored_token(self.settings.as_ref(), SourceKind::Jira)?)
    else {
      return Ok(None);
    };

    Ok(Some(JiraSettings {
      url,
      token,
      ongoing_statuses: self.ongoing_statuses()?,
      closed_statuses: self.closed_statuses()?,
    }))
  }

  /// `None` means the status list is empty and there is nothing to ask for.
  async fn search_if_any(
    &self,
    settings: &JiraSettings,
    part: &str,
    jql: Option<String>,
  ) -> Result<Vec<WorkItem>> {
    match jql {
      Some(jql) => self.search(settings, &jql).await,
      None => {
        debug!(part, "no jira statuses configured, skipping search");
        Ok(Vec::new())
      }
    }
  }

  async fn search(&self, settings: &JiraSettings, jql: &str) -> Result<Vec<WorkItem>> {
    debug!(jql, "searching jira");
    let request = self
      .http
      .get(join_url(&settings.url, "rest/api/2/search"))
      .bearer_auth(&settings.token)
      .query(&[
        ("jql", jql.to_string()),
        ("fields", SEARCH_FIELDS.to_string()),
        ("maxResults", MAX_RESULTS.to_string()),
      ]);

    let response: ApiJiraSearchResponse = get_json(request, "search Jira issues").await?;

    Ok(
      response
        .issues
        .into_iter()
        .filter_map(|issue| into_work_item(issue, &settings.url))
        .collect(),
    )
  }
}

#[async_trait]
impl Source for JiraSource {
  fn kind(&self) -> SourceKind {
    SourceKind::Jira
  }

  fn cache_scope(&self) -> Result<String> {
    Ok(format!(
      "{}|{}|{}|{}",
      self.url()?.unwrap_or_default(),
      self.ongoing_statuses()?.join(","),
      self.closed_statuses()?.join(","),
      self.since.map(|d| d.to_string()).unwrap_or_default(),
    ))
  }

  async fn is_connected(&self) -> Result<bool> {
    Ok(self.resolve()?.is_some())
  }

  async fn fetch_items(&self, now: DateTime<Local>) -> Result<Vec<WorkItem>> {
    let Some(settings) = self.resolve()? else {
      debug!("jira is not connected");
      return Ok(Vec::new());
    };

    let since = self
      .since
      .unwrap_or_else(|| previous_workday(&now).date_naive());

    let (ongoing, closed) = tokio::join!(
      self.search_if_any(&settings, "ongoing", ongoing_jql(&settings.ongoing_statuses)),
      self.search_if_any(&settings, "closed", closed_jql(&settings.closed_statuses, since)),
    );

    merge_parts(SourceKind::Jira, vec![("ongoing", ongoing), ("closed", closed)])
  }

  async fn validate_credentials(&self, credentials: &Credentials) -> Result<bool> {
    let Some(url) = credentials.url.clone().or(self.url()?) else {
      return Ok(false);
    };

    let request = self
      .http
      .get(join_url(&url, "rest/api/2/myself"))
      .bearer_auth(&credentials.token);
    credentials_accepted(request, "validate Jira credentials").await
  }
}

fn into_work_item(issue: ApiJiraIssue, base_url: &str) -> Option<WorkItem> {
  let fields = issue.fields;
  let Some(updated_at) = parse_timestamp(&fields.updated) else {
    warn!(key = %issue.key, updated = %fields.updated, "skipping issue with unreadable timestamp");
    return None;
  };

  let mut item = WorkItem::new(
    SourceKind::Jira,
    format!("{}: {}", issue.key, fields.summary),
    updated_at,
  )
  .with_url(join_url(base_url, &format!("browse/{}", issue.key)));
  item.status = fields.status.map(|s| s.name);
  item.avatar_url = fields
    .assignee
    .and_then(|mut a| a.avatar_urls.remove("48x48"));
  Some(item)
}

/// `status in ("A", "B")` with quotes escaped, `None` for no statuses.
fn status_clause(statuses: &[String]) -> Option<String> {
  if statuses.is_empty() {
    return None;
  }
  let quoted: Vec<String> = statuses
    .iter()
    .map(|s| format!("\"{}\"", s.replace('"', "\\\"")))
    .collect();
  Some(format!("status in ({})", quoted.join(", ")))
}

fn ongoing_jql(statuses: &[String]) -> Option<String> {
  let clause = status_clause(statuses)?;
  Some(format!(
    "assignee = currentUser() AND {} ORDER BY updated DESC",
    clause
  ))
}

fn closed_jql(statuses: &[String], since: NaiveDate) -> Option<String> {
  let clause = status_clause(statuses)?;
  Some(format!(
    "assignee = currentUser() AND {} AND updated >= \"{}\" ORDER BY updated DESC",
    clause,
    since.format("%Y-%m-%d")
  ))
}
