//! Serde-deserializable types matching the external API responses.
//!
//! These types are separate from `WorkItem` so deserialization can follow each
//! service's shape while the rest of the program sees one model.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Parse the timestamp formats the services use.
///
/// Jira sends `2024-01-08T10:15:30.000+0000`, which is not RFC 3339.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(value)
    .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Jira
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiJiraStatus {
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiJiraUser {
  #[serde(rename = "avatarUrls", default)]
  pub avatar_urls: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiJiraFields {
  #[serde(default)]
  pub summary: String,
  pub status: Option<ApiJiraStatus>,
  pub assignee: Option<ApiJiraUser>,
  #[serde(default)]
  pub updated: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiJiraIssue {
  pub key: String,
  #[serde(default)]
  pub fields: ApiJiraFields,
}

#[derive(Debug, Deserialize)]
pub struct ApiJiraSearchResponse {
  #[serde(default)]
  pub issues: Vec<ApiJiraIssue>,
}

// ============================================================================
// GitHub
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiGitHubUser {
  pub login: String,
  pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPullRequestRef {
  pub merged_at: Option<DateTime<Utc>>,
}

/// A search hit from `/search/issues`; pull requests carry `pull_request`.
#[derive(Debug, Deserialize)]
pub struct ApiGitHubIssue {
  pub number: u64,
  pub title: String,
  pub html_url: String,
  /// API URL of the repository, e.g. https://api.github.com/repos/owner/name
  pub repository_url: String,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub draft: bool,
  pub user: Option<ApiGitHubUser>,
  pub pull_request: Option<ApiPullRequestRef>,
}

#[derive(Debug, Deserialize)]
pub struct ApiGitHubSearchResponse {
  #[serde(default)]
  pub items: Vec<ApiGitHubIssue>,
}

/// Issue comment or review comment; both share these fields.
#[derive(Debug, Deserialize)]
pub struct ApiGitHubComment {
  pub user: Option<ApiGitHubUser>,
  pub created_at: DateTime<Utc>,
}

// ============================================================================
// Google Calendar
// ============================================================================

/// Either a timed (`dateTime`) or an all-day (`date`) boundary.
#[derive(Debug, Deserialize)]
pub struct ApiEventTime {
  #[serde(rename = "dateTime")]
  pub date_time: Option<DateTime<FixedOffset>>,
  pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAttendee {
  #[serde(rename = "self", default)]
  pub is_self: bool,
  #[serde(rename = "responseStatus")]
  pub response_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiEvent {
  pub summary: Option<String>,
  pub status: Option<String>,
  pub start: Option<ApiEventTime>,
  pub end: Option<ApiEventTime>,
  #[serde(default)]
  pub attendees: Vec<ApiAttendee>,
}

impl ApiEvent {
  pub fn declined_by_user(&self) -> bool {
    self
      .attendees
      .iter()
      .any(|a| a.is_self && a.response_status.as_deref() == Some("declined"))
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiEventList {
  #[serde(default)]
  pub items: Vec<ApiEvent>,
}

// ============================================================================
// Confluence
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiContentVersion {
  pub when: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiContentHistory {
  #[serde(rename = "lastUpdated")]
  pub last_updated: Option<ApiContentVersion>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiLinks {
  pub webui: Option<String>,
  pub base: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiContent {
  pub title: String,
  pub version: Option<ApiContentVersion>,
  pub history: Option<ApiContentHistory>,
  #[serde(rename = "_links", default)]
  pub links: ApiLinks,
}

impl ApiContent {
  /// Last modification, preferring the history record.
  pub fn last_modified(&self) -> Option<DateTime<Utc>> {
    self
      .history
      .as_ref()
      .and_then(|h| h.last_updated.as_ref())
      .or(self.version.as_ref())
      .and_then(|v| parse_timestamp(&v.when))
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiContentSearchResponse {
  #[serde(default)]
  pub results: Vec<ApiContent>,
  #[serde(rename = "_links", default)]
  pub links: ApiLinks,
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_parse_jira_timestamp() {
    let parsed = parse_timestamp("2024-01-08T10:15:30.000+0200").unwrap();
    assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 8, 8, 15, 30).unwrap());
  }

  #[test]
  fn test_parse_rfc3339_timestamp() {
    let parsed = parse_timestamp("2024-01-08T10:15:30.000Z").unwrap();
    assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 8, 10, 15, 30).unwrap());
    assert!(parse_timestamp("yesterday").is_none());
  }

  #[test]
  fn test_declined_only_counts_for_self() {
    let event: ApiEvent = serde_json::from_value(serde_json::json!({
      "summary": "Sync",
      "attendees": [
        {"email": "a@x.test", "responseStatus": "declined"},
        {"email": "me@x.test", "self": true, "responseStatus": "accepted"}
      ]
    }))
    .unwrap();
    assert!(!event.declined_by_user());
  }

  #[test]
  fn test_content_falls_back_to_version() {
    let content: ApiContent = serde_json::from_value(serde_json::json!({
      "title": "Runbook",
      "version": {"when": "2024-01-05T09:00:00.000Z"},
      "_links": {"webui": "/spaces/OPS/pages/1"}
    }))
    .unwrap();
    assert_eq!(
      content.last_modified(),
      Some(Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap())
    );
  }
}
