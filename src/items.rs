//! The normalized work item shared by every source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which external system an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  /// Issue tracker
  Jira,
  /// Pull-request host
  GitHub,
  Calendar,
  /// Wiki
  Confluence,
}

impl SourceKind {
  pub const ALL: [SourceKind; 4] = [
    SourceKind::Jira,
    SourceKind::GitHub,
    SourceKind::Calendar,
    SourceKind::Confluence,
  ];

  pub fn name(self) -> &'static str {
    match self {
      SourceKind::Jira => "jira",
      SourceKind::GitHub => "github",
      SourceKind::Calendar => "calendar",
      SourceKind::Confluence => "confluence",
    }
  }
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Attendance state of a calendar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
  Confirmed,
  Tentative,
  Cancelled,
}

/// One unit of user activity from any source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
  pub source: SourceKind,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  /// Calendar items carry their start time here
  pub updated_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_draft: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_author: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub event_status: Option<EventStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
}

impl WorkItem {
  /// A bare item with only the required fields set.
  pub fn new(source: SourceKind, title: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
    Self {
      source,
      title: title.into(),
      url: None,
      updated_at,
      status: None,
      is_draft: None,
      is_author: None,
      start: None,
      end: None,
      event_status: None,
      avatar_url: None,
    }
  }

  pub fn with_status(mut self, status: impl Into<String>) -> Self {
    self.status = Some(status.into());
    self
  }

  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.url = Some(url.into());
    self
  }

  pub fn status_is(&self, status: &str) -> bool {
    self
      .status
      .as_deref()
      .is_some_and(|s| s.eq_ignore_ascii_case(status))
  }
}

/// Items split into the three mutually exclusive buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupedWorkItems {
  pub ongoing: Vec<WorkItem>,
  pub yesterday: Vec<WorkItem>,
  pub stale: Vec<WorkItem>,
}

impl GroupedWorkItems {
  pub fn is_empty(&self) -> bool {
    self.ongoing.is_empty() && self.yesterday.is_empty() && self.stale.is_empty()
  }

  pub fn len(&self) -> usize {
    self.ongoing.len() + self.yesterday.len() + self.stale.len()
  }
}

/// Per-request view of which sources have credentials.
///
/// Built fresh on every call and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus(BTreeMap<SourceKind, bool>);

impl ConnectionStatus {
  pub fn from_pairs(pairs: impl IntoIterator<Item = (SourceKind, bool)>) -> Self {
    Self(pairs.into_iter().collect())
  }

  pub fn is_connected(&self, source: SourceKind) -> bool {
    self.0.get(&source).copied().unwrap_or(false)
  }

  pub fn iter(&self) -> impl Iterator<Item = (SourceKind, bool)> + '_ {
    self.0.iter().map(|(k, v)| (*k, *v))
  }
}
