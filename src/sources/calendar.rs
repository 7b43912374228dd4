//! Calendar events from the previous workday through the end of today.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

use super::api_types::{ApiEvent, ApiEventList, ApiEventTime};
use super::http::{credentials_accepted, ensure_success, join_url};
use super::{resolve_list, Credentials, Source};
use crate::auth::TokenProvider;
use crate::classify::{start_of_day, Boundaries};
use crate::config::CalendarConfig;
use crate::items::{EventStatus, SourceKind, WorkItem};
use crate::settings::SettingsStore;

const UNTITLED: &str = "(No title)";

pub struct CalendarSource {
  http: Client,
  tokens: Arc<dyn TokenProvider>,
  settings: Arc<dyn SettingsStore>,
  config: CalendarConfig,
}

impl CalendarSource {
  pub fn new(
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    settings: Arc<dyn SettingsStore>,
    config: CalendarConfig,
  ) -> Self {
    Self {
      http,
      tokens,
      settings,
      config,
    }
  }

  fn exclude_keywords(&self) -> Result<Vec<String>> {
    resolve_list(
      self.settings.as_ref(),
      SourceKind::Calendar,
      "exclude_keywords",
      &self.config.exclude_keywords,
    )
  }

  fn calendar_url(&self) -> String {
    join_url(
      &self.config.api_url,
      &format!("calendars/{}", self.config.calendar_id),
    )
  }

  /// Events in `[time_min, time_max)`, or `None` when the token was rejected.
  async fn list_events(
    &self,
    token: &str,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
  ) -> Result<Option<ApiEventList>> {
    let response = self
      .http
      .get(join_url(&self.calendar_url(), "events"))
      .bearer_auth(token)
      .query(&[
        ("timeMin", time_min.to_rfc3339()),
        ("timeMax", time_max.to_rfc3339()),
        ("singleEvents", "true".to_string()),
        ("orderBy", "startTime".to_string()),
      ])
      .send()
      .await
      .map_err(|e| eyre!("Failed to list calendar events: {}", e))?;

    if response.status() == StatusCode::UNAUTHORIZED {
      return Ok(None);
    }

    let events = ensure_success(response, "list calendar events")
      .await?
      .json::<ApiEventList>()
      .await
      .map_err(|e| eyre!("Failed to parse calendar events: {}", e))?;
    Ok(Some(events))
  }
}

#[async_trait]
impl Source for CalendarSource {
  fn kind(&self) -> SourceKind {
    SourceKind::Calendar
  }

  fn cache_scope(&self) -> Result<String> {
    Ok(format!(
      "{}|{}|{}",
      self.config.api_url,
      self.config.calendar_id,
      self.exclude_keywords()?.join(","),
    ))
  }

  async fn is_connected(&self) -> Result<bool> {
    match self.tokens.auth_token().await {
      Ok(token) => Ok(token.is_some()),
      Err(e) => {
        debug!(error = %e, "calendar token unavailable");
        Ok(false)
      }
    }
  }

  async fn fetch_items(&self, now: DateTime<Local>) -> Result<Vec<WorkItem>> {
    let Some(token) = self.tokens.auth_token().await? else {
      debug!("calendar is not connected");
      return Ok(Vec::new());
    };

    let bounds = Boundaries::at(&now);
    let (time_min, time_max) = (bounds.previous_workday, bounds.today_end);

    let events = match self.list_events(&token, time_min, time_max).await? {
      Some(events) => events,
      None => {
        warn!("calendar token rejected, retrying once with a fresh token");
        self.tokens.invalidate(&token).await?;
        let token = self.tokens.auth_token().await?.ok_or_else(|| {
          eyre!("Failed to list calendar events: token rejected and no replacement available")
        })?;
        self
          .list_events(&token, time_min, time_max)
          .await?
          .ok_or_else(|| eyre!("Failed to list calendar events: token rejected after refresh"))?
      }
    };

    let keywords: Vec<String> = self
      .exclude_keywords()?
      .iter()
      .map(|k| k.to_lowercase())
      .collect();

    Ok(
      events
        .items
        .into_iter()
        .filter(|event| !event.declined_by_user())
        .filter(|event| !is_excluded(event, &keywords))
        .filter_map(into_work_item)
        .collect(),
    )
  }

  async fn validate_credentials(&self, credentials: &Credentials) -> Result<bool> {
    let request = self
      .http
      .get(self.calendar_url())
      .bearer_auth(&credentials.token);
    credentials_accepted(request, "validate calendar token").await
  }
}

fn is_excluded(event: &ApiEvent, keywords: &[String]) -> bool {
  let Some(title) = event.summary.as_deref() else {
    return false;
  };
  let title = title.to_lowercase();
  keywords
    .iter()
    .any(|k| !k.is_empty() && title.contains(k.as_str()))
}

/// Timed events keep their instant; all-day events start at local midnight.
fn event_time(time: &ApiEventTime) -> Option<DateTime<Utc>> {
  match (time.date_time, time.date) {
    (Some(at), _) => Some(at.with_timezone(&Utc)),
    (None, Some(date)) => Some(start_of_day(date, &Local).with_timezone(&Utc)),
    (None, None) => None,
  }
}

fn event_status(status: Option<&str>) -> Option<EventStatus> {
  match status? {
    "confirmed" => Some(EventStatus::Confirmed),
    "tentative" => Some(EventStatus::Tentative),
    "cancelled" => Some(EventStatus::Cancelled),
    _ => None,
  }
}

fn into_work_item(event: ApiEvent) -> Option<WorkItem> {
  let Some(start) = event.start.as_ref().and_then(event_time) else {
    warn!(summary = ?event.summary, "skipping event without a start time");
    return None;
  };

  let title = event.summary.clone().unwrap_or_else(|| UNTITLED.to_string());
  let mut item = WorkItem::new(SourceKind::Calendar, title, start);
  item.start = Some(start);
  item.end = event.end.as_ref().and_then(event_time);
  item.event_status = event_status(event.status.as_deref());
  Some(item)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::StoredTokenProvider;
  use crate::db::Database;
  use crate::settings::{list_key, token_key, Area, SettingsExt, SqliteSettings};
  use chrono::TimeZone;
  use mockito::{Matcher, Server};
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Hands out "old" until invalidated, then "new".
  #[derive(Default)]
  struct RotatingTokens {
    invalidations: AtomicUsize,
  }

  #[async_trait]
  impl TokenProvider for RotatingTokens {
    async fn auth_token(&self) -> Result<Option<String>> {
      Ok(Some(
        match self.invalidations.load(Ordering::SeqCst) {
          0 => "old",
          _ => "new",
        }
        .to_string(),
      ))
    }

    async fn invalidate(&self, _token: &str) -> Result<()> {
      self.invalidations.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  /// Hands out "tok" until invalidated, then nothing.
  #[derive(Default)]
  struct OneShotToken {
    invalidated: AtomicUsize,
  }

  #[async_trait]
  impl TokenProvider for OneShotToken {
    async fn auth_token(&self) -> Result<Option<String>> {
      Ok((self.invalidated.load(Ordering::SeqCst) == 0).then(|| "tok".to_string()))
    }

    async fn invalidate(&self, _token: &str) -> Result<()> {
      self.invalidated.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct NoToken;

  #[async_trait]
  impl TokenProvider for NoToken {
    async fn auth_token(&self) -> Result<Option<String>> {
      Ok(None)
    }

    async fn invalidate(&self, _token: &str) -> Result<()> {
      Ok(())
    }
  }

  fn now() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 1, 9, 10, 0, 0).unwrap()
  }

  fn settings() -> Arc<SqliteSettings> {
    Arc::new(SqliteSettings::new(Database::open_in_memory().unwrap()))
  }

  fn source(
    api_url: String,
    tokens: Arc<dyn TokenProvider>,
    settings: Arc<SqliteSettings>,
  ) -> CalendarSource {
    CalendarSource::new(
      crate::sources::http::build_client().unwrap(),
      tokens,
      settings,
      CalendarConfig {
        api_url,
        exclude_keywords: vec!["Lunch".to_string()],
        ..CalendarConfig::default()
      },
    )
  }

  fn events_body() -> String {
    serde_json::json!({
      "items": [
        {
          "summary": "Sprint planning",
          "status": "confirmed",
          "start": {"dateTime": "2024-01-09T09:00:00Z"},
          "end": {"dateTime": "2024-01-09T10:00:00Z"}
        },
        {
          "summary": "Team LUNCH",
          "status": "confirmed",
          "start": {"dateTime": "2024-01-09T12:00:00Z"},
          "end": {"dateTime": "2024-01-09T13:00:00Z"}
        },
        {
          "summary": "Architecture review",
          "status": "confirmed",
          "start": {"dateTime": "2024-01-08T14:00:00Z"},
          "attendees": [{"self": true, "responseStatus": "declined"}]
        },
        {
          "summary": "Offsite",
          "status": "tentative",
          "start": {"date": "2024-01-08"},
          "end": {"date": "2024-01-09"}
        }
      ]
    })
    .to_string()
  }

  #[tokio::test]
  async fn test_filters_declined_and_excluded_events() {
    let mut server = Server::new_async().await;
    let _events = server
      .mock("GET", "/calendars/primary/events")
      .match_query(Matcher::AllOf(vec![
        Matcher::UrlEncoded("singleEvents".into(), "true".into()),
        Matcher::UrlEncoded("orderBy".into(), "startTime".into()),
      ]))
      .with_status(200)
      .with_body(events_body())
      .create_async()
      .await;

    let source = source(server.url(), Arc::new(RotatingTokens::default()), settings());
    let items = source.fetch_items(now()).await.unwrap();

    let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, ["Sprint planning", "Offsite"]);

    let planning = &items[0];
    assert_eq!(planning.url, None);
    assert_eq!(planning.start, Some(Utc.with_ymd_and_hms(2024, 1, 9, 9, 0, 0).unwrap()));
    assert_eq!(planning.updated_at, planning.start.unwrap());
    assert_eq!(planning.event_status, Some(EventStatus::Confirmed));

    let offsite = &items[1];
    let local_midnight = Local.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
    assert_eq!(offsite.start, Some(local_midnight.with_timezone(&Utc)));
    assert_eq!(offsite.event_status, Some(EventStatus::Tentative));
  }

  #[tokio::test]
  async fn test_sync_keywords_replace_configured_ones() {
    let mut server = Server::new_async().await;
    let _events = server
      .mock("GET", "/calendars/primary/events")
      .match_query(Matcher::Any)
      .with_status(200)
      .with_body(events_body())
      .create_async()
      .await;

    let settings = settings();
    settings
      .set(
        Area::Sync,
        &list_key(SourceKind::Calendar, "exclude_keywords"),
        &vec!["planning"],
      )
      .unwrap();

    let items = source(server.url(), Arc::new(RotatingTokens::default()), settings)
      .fetch_items(now())
      .await
      .unwrap();
    let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, ["Team LUNCH", "Offsite"]);
  }

  #[tokio::test]
  async fn test_rejected_token_is_invalidated_and_retried_once() {
    let mut server = Server::new_async().await;
    let rejected = server
      .mock("GET", "/calendars/primary/events")
      .match_query(Matcher::Any)
      .match_header("authorization", "Bearer old")
      .with_status(401)
      .expect(1)
      .create_async()
      .await;
    let accepted = server
      .mock("GET", "/calendars/primary/events")
      .match_query(Matcher::Any)
      .match_header("authorization", "Bearer new")
      .with_status(200)
      .with_body(events_body())
      .expect(1)
      .create_async()
      .await;

    let tokens = Arc::new(RotatingTokens::default());
    let items = source(server.url(), tokens.clone(), settings())
      .fetch_items(now())
      .await
      .unwrap();

    rejected.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(tokens.invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(items.len(), 2);
  }

  #[tokio::test]
  async fn test_second_rejection_is_an_error() {
    let mut server = Server::new_async().await;
    let rejected = server
      .mock("GET", "/calendars/primary/events")
      .match_query(Matcher::Any)
      .with_status(401)
      .expect(2)
      .create_async()
      .await;

    let tokens = Arc::new(RotatingTokens::default());
    let result = source(server.url(), tokens.clone(), settings())
      .fetch_items(now())
      .await;

    rejected.assert_async().await;
    assert!(result.is_err());
    assert_eq!(tokens.invalidations.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_no_token_yields_nothing() {
    let source = source("http://127.0.0.1:9".to_string(), Arc::new(NoToken), settings());
    assert!(source.fetch_items(now()).await.unwrap().is_empty());
    assert!(!source.is_connected().await.unwrap());
  }

  #[tokio::test]
  async fn test_rejected_stored_token_is_kept_and_reported() {
    let mut server = Server::new_async().await;
    let rejected = server
      .mock("GET", "/calendars/primary/events")
      .match_query(Matcher::Any)
      .match_header("authorization", "Bearer tok")
      .with_status(401)
      .expect(2)
      .create_async()
      .await;

    let settings = settings();
    settings
      .set(Area::Local, &token_key(SourceKind::Calendar), &"tok")
      .unwrap();
    let tokens = Arc::new(StoredTokenProvider::new(settings.clone()));
    let result = source(server.url(), tokens, settings.clone())
      .fetch_items(now())
      .await;

    rejected.assert_async().await;
    assert!(result.is_err());
    let stored: Option<String> = settings
      .get(Area::Local, &token_key(SourceKind::Calendar))
      .unwrap();
    assert_eq!(stored.as_deref(), Some("tok"));
  }

  #[tokio::test]
  async fn test_rejection_without_replacement_is_an_error() {
    let mut server = Server::new_async().await;
    let rejected = server
      .mock("GET", "/calendars/primary/events")
      .match_query(Matcher::Any)
      .with_status(401)
      .expect(1)
      .create_async()
      .await;

    let result = source(server.url(), Arc::new(OneShotToken::default()), settings())
      .fetch_items(now())
      .await;

    rejected.assert_async().await;
    let err = result.unwrap_err().to_string();
    assert!(err.contains("no replacement"), "{}", err);
  }
}
