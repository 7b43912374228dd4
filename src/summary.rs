//! Stand-up summary from a streaming chat-completion endpoint.
//!
//! The endpoint answers with server-sent events: `data: {...}` blocks
//! separated by a blank line, ending with `data: [DONE]`.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, SummaryConfig};
use crate::items::{GroupedWorkItems, WorkItem};
use crate::settings::{Area, SettingsExt, SettingsStore, LAST_REPORT_KEY};
use crate::sources::http::ensure_success;

const SYSTEM_PROMPT: &str = "You write short stand-up updates. \
Group the work into what was done, what is in progress and what is blocked or stale. \
Use plain sentences and keep ticket keys and pull request titles as given.";

/// How a stream finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
  Completed,
  /// Cancelled by the caller
  Cancelled,
  Failed(String),
}

/// Text received so far and how the stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutcome {
  pub text: String,
  pub end: StreamEnd,
}

/// A completed summary as kept in the settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSummary {
  pub text: String,
  pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  model: Option<&'a str>,
  stream: bool,
  messages: Vec<ChatMessage<'a>>,
}

/// One parsed server-sent event.
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
  Chunk(String),
  Done,
}

pub struct SummaryClient {
  http: Client,
  endpoint: String,
  model: Option<String>,
  token: Option<String>,
}

impl SummaryClient {
  pub fn new(http: Client, endpoint: String, model: Option<String>, token: Option<String>) -> Self {
    Self {
      http,
      endpoint,
      model,
      token,
    }
  }

  pub fn from_config(http: Client, config: &SummaryConfig) -> Result<Self> {
    let endpoint = config
      .endpoint
      .clone()
      .ok_or_else(|| eyre!("No summary endpoint configured (summary.endpoint)"))?;
    Ok(Self::new(http, endpoint, config.model.clone(), Config::summary_token()))
  }

  /// Stream a summary of `grouped`, calling `on_chunk` for every piece appended.
  ///
  /// Never fails: errors and cancellation end the stream and keep the text so far.
  pub async fn generate(
    &self,
    grouped: &GroupedWorkItems,
    cancel: &CancellationToken,
    mut on_chunk: impl FnMut(&str),
  ) -> SummaryOutcome {
    let prompt = build_prompt(grouped);
    let mut text = String::new();

    let end = tokio::select! {
      biased;
      _ = cancel.cancelled() => StreamEnd::Cancelled,
      result = self.stream_into(&prompt, cancel, &mut text, &mut on_chunk) => match result {
        Ok(end) => end,
        Err(e) => {
          warn!(error = %e, "summary stream failed");
          StreamEnd::Failed(e.to_string())
        }
      },
    };

    info!(chars = text.len(), ?end, "summary finished");
    SummaryOutcome { text, end }
  }

  async fn stream_into(
    &self,
    prompt: &str,
    cancel: &CancellationToken,
    text: &mut String,
    on_chunk: &mut impl FnMut(&str),
  ) -> Result<StreamEnd> {
    let body = ChatRequest {
      model: self.model.as_deref(),
      stream: true,
      messages: vec![
        ChatMessage {
          role: "system",
          content: SYSTEM_PROMPT,
        },
        ChatMessage {
          role: "user",
          content: prompt,
        },
      ],
    };

    let mut request = self.http.post(&self.endpoint).json(&body);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to request summary: {}", e))?;
    let response = ensure_success(response, "request summary").await?;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
      let chunk = chunk.map_err(|e| eyre!("Failed to read summary stream: {}", e))?;
      buffer.push_str(&String::from_utf8_lossy(&chunk).replace("\r\n", "\n"));

      for event in drain_events(&mut buffer) {
        if cancel.is_cancelled() {
          return Ok(StreamEnd::Cancelled);
        }
        match event {
          SseEvent::Done => return Ok(StreamEnd::Completed),
          SseEvent::Chunk(piece) => {
            text.push_str(&piece);
            on_chunk(&piece);
          }
        }
      }
    }

    // Some servers close without the sentinel
    if let Some(SseEvent::Chunk(piece)) = parse_event(&buffer) {
      text.push_str(&piece);
      on_chunk(&piece);
    }
    debug!("summary stream closed without [DONE]");
    Ok(StreamEnd::Completed)
  }
}

/// Remove every complete event from the front of `buffer`.
fn drain_events(buffer: &mut String) -> Vec<SseEvent> {
  let mut events = Vec::new();
  while let Some(end) = buffer.find("\n\n") {
    let raw: String = buffer.drain(..end + 2).collect();
    if let Some(event) = parse_event(&raw) {
      events.push(event);
    }
  }
  events
}

fn parse_event(raw: &str) -> Option<SseEvent> {
  let data: Vec<&str> = raw
    .lines()
    .filter_map(|line| line.strip_prefix("data:"))
    .map(str::trim_start)
    .collect();
  if data.is_empty() {
    return None;
  }

  let data = data.join("\n");
  if data.trim() == "[DONE]" {
    return Some(SseEvent::Done);
  }

  let value: Value = match serde_json::from_str(&data) {
    Ok(value) => value,
    Err(e) => {
      debug!(error = %e, "ignoring malformed summary event");
      return None;
    }
  };

  value
    .pointer("/choices/0/delta/content")
    .or_else(|| value.get("content"))
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .map(|s| SseEvent::Chunk(s.to_string()))
}

fn describe(item: &WorkItem) -> String {
  match &item.status {
    Some(status) => format!("- [{}] {} ({})", item.source, item.title, status),
    None => format!("- [{}] {}", item.source, item.title),
  }
}

/// User message listing every bucket.
pub fn build_prompt(grouped: &GroupedWorkItems) -> String {
  let mut prompt = String::from("Write my stand-up update from this activity.\n");
  for (heading, items) in [
    ("Ongoing", &grouped.ongoing),
    ("Yesterday", &grouped.yesterday),
    ("Stale", &grouped.stale),
  ] {
    prompt.push_str(&format!("\n{}:\n", heading));
    if items.is_empty() {
      prompt.push_str("- nothing\n");
    }
    for item in items {
      prompt.push_str(&describe(item));
      prompt.push('\n');
    }
  }
  prompt
}

/// Keep `outcome` as the last report if it completed.
pub fn store_summary(settings: &dyn SettingsStore, outcome: &SummaryOutcome) -> Result<bool> {
  if outcome.end != StreamEnd::Completed || outcome.text.trim().is_empty() {
    return Ok(false);
  }
  let stored = StoredSummary {
    text: outcome.text.clone(),
    generated_at: Utc::now(),
  };
  settings.set(Area::Local, LAST_REPORT_KEY, &stored)?;
  Ok(true)
}

pub fn last_summary(settings: &dyn SettingsStore) -> Result<Option<StoredSummary>> {
  settings.get(Area::Local, LAST_REPORT_KEY)
}
