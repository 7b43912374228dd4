//! Plain-text rendering of grouped work items.

use chrono::{DateTime, Local, Utc};
use std::fmt::Write;

use crate::items::{EventStatus, GroupedWorkItems, SourceKind, WorkItem};

const MAX_TITLE: usize = 80;

/// Truncate to `max_len` characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

fn local_time(at: DateTime<Utc>) -> String {
  at.with_timezone(&Local).format("%a %H:%M").to_string()
}

fn event_label(item: &WorkItem) -> String {
  let start = item.start.unwrap_or(item.updated_at);
  let mut label = match item.end {
    Some(end) => format!(
      "{}-{}",
      local_time(start),
      end.with_timezone(&Local).format("%H:%M")
    ),
    None => local_time(start),
  };
  match item.event_status {
    Some(EventStatus::Tentative) => label.push_str(", tentative"),
    Some(EventStatus::Cancelled) => label.push_str(", cancelled"),
    _ => {}
  }
  label
}

/// One line for `item`, plus its link on the next line when it has one.
pub fn format_item(item: &WorkItem, stale: bool) -> String {
  let mut line = format!("  [{}] {}", item.source, truncate(&item.title, MAX_TITLE));

  let mut parts = Vec::new();
  match item.source {
    SourceKind::Calendar => parts.push(event_label(item)),
    _ => {
      let status = item.status.as_deref();
      if item.is_draft == Some(true) && !status.is_some_and(|s| s.eq_ignore_ascii_case("draft")) {
        parts.push("draft".to_string());
      }
      if let Some(status) = status {
        parts.push(status.to_string());
      }
    }
  }
  if stale {
    parts.push("stale".to_string());
  }
  if !parts.is_empty() {
    let _ = write!(line, " ({})", parts.join(", "));
  }

  if let Some(url) = &item.url {
    let _ = write!(line, "\n      {}", url);
  }
  line
}

/// Text report; `is_stale` marks items that have gone untouched too long.
pub fn render_text(grouped: &GroupedWorkItems, is_stale: impl Fn(&WorkItem) -> bool) -> String {
  if grouped.is_empty() {
    return "Nothing to report.\n".to_string();
  }

  let mut out = String::new();
  for (heading, items) in [
    ("Ongoing", &grouped.ongoing),
    ("Yesterday", &grouped.yesterday),
    ("Stale", &grouped.stale),
  ] {
    if items.is_empty() {
      continue;
    }
    if !out.is_empty() {
      out.push('\n');
    }
    let _ = writeln!(out, "{} ({})", heading, items.len());
    for item in items {
      out.push_str(&format_item(item, is_stale(item)));
      out.push('\n');
    }
  }
  out
}
