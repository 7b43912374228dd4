//! Date boundaries and bucketing of work items.
//!
//! Everything here is synchronous and deterministic: callers pass in `now`.
//! Two lower bounds exist and are not interchangeable:
//! - `previous_workday` drives staleness of individual items
//! - `yesterday_or_last_friday` opens the "yesterday" bucket

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

use crate::items::{GroupedWorkItems, SourceKind, WorkItem};

/// Status label the GitHub source gives merged pull requests.
pub const STATUS_MERGED: &str = "Merged";
/// Status label the GitHub source gives pull requests the user only commented on.
pub const STATUS_PARTICIPATED: &str = "Participated";

/// Midnight of `date` in `tz`.
///
/// Falls back to treating the date as UTC when midnight does not exist locally.
pub fn start_of_day<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Tz> {
  let naive = date.and_time(NaiveTime::MIN);
  tz.from_local_datetime(&naive)
    .earliest()
    .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

fn is_weekend(date: NaiveDate) -> bool {
  matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Nearest weekday strictly before `now`, at midnight.
pub fn previous_workday<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
  let mut day = now.date_naive() - Days::new(1);
  while is_weekend(day) {
    day = day - Days::new(1);
  }
  start_of_day(day, &now.timezone())
}

/// Midnight of last Friday on a Monday, of yesterday otherwise.
pub fn yesterday_or_last_friday<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
  let back = if now.weekday() == Weekday::Mon { 3 } else { 1 };
  start_of_day(now.date_naive() - Days::new(back), &now.timezone())
}

/// All the instants bucketing compares against, computed once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundaries {
  pub today_start: DateTime<Utc>,
  pub today_end: DateTime<Utc>,
  pub yesterday_or_last_friday: DateTime<Utc>,
  pub previous_workday: DateTime<Utc>,
}

impl Boundaries {
  pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
    let tz = now.timezone();
    let today = now.date_naive();
    Self {
      today_start: start_of_day(today, &tz).with_timezone(&Utc),
      today_end: start_of_day(today + Days::new(1), &tz).with_timezone(&Utc),
      yesterday_or_last_friday: yesterday_or_last_friday(now).with_timezone(&Utc),
      previous_workday: previous_workday(now).with_timezone(&Utc),
    }
  }

  fn in_yesterday_window(&self, at: DateTime<Utc>) -> bool {
    self.yesterday_or_last_friday <= at && at < self.today_start
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
  Ongoing,
  Yesterday,
  Stale,
}

/// Assigns items to buckets using the configured ongoing statuses.
#[derive(Debug, Clone)]
pub struct Classifier {
  ongoing_statuses: Vec<String>,
  bounds: Boundaries,
}

impl Classifier {
  pub fn new(ongoing_statuses: Vec<String>, bounds: Boundaries) -> Self {
    Self {
      ongoing_statuses,
      bounds,
    }
  }

  pub fn bounds(&self) -> &Boundaries {
    &self.bounds
  }

  fn is_ongoing_status(&self, item: &WorkItem) -> bool {
    self.ongoing_statuses.iter().any(|s| item.status_is(s))
  }

  /// Core bucket for an item, `None` when it belongs to no bucket.
  pub fn bucket(&self, item: &WorkItem) -> Option<Bucket> {
    let at = item.updated_at;

    if item.source == SourceKind::Confluence {
      return self
        .bounds
        .in_yesterday_window(at)
        .then_some(Bucket::Yesterday);
    }

    if self.is_ongoing_status(item) {
      Some(Bucket::Ongoing)
    } else if self.bounds.in_yesterday_window(at) {
      Some(Bucket::Yesterday)
    } else if at < self.bounds.yesterday_or_last_friday {
      Some(Bucket::Stale)
    } else {
      None
    }
  }

  /// Split items into buckets, keeping their relative order.
  pub fn group(&self, items: Vec<WorkItem>) -> GroupedWorkItems {
    group_by(items, |item| self.bucket(item))
  }

  /// Whether an item has gone untouched for too long.
  ///
  /// Only items still nominally in progress can be stale.
  pub fn is_stale(&self, item: &WorkItem) -> bool {
    let threshold = self.bounds.previous_workday;
    match item.source {
      SourceKind::Jira => self.is_ongoing_status(item) && item.updated_at < threshold,
      SourceKind::GitHub => !item.status_is(STATUS_MERGED) && item.updated_at < threshold,
      SourceKind::Calendar => item.start.unwrap_or(item.updated_at) < threshold,
      SourceKind::Confluence => false,
    }
  }

  /// The presentation refinement on top of the core grouping.
  pub fn display_rules(&self) -> DisplayRules<'_> {
    DisplayRules { classifier: self }
  }
}

/// Display-time bucketing.
///
/// Calendar entries are placed by their start/end instead of `updated_at`,
/// and participated pull requests never show up as stale. Everything else
/// falls through to [`Classifier::bucket`].
pub struct DisplayRules<'a> {
  classifier: &'a Classifier,
}

impl DisplayRules<'_> {
  pub fn bucket(&self, item: &WorkItem) -> Option<Bucket> {
    let bounds = self.classifier.bounds();

    if item.source == SourceKind::Calendar {
      let start = item.start.unwrap_or(item.updated_at);
      return if start >= bounds.today_start {
        Some(Bucket::Ongoing)
      } else if bounds.in_yesterday_window(start) {
        Some(Bucket::Yesterday)
      } else {
        None
      };
    }

    match self.classifier.bucket(item) {
      Some(Bucket::Stale) if item.status_is(STATUS_PARTICIPATED) => None,
      other => other,
    }
  }

  pub fn group(&self, items: Vec<WorkItem>) -> GroupedWorkItems {
    group_by(items, |item| self.bucket(item))
  }
}

fn group_by(items: Vec<WorkItem>, bucket: impl Fn(&WorkItem) -> Option<Bucket>) -> GroupedWorkItems {
  let mut grouped = GroupedWorkItems::default();
  for item in items {
    match bucket(&item) {
      Some(Bucket::Ongoing) => grouped.ongoing.push(item),
      Some(Bucket::Yesterday) => grouped.yesterday.push(item),
      Some(Bucket::Stale) => grouped.stale.push(item),
      None => {}
    }
  }
  grouped
}
