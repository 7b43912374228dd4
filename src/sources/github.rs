//! GitHub pull requests the user authored, merged, reviews or discussed.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use color_eyre::Result;
use futures::future::join_all;
use reqwest::{Client, RequestBuilder};
use std::sync::Arc;
use tracing::{debug, warn};

use super::api_types::{ApiGitHubComment, ApiGitHubIssue, ApiGitHubSearchResponse, ApiGitHubUser};
use super::http::{credentials_accepted, get_json, join_url};
use super::{merge_parts, resolve_list, stored_token, Credentials, Source};
use crate::classify::{previous_workday, STATUS_MERGED, STATUS_PARTICIPATED};
use crate::config::GitHubConfig;
use crate::items::{SourceKind, WorkItem};
use crate::settings::SettingsStore;

const STATUS_OPEN: &str = "Open";
const STATUS_DRAFT: &str = "Draft";
const STATUS_REQUESTED: &str = "Requested";
const PER_PAGE: &str = "50";

pub struct GitHubSource {
  http: Client,
  settings: Arc<dyn SettingsStore>,
  config: GitHubConfig,
}

/// The four searches, each tied to how its hits are labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Search {
  Open,
  Participated,
  Merged,
  Requested,
}

impl Search {
  fn name(self) -> &'static str {
    match self {
      Search::Open => "open",
      Search::Participated => "participated",
      Search::Merged => "merged",
      Search::Requested => "review requested",
    }
  }

  fn query(self, login: &str, since: NaiveDate, repo_filter: &str) -> String {
    let q = match self {
      Search::Open => format!("is:open is:pr author:{} archived:false", login),
      Search::Participated => format!(
        "is:pr commenter:{} -author:{} updated:>={}",
        login, login, since
      ),
      Search::Merged => format!("is:pr is:merged author:{} merged:>={}", login, since),
      Search::Requested => format!("is:open is:pr review-requested:{} archived:false", login),
    };
    format!("{}{}", q, repo_filter)
  }
}

impl GitHubSource {
  pub fn new(http: Client, settings: Arc<dyn SettingsStore>, config: GitHubConfig) -> Self {
    Self {
      http,
      settings,
      config,
    }
  }

  fn authed(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
    request
      .header("Authorization", format!("token {}", token))
      .header("Accept", "application/vnd.github+json")
  }

  /// Repositories to restrict searches to, `None` when unrestricted.
  ///
  /// An empty list leaves the searches unrestricted.
  fn repositories(&self) -> Result<Option<Vec<String>>> {
    if !self.config.filter_repositories {
      return Ok(None);
    }
    let repos = resolve_list(
      self.settings.as_ref(),
      SourceKind::GitHub,
      "repositories",
      &self.config.repositories,
    )?;
    if repos.is_empty() {
      warn!("repository filter is on but no repositories are listed, searching all of them");
      return Ok(None);
    }
    Ok(Some(repos))
  }

  async fn current_user(&self, token: &str) -> Result<ApiGitHubUser> {
    let request = self.authed(self.http.get(join_url(&self.config.api_url, "user")), token);
    get_json(request, "resolve GitHub user").await
  }

  async fn search(&self, token: &str, query: &str) -> Result<Vec<ApiGitHubIssue>> {
    debug!(query, "searching github");
    let request = self
      .authed(
        self.http.get(join_url(&self.config.api_url, "search/issues")),
        token,
      )
      .query(&[("q", query), ("per_page", PER_PAGE)]);

    let response: ApiGitHubSearchResponse = get_json(request, "search GitHub pull requests").await?;
    Ok(response.items)
  }

  async fn comments(&self, token: &str, url: String, since: DateTime<Utc>) -> Result<Vec<ApiGitHubComment>> {
    let request = self
      .authed(self.http.get(url), token)
      .query(&[("since", since.to_rfc3339()), ("per_page", "100".to_string())]);
    get_json(request, "list GitHub comments").await
  }

  /// Latest comment by `login` on the pull request since `since`.
  ///
  /// Looks at both conversation comments and review comments.
  async fn latest_comment(
    &self,
    token: &str,
    pr: &ApiGitHubIssue,
    login: &str,
    since: DateTime<Utc>,
  ) -> Result<Option<DateTime<Utc>>> {
    let repo = pr.repository_url.trim_end_matches('/');
    let (issue_comments, review_comments) = tokio::join!(
      self.comments(token, format!("{}/issues/{}/comments", repo, pr.number), since),
      self.comments(token, format!("{}/pulls/{}/comments", repo, pr.number), since),
    );

    Ok(
      issue_comments?
        .into_iter()
        .chain(review_comments?)
        .filter(|c| {
          c.user
            .as_ref()
            .is_some_and(|u| u.login.eq_ignore_ascii_case(login))
        })
        .map(|c| c.created_at)
        .filter(|at| *at >= since)
        .max(),
    )
  }

  /// Participated hits, dated by the user's own latest comment.
  async fn participated(
    &self,
    token: &str,
    login: &str,
    since: DateTime<Utc>,
    hits: Vec<ApiGitHubIssue>,
  ) -> Vec<WorkItem> {
    let latest = join_all(
      hits
        .iter()
        .map(|pr| self.latest_comment(token, pr, login, since)),
    )
    .await;

    hits
      .into_iter()
      .zip(latest)
      .filter_map(|(pr, latest)| match latest {
        Ok(Some(at)) => Some(into_work_item(pr, Search::Participated, Some(at))),
        Ok(None) => None,
        Err(e) => {
          warn!(pr = %pr.html_url, error = %e, "could not read comments, skipping");
          None
        }
      })
      .collect()
  }

  async fn run_search(
    &self,
    token: &str,
    login: &str,
    cutoff: DateTime<Local>,
    repo_filter: &str,
    search: Search,
  ) -> Result<Vec<WorkItem>> {
    let since = cutoff.with_timezone(&Utc);
    let query = search.query(login, cutoff.date_naive(), repo_filter);
    let hits = self.search(token, &query).await?;

    if search == Search::Participated {
      return Ok(self.participated(token, login, since, hits).await);
    }

    Ok(
      hits
        .into_iter()
        .map(|pr| into_work_item(pr, search, None))
        .collect(),
    )
  }
}

#[async_trait]
impl Source for GitHubSource {
  fn kind(&self) -> SourceKind {
    SourceKind::GitHub
  }

  fn cache_scope(&self) -> Result<String> {
    Ok(format!(
      "{}|{}",
      self.config.api_url,
      self.repositories()?.map(|r| r.join(",")).unwrap_or_default()
    ))
  }

  async fn is_connected(&self) -> Result<bool> {
    Ok(stored_token(self.settings.as_ref(), SourceKind::GitHub)?.is_some())
  }

  async fn fetch_items(&self, now: DateTime<Local>) -> Result<Vec<WorkItem>> {
    let Some(token) = stored_token(self.settings.as_ref(), SourceKind::GitHub)? else {
      debug!("github is not connected");
      return Ok(Vec::new());
    };

    let user = self.current_user(&token).await?;
    let login = user.login.as_str();
    let cutoff = previous_workday(&now);
    let repo_filter: String = self
      .repositories()?
      .unwrap_or_default()
      .iter()
      .map(|repo| format!(" repo:{}", repo))
      .collect();

    let (open, participated, merged, requested) = tokio::join!(
      self.run_search(&token, login, cutoff, &repo_filter, Search::Open),
      self.run_search(&token, login, cutoff, &repo_filter, Search::Participated),
      self.run_search(&token, login, cutoff, &repo_filter, Search::Merged),
      self.run_search(&token, login, cutoff, &repo_filter, Search::Requested),
    );

    merge_parts(
      SourceKind::GitHub,
      vec![
        (Search::Open.name(), open),
        (Search::Participated.name(), participated),
        (Search::Merged.name(), merged),
        (Search::Requested.name(), requested),
      ],
    )
  }

  async fn validate_credentials(&self, credentials: &Credentials) -> Result<bool> {
    let api_url = credentials.url.as_deref().unwrap_or(&self.config.api_url);
    let request = self.authed(self.http.get(join_url(api_url, "user")), &credentials.token);
    credentials_accepted(request, "validate GitHub token").await
  }
}

fn into_work_item(pr: ApiGitHubIssue, search: Search, commented_at: Option<DateTime<Utc>>) -> WorkItem {
  let (status, is_author) = match search {
    Search::Open if pr.draft => (STATUS_DRAFT, true),
    Search::Open => (STATUS_OPEN, true),
    Search::Merged => (STATUS_MERGED, true),
    Search::Requested => (STATUS_REQUESTED, false),
    Search::Participated => (STATUS_PARTICIPATED, false),
  };

  let updated_at = match search {
    Search::Merged => pr
      .pull_request
      .as_ref()
      .and_then(|p| p.merged_at)
      .unwrap_or(pr.updated_at),
    _ => commented_at.unwrap_or(pr.updated_at),
  };

  let mut item = WorkItem::new(SourceKind::GitHub, pr.title, updated_at)
    .with_url(pr.html_url)
    .with_status(status);
  item.is_draft = Some(pr.draft);
  item.is_author = Some(is_author);
  item.avatar_url = pr.user.and_then(|u| u.avatar_url);
  item
}
