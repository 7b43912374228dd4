use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::items::SourceKind;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub jira: JiraConfig,
  pub github: GitHubConfig,
  pub calendar: CalendarConfig,
  pub confluence: ConfluenceConfig,
  pub summary: SummaryConfig,
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
  /// Base URL, e.g. https://example.atlassian.net
  pub url: Option<String>,
  /// Statuses that count as work in progress
  pub ongoing_statuses: Vec<String>,
  /// Statuses that count as finished
  pub closed_statuses: Vec<String>,
}

impl Default for JiraConfig {
  fn default() -> Self {
    Self {
      url: None,
      ongoing_statuses: strings(&["In Review", "In Development"]),
      closed_statuses: strings(&["Done", "Closed", "Resolved"]),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
  pub api_url: String,
  /// Only search these `owner/name` repositories when `filter_repositories` is set.
  /// An empty list searches every repository.
  pub repositories: Vec<String>,
  pub filter_repositories: bool,
}

impl Default for GitHubConfig {
  fn default() -> Self {
    Self {
      api_url: "https://api.github.com".to_string(),
      repositories: Vec::new(),
      filter_repositories: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
  pub api_url: String,
  pub calendar_id: String,
  /// Events whose title contains any of these (case-insensitive) are skipped
  pub exclude_keywords: Vec<String>,
  /// Command printing an OAuth access token, e.g. `[gcloud, auth, print-access-token]`
  pub token_command: Option<Vec<String>>,
}

impl Default for CalendarConfig {
  fn default() -> Self {
    Self {
      api_url: "https://www.googleapis.com/calendar/v3".to_string(),
      calendar_id: "primary".to_string(),
      exclude_keywords: Vec::new(),
      token_command: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
  pub enabled: bool,
  /// Defaults to the Jira URL
  pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
  /// Streaming chat-completion endpoint
  pub endpoint: Option<String>,
  pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  pub ttl_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_minutes: 5,
    }
  }
}

fn strings(values: &[&str]) -> Vec<String> {
  values.iter().map(|s| s.to_string()).collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./standup.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/standup/config.yaml
  ///
  /// Without any file every source runs on defaults and stored credentials.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("standup.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("standup").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Get a source's API token from the environment.
  ///
  /// Checks STANDUP_<SOURCE>_TOKEN, e.g. STANDUP_JIRA_TOKEN.
  pub fn env_token(source: SourceKind) -> Option<String> {
    Self::env_var(&format!("STANDUP_{}_TOKEN", source.name().to_uppercase()))
  }

  /// Get the summary endpoint token from STANDUP_SUMMARY_TOKEN.
  pub fn summary_token() -> Option<String> {
    Self::env_var("STANDUP_SUMMARY_TOKEN")
  }

  fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.jira.ongoing_statuses, ["In Review", "In Development"]);
    assert_eq!(config.jira.closed_statuses, ["Done", "Closed", "Resolved"]);
    assert_eq!(config.calendar.calendar_id, "primary");
    assert!(config.cache.enabled);
    assert!(!config.confluence.enabled);
  }

  #[test]
  fn test_partial_sections_keep_other_defaults() {
    let config = Config::parse(
      r#"
jira:
  url: https://example.atlassian.net
  ongoing_statuses: [In Progress]
calendar:
  exclude_keywords: [Lunch]
  token_command: [gcloud, auth, print-access-token]
confluence:
  enabled: true
"#,
    )
    .unwrap();

    assert_eq!(config.jira.url.as_deref(), Some("https://example.atlassian.net"));
    assert_eq!(config.jira.ongoing_statuses, ["In Progress"]);
    assert_eq!(config.jira.closed_statuses.len(), 3);
    assert_eq!(config.calendar.exclude_keywords, ["Lunch"]);
    assert_eq!(config.calendar.api_url, "https://www.googleapis.com/calendar/v3");
    assert_eq!(config.calendar.token_command.as_ref().map(Vec::len), Some(3));
    assert!(config.confluence.enabled);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
