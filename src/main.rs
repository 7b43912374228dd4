mod aggregator;
mod app;
mod auth;
mod cache;
mod classify;
mod config;
mod db;
mod items;
mod report;
mod settings;
mod sources;
mod summary;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::app::{App, ReportOptions};
use crate::items::SourceKind;

#[derive(Parser, Debug)]
#[command(name = "standup")]
#[command(about = "A stand-up report from your Jira, GitHub, calendar and Confluence activity")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./standup.yaml, then $XDG_CONFIG_HOME/standup/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct FetchArgs {
  /// Ignore cached items and fetch everything again
  #[arg(short, long)]
  refresh: bool,

  /// Neither read nor write the cache
  #[arg(long)]
  no_cache: bool,

  /// Earliest update date for closed Jira issues (YYYY-MM-DD)
  #[arg(long)]
  since: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show grouped work items (the default)
  Report {
    #[command(flatten)]
    fetch: FetchArgs,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
  },
  /// Stream an AI summary of the report; Ctrl-C stops it
  Summary {
    #[command(flatten)]
    fetch: FetchArgs,

    /// Show the last completed summary without generating a new one
    #[arg(long)]
    cached: bool,
  },
  /// Validate and store credentials for a source
  Connect {
    source: SourceArg,

    #[arg(long)]
    token: String,

    /// Base URL for self-hosted services
    #[arg(long)]
    url: Option<String>,
  },
  /// Forget stored credentials for a source
  Disconnect { source: SourceArg },
  /// Show which sources are connected
  Status,
  /// Remove every cached item
  Purge,
  /// Override configured lists, shared across machines
  #[command(subcommand)]
  Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
  /// Replace a list, e.g. `config set calendar exclude_keywords Lunch Focus`
  Set {
    source: SourceArg,
    list: String,
    values: Vec<String>,
  },
  /// Go back to the list from the config file
  Unset { source: SourceArg, list: String },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SourceArg {
  Jira,
  Github,
  Calendar,
  Confluence,
}

impl From<SourceArg> for SourceKind {
  fn from(arg: SourceArg) -> Self {
    match arg {
      SourceArg::Jira => SourceKind::Jira,
      SourceArg::Github => SourceKind::GitHub,
      SourceArg::Calendar => SourceKind::Calendar,
      SourceArg::Confluence => SourceKind::Confluence,
    }
  }
}

impl FetchArgs {
  fn options(self, json: bool) -> ReportOptions {
    ReportOptions {
      refresh: self.refresh,
      json,
      since: self.since,
      no_cache: self.no_cache,
    }
  }
}

/// Log to <data_dir>/standup/standup.log so stdout stays clean for output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = db::data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let file_appender = tracing_appender::rolling::never(&log_dir, "standup.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_env("STANDUP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_writer(non_blocking)
    .with_env_filter(filter)
    .with_ansi(false)
    .with_target(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Flushes buffered log lines on drop
  let _guard = init_logging()?;

  let config = config::Config::load(args.config.as_deref())?;
  let app = App::new(config)?;

  match args.command.unwrap_or(Command::Report {
    fetch: FetchArgs::default(),
    json: false,
  }) {
    Command::Report { fetch, json } => app.report(fetch.options(json)).await,
    Command::Summary { fetch, cached } => app.summary(cached, fetch.options(false)).await,
    Command::Connect { source, token, url } => app.connect(source.into(), token, url).await,
    Command::Disconnect { source } => app.disconnect(source.into()).await,
    Command::Status => app.status().await,
    Command::Purge => app.purge(),
    Command::Config(ConfigCommand::Set {
      source,
      list,
      values,
    }) => app.set_list(source.into(), &list, values),
    Command::Config(ConfigCommand::Unset { source, list }) => app.unset_list(source.into(), &list),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_args_parse() {
    let args = Args::try_parse_from(["standup", "report", "--refresh", "--since", "2024-01-02"]).unwrap();
    match args.command {
      Some(Command::Report { fetch, json }) => {
        assert!(fetch.refresh);
        assert!(!json);
        assert_eq!(fetch.since, NaiveDate::from_ymd_opt(2024, 1, 2));
      }
      other => panic!("unexpected command: {:?}", other),
    }
  }

  #[test]
  fn test_config_set_collects_values() {
    let args = Args::try_parse_from([
      "standup", "config", "set", "calendar", "exclude_keywords", "Lunch", "Focus time",
    ])
    .unwrap();
    match args.command {
      Some(Command::Config(ConfigCommand::Set { source, list, values })) => {
        assert_eq!(SourceKind::from(source), SourceKind::Calendar);
        assert_eq!(list, "exclude_keywords");
        assert_eq!(values, ["Lunch", "Focus time"]);
      }
      other => panic!("unexpected command: {:?}", other),
    }
  }
}
