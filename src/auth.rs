//! Opaque bearer tokens for the calendar source.
//!
//! How the token is obtained is outside this program: either an external
//! command prints one, or one was stored with `standup connect calendar`.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::Config;
use crate::items::SourceKind;
use crate::settings::{token_key, Area, SettingsExt, SettingsStore};

#[async_trait]
pub trait TokenProvider: Send + Sync {
  /// Current token, `None` when the user never connected.
  async fn auth_token(&self) -> Result<Option<String>>;

  /// Forget `token` so the next `auth_token` call can obtain a new one.
  async fn invalidate(&self, token: &str) -> Result<()>;
}

/// Runs a configured command and remembers its output until invalidated.
pub struct CommandTokenProvider {
  command: Vec<String>,
  cached: Mutex<Option<String>>,
}

impl CommandTokenProvider {
  pub fn new(command: Vec<String>) -> Self {
    Self {
      command,
      cached: Mutex::new(None),
    }
  }

  async fn run(&self) -> Result<String> {
    let (program, args) = self
      .command
      .split_first()
      .ok_or_else(|| eyre!("Calendar token command is empty"))?;

    let output = tokio::process::Command::new(program)
      .args(args)
      .output()
      .await
      .map_err(|e| eyre!("Failed to run token command {}: {}", program, e))?;

    if !output.status.success() {
      return Err(eyre!(
        "Token command {} failed: {}",
        program,
        String::from_utf8_lossy(&output.stderr).trim()
      ));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
      return Err(eyre!("Token command {} printed nothing", program));
    }
    Ok(token)
  }
}

#[async_trait]
impl TokenProvider for CommandTokenProvider {
  async fn auth_token(&self) -> Result<Option<String>> {
    let mut cached = self.cached.lock().await;
    if let Some(token) = cached.as_ref() {
      return Ok(Some(token.clone()));
    }

    let token = self.run().await?;
    *cached = Some(token.clone());
    Ok(Some(token))
  }

  async fn invalidate(&self, token: &str) -> Result<()> {
    let mut cached = self.cached.lock().await;
    if cached.as_deref() == Some(token) {
      *cached = None;
    }
    Ok(())
  }
}

/// Token saved in the settings store, or STANDUP_CALENDAR_TOKEN.
pub struct StoredTokenProvider {
  settings: Arc<dyn SettingsStore>,
}

impl StoredTokenProvider {
  pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
    Self { settings }
  }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
  async fn auth_token(&self) -> Result<Option<String>> {
    let stored: Option<String> = self
      .settings
      .get(Area::Local, &token_key(SourceKind::Calendar))?;
    Ok(stored.or_else(|| Config::env_token(SourceKind::Calendar)))
  }

  /// A stored token cannot be replaced here, so it is kept until the user
  /// reconnects or disconnects.
  async fn invalidate(&self, _token: &str) -> Result<()> {
    warn!("stored calendar token was rejected, run `standup connect calendar` to replace it");
    Ok(())
  }
}

/// The provider selected by configuration.
pub fn calendar_token_provider(
  config: &Config,
  settings: Arc<dyn SettingsStore>,
) -> Arc<dyn TokenProvider> {
  match &config.calendar.token_command {
    Some(command) => Arc::new(CommandTokenProvider::new(command.clone())),
    None => Arc::new(StoredTokenProvider::new(settings)),
  }
}
