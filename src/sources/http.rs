//! Small helpers around reqwest shared by all sources.

use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

/// Client used for every outgoing request.
pub fn build_client() -> Result<Client> {
  Client::builder()
    .user_agent(concat!("standup/", env!("CARGO_PKG_VERSION")))
    .build()
    .map_err(|e| eyre!("Failed to create HTTP client: {}", e))
}

/// Send `request` and fail on anything but a 2xx response.
pub async fn send(request: RequestBuilder, what: &str) -> Result<Response> {
  let response = request
    .send()
    .await
    .map_err(|e| eyre!("Failed to {}: {}", what, e))?;
  ensure_success(response, what).await
}

/// Turn a non-2xx response into an error carrying the start of its body.
pub async fn ensure_success(response: Response, what: &str) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  Err(eyre!("Failed to {}: HTTP {} {}", what, status, excerpt(&body)))
}

/// Send `request` and decode the JSON body.
pub async fn get_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
  send(request, what)
    .await?
    .json::<T>()
    .await
    .map_err(|e| eyre!("Failed to parse response to {}: {}", what, e))
}

/// Whether the server accepts the credentials on `request`.
///
/// 401/403 mean no; any other failure is an error.
pub async fn credentials_accepted(request: RequestBuilder, what: &str) -> Result<bool> {
  let response = request
    .send()
    .await
    .map_err(|e| eyre!("Failed to {}: {}", what, e))?;

  match response.status() {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
    _ => ensure_success(response, what).await.map(|_| true),
  }
}

fn excerpt(body: &str) -> &str {
  let body = body.trim();
  match body.char_indices().nth(200) {
    Some((idx, _)) => &body[..idx],
    None => body,
  }
}

/// Join a base URL and a path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
  format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
