use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::auth::AuthSession;

use super::error::RequestError;

/// HTTP methods the backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl From<Method> for reqwest::Method {
  fn from(m: Method) -> Self {
    match m {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    })
  }
}

/// Response body as relayed from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
  Json(Value),
  /// Non-JSON body, kept verbatim
  Text(String),
  Empty,
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Body,
}

/// Backend API client with bearer authentication.
///
/// All failures come back as [`RequestError`]; nothing is retried here.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: String,
  auth: AuthSession,
}

impl ApiClient {
  pub fn new(base_url: &str, auth: AuthSession, timeout: Duration) -> Result<Self> {
    Url::parse(base_url).map_err(|e| eyre!("Invalid API URL '{}': {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("b9s/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
      auth,
    })
  }

  #[cfg(test)]
  pub fn auth(&self) -> &AuthSession {
    &self.auth
  }

  /// Resolve a resource path (e.g. "/api/v1/batches?x=1") against the base URL.
  fn url_for(&self, path: &str) -> Result<Url, RequestError> {
    if !path.starts_with('/') || path.starts_with("//") {
      return Err(RequestError::InvalidPath(path.to_string()));
    }
    Url::parse(&format!("{}{}", self.base_url, path))
      .map_err(|e| RequestError::InvalidPath(format!("{}: {}", path, e)))
  }

  /// Perform a request against the backend.
  ///
  /// A 401 invalidates the credential that was sent, which logs the session
  /// out no matter which caller hit it.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
  ) -> Result<ApiResponse, RequestError> {
    let url = self.url_for(path)?;
    let credential = self.auth.credential();

    let mut request = self
      .http
      .request(method.into(), url)
      .header(ACCEPT, "application/json");
    if let Some(credential) = &credential {
      request = request.header(AUTHORIZATION, credential.bearer());
    }
    if let Some(body) = body {
      request = request
        .header(CONTENT_TYPE, "application/json")
        .body(body.to_string());
    }

    debug!(%method, path, authenticated = credential.is_some(), "Sending request");

    let response = request.send().await.map_err(|e| {
      warn!(%method, path, error = %e, "Request failed");
      RequestError::from(e)
    })?;
    let status = response.status();
    let bytes = response.bytes().await?;
    let body = decode_body(&bytes);

    if status == StatusCode::UNAUTHORIZED {
      match credential {
        Some(credential) => {
          self.auth.invalidate(credential.generation);
        }
        None => warn!(path, "Backend requires an API key"),
      }
      return Err(RequestError::Unauthorized);
    }

    if !status.is_success() {
      let message = error_message(&body, status);
      warn!(%method, path, status = status.as_u16(), %message, "Backend returned an error");
      return Err(RequestError::Status {
        status: status.as_u16(),
        message,
      });
    }

    debug!(%method, path, status = status.as_u16(), "Request completed");
    Ok(ApiResponse {
      status: status.as_u16(),
      body,
    })
  }

  /// GET a path and deserialize its JSON body.
  pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
    let response = self.request(Method::Get, path, None).await?;
    match response.body {
      Body::Json(value) => serde_json::from_value(value)
        .map_err(|e| RequestError::Malformed(format!("{}: {}", path, e))),
      Body::Text(text) => Err(RequestError::Malformed(format!(
        "{}: expected JSON, got '{}'",
        path,
        snippet(&text)
      ))),
      Body::Empty => Err(RequestError::Malformed(format!(
        "{}: expected JSON, got an empty body",
        path
      ))),
    }
  }

  /// DELETE a path, ignoring the response body.
  pub async fn delete(&self, path: &str) -> Result<(), RequestError> {
    self.request(Method::Delete, path, None).await.map(|_| ())
  }
}

/// JSON if it parses, raw text otherwise.
fn decode_body(bytes: &[u8]) -> Body {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return Body::Empty;
  }
  match serde_json::from_slice(bytes) {
    Ok(value) => Body::Json(value),
    Err(_) => Body::Text(String::from_utf8_lossy(bytes).into_owned()),
  }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &Body, status: StatusCode) -> String {
  let fallback = || {
    status
      .canonical_reason()
      .unwrap_or("request failed")
      .to_string()
  };

  match body {
    Body::Json(value) => ["detail", "message", "error"]
      .iter()
      .find_map(|field| value.get(field))
      .map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      })
      .unwrap_or_else(fallback),
    Body::Text(text) if !text.trim().is_empty() => snippet(text.trim()),
    _ => fallback(),
  }
}

fn snippet(text: &str) -> String {
  const MAX: usize = 120;
  match text.char_indices().nth(MAX) {
    Some((idx, _)) => format!("{}...", &text[..idx]),
    None => text.to_string(),
  }
}
