//! Request error types.

use thiserror::Error;

/// Why a backend request failed.
///
/// Errors are stored in cache entries and shown next to stale data, so they
/// are cloneable and carry only strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
  /// The backend rejected the API key (401). The session has been logged out.
  #[error("Unauthorized: API key rejected")]
  Unauthorized,

  /// No response: connection failure or timeout.
  #[error("Network error: {0}")]
  Network(String),

  /// Non-2xx status other than 401.
  #[error("HTTP {status}: {message}")]
  Status { status: u16, message: String },

  /// Body was not the JSON we expected.
  #[error("Malformed response: {0}")]
  Malformed(String),

  /// Caller passed something that is not a resource path.
  #[error("Invalid request path: {0}")]
  InvalidPath(String),
}

impl RequestError {
  /// Stable reason label for logs and the UI.
  pub fn reason(&self) -> &'static str {
    match self {
      RequestError::Unauthorized => "unauthorized",
      RequestError::Network(_) => "network",
      RequestError::Status { .. } => "status",
      RequestError::Malformed(_) => "malformed",
      RequestError::InvalidPath(_) => "invalid_path",
    }
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      RequestError::Unauthorized => Some(401),
      RequestError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for RequestError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      RequestError::Network(format!("request timed out: {}", e))
    } else if e.is_decode() {
      RequestError::Malformed(e.to_string())
    } else {
      RequestError::Network(e.to_string())
    }
  }
}
