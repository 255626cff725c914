use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::{self, LocalStorage};

/// Backend URL used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Custom title for header (defaults to the backend host if not set)
  pub title: Option<String>,
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub refresh: RefreshConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend base URL, e.g. "https://batches.example.com"
  pub url: Option<String>,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
  /// Window in which identical requests share one network call
  #[serde(default = "default_deduping_interval_ms")]
  pub deduping_interval_ms: u64,
  /// Revalidate every visible resource when the terminal regains focus
  #[serde(default = "default_true")]
  pub revalidate_on_focus: bool,
  /// How long the header shows the "refreshing" indicator
  #[serde(default = "default_refreshing_flag_ms")]
  pub refreshing_flag_ms: u64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      deduping_interval_ms: default_deduping_interval_ms(),
      revalidate_on_focus: true,
      refreshing_flag_ms: default_refreshing_flag_ms(),
    }
  }
}

impl RefreshConfig {
  pub fn deduping_interval(&self) -> Duration {
    Duration::from_millis(self.deduping_interval_ms)
  }

  pub fn refreshing_flag(&self) -> Duration {
    Duration::from_millis(self.refreshing_flag_ms)
  }
}

fn default_deduping_interval_ms() -> u64 {
  2000
}

fn default_refreshing_flag_ms() -> u64 {
  1000
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Override for the local storage database location
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./b9s.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/b9s/config.yaml
  ///
  /// Every field has a default, so a missing file yields the default config.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("b9s.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("b9s").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  /// Resolve the backend base URL.
  ///
  /// Checks B9S_API_URL, then the persisted override, then the config file.
  pub fn resolve_base_url(&self, storage: &dyn LocalStorage) -> Result<String> {
    let env = std::env::var("B9S_API_URL").ok();
    self.resolve_base_url_with(env, storage)
  }

  fn resolve_base_url_with(
    &self,
    env: Option<String>,
    storage: &dyn LocalStorage,
  ) -> Result<String> {
    let persisted = storage.get(storage::API_BASE_URL)?;
    let url = [env, persisted, self.api.url.clone()]
      .into_iter()
      .flatten()
      .map(|u| u.trim().to_string())
      .find(|u| !u.is_empty())
      .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    url::Url::parse(&url).map_err(|e| eyre!("Invalid API URL '{}': {}", url, e))?;

    Ok(url.trim_end_matches('/').to_string())
  }

  /// Get the API key from the environment, falling back to the persisted one.
  ///
  /// Checks B9S_API_KEY first. `None` means the user has to log in.
  pub fn resolve_api_key(storage: &dyn LocalStorage) -> Result<Option<String>> {
    let env = std::env::var("B9S_API_KEY").ok();
    Self::resolve_api_key_with(env, storage)
  }

  fn resolve_api_key_with(
    env: Option<String>,
    storage: &dyn LocalStorage,
  ) -> Result<Option<String>> {
    if let Some(key) = env.filter(|k| !k.trim().is_empty()) {
      return Ok(Some(key.trim().to_string()));
    }
    Ok(storage.get(storage::API_KEY)?.filter(|k| !k.is_empty()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStorage;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.timeout_secs, 15);
    assert_eq!(config.refresh.deduping_interval_ms, 2000);
    assert!(config.refresh.revalidate_on_focus);
    assert!(config.title.is_none());
  }

  #[test]
  fn test_parse_full_config() {
    let yaml = r#"
title: Production
api:
  url: https://batches.example.com/
  timeout_secs: 5
refresh:
  deduping_interval_ms: 500
  revalidate_on_focus: false
storage:
  path: /tmp/b9s.db
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.title.as_deref(), Some("Production"));
    assert_eq!(config.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.refresh.deduping_interval(), Duration::from_millis(500));
    assert!(!config.refresh.revalidate_on_focus);
    assert_eq!(config.refresh.refreshing_flag_ms, 1000);
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/b9s.db")));
  }

  #[test]
  fn test_base_url_precedence() {
    let storage = MemoryStorage::new();
    let config = Config::parse("api:\n  url: http://from-config:9000/\n").unwrap();

    assert_eq!(
      config.resolve_base_url_with(None, &storage).unwrap(),
      "http://from-config:9000"
    );

    storage
      .set(storage::API_BASE_URL, "http://persisted:8080")
      .unwrap();
    assert_eq!(
      config.resolve_base_url_with(None, &storage).unwrap(),
      "http://persisted:8080"
    );

    assert_eq!(
      config
        .resolve_base_url_with(Some("http://env:1".to_string()), &storage)
        .unwrap(),
      "http://env:1"
    );
  }

  #[test]
  fn test_base_url_default_and_validation() {
    let storage = MemoryStorage::new();
    let config = Config::default();
    assert_eq!(
      config.resolve_base_url_with(None, &storage).unwrap(),
      DEFAULT_API_URL
    );

    storage.set(storage::API_BASE_URL, "not a url").unwrap();
    assert!(config.resolve_base_url_with(None, &storage).is_err());
  }

  #[test]
  fn test_api_key_resolution() {
    let storage = MemoryStorage::new();
    assert_eq!(Config::resolve_api_key_with(None, &storage).unwrap(), None);

    storage.set(storage::API_KEY, "stored").unwrap();
    assert_eq!(
      Config::resolve_api_key_with(None, &storage).unwrap().as_deref(),
      Some("stored")
    );

    assert_eq!(
      Config::resolve_api_key_with(Some(" env-key ".to_string()), &storage)
        .unwrap()
        .as_deref(),
      Some("env-key")
    );
    assert_eq!(
      Config::resolve_api_key_with(Some("  ".to_string()), &storage)
        .unwrap()
        .as_deref(),
      Some("stored")
    );
  }
}
