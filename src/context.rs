//! Process-wide state, created once at startup and handed to every view.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;

use crate::api::{ApiClient, Resources};
use crate::auth::AuthSession;
use crate::cache::{CacheDefaults, ResourceCache};
use crate::config::Config;
use crate::refresh::RefreshPolicy;
use crate::storage::{self, LocalStorage};

/// Everything a view needs to talk to the backend. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
  pub config: Arc<Config>,
  pub auth: AuthSession,
  pub policy: RefreshPolicy,
  pub resources: Resources,
  base_url: String,
}

impl AppContext {
  /// Wire up storage, auth, the refresh policy and the cache.
  ///
  /// `url_override` is persisted as the new base URL before resolving.
  pub fn bootstrap(
    config: Config,
    storage: Arc<dyn LocalStorage>,
    url_override: Option<&str>,
  ) -> Result<Self> {
    if let Some(url) = url_override {
      url::Url::parse(url).map_err(|e| eyre!("Invalid API URL '{}': {}", url, e))?;
      storage.set(storage::API_BASE_URL, url.trim_end_matches('/'))?;
    }

    let base_url = config.resolve_base_url(storage.as_ref())?;
    let api_key = Config::resolve_api_key(storage.as_ref())?;
    info!(base_url = %base_url, has_api_key = api_key.is_some(), "Starting");

    let auth = AuthSession::new(storage.clone(), api_key);
    let client = ApiClient::new(&base_url, auth.clone(), config.request_timeout())?;
    let policy = RefreshPolicy::load(storage, config.refresh.refreshing_flag());
    let cache = ResourceCache::new(policy.clone(), CacheDefaults::from(&config.refresh));

    Ok(Self {
      config: Arc::new(config),
      auth,
      policy,
      resources: Resources::new(client, cache),
      base_url,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  pub fn cache(&self) -> &ResourceCache {
    self.resources.cache()
  }

  /// Header title: configured title, else the backend host.
  pub fn title(&self) -> String {
    if let Some(title) = &self.config.title {
      return title.clone();
    }
    url::Url::parse(&self.base_url)
      .ok()
      .and_then(|u| {
        u.host_str().map(|h| match u.port() {
          Some(port) => format!("{}:{}", h, port),
          None => h.to_string(),
        })
      })
      .unwrap_or_else(|| self.base_url.clone())
  }
}
