//! Core traits and types for the resource cache.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;

use crate::api::RequestError;
use crate::config::RefreshConfig;

/// Something that can load a resource from the backend.
///
/// Implemented for any `Fn() -> impl Future<Output = Result<T, RequestError>>`,
/// so a closure capturing a client is the usual fetcher.
pub trait Fetcher<T>: Send + Sync + 'static {
  fn fetch(&self) -> BoxFuture<'static, Result<T, RequestError>>;
}

impl<T, F, Fut> Fetcher<T> for F
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
{
  fn fetch(&self) -> BoxFuture<'static, Result<T, RequestError>> {
    Box::pin(self())
  }
}

/// What a subscriber sees for one resource key.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
  /// Last successfully fetched value. Kept when a later fetch fails.
  pub data: Option<T>,
  /// Error from the most recent fetch, cleared by the next success
  pub error: Option<RequestError>,
  /// No response has arrived yet
  pub is_loading: bool,
  /// A background revalidation is in flight
  pub is_validating: bool,
  /// When `data` was last replaced
  pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for ResourceState<T> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      is_loading: false,
      is_validating: false,
      updated_at: None,
    }
  }
}

impl<T> ResourceState<T> {
  pub(crate) fn loading() -> Self {
    Self {
      is_loading: true,
      ..Self::default()
    }
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&RequestError> {
    self.error.as_ref()
  }

  /// Showing old data next to an error from a newer fetch.
  pub fn is_stale(&self) -> bool {
    self.data.is_some() && self.error.is_some()
  }

  /// Loading or validating.
  pub fn is_busy(&self) -> bool {
    self.is_loading || self.is_validating
  }
}

/// Per-subscription overrides of the cache defaults.
///
/// The first subscriber of a key decides the options of its entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceOptions {
  /// Poll period for this key instead of the global interval.
  /// `Some(Duration::ZERO)` disables polling for the key.
  pub refresh_interval: Option<Duration>,
  pub revalidate_on_focus: Option<bool>,
  pub deduping_interval: Option<Duration>,
}

impl ResourceOptions {
  pub fn refresh_interval(mut self, interval: Duration) -> Self {
    self.refresh_interval = Some(interval);
    self
  }

  #[cfg(test)]
  pub fn revalidate_on_focus(mut self, enabled: bool) -> Self {
    self.revalidate_on_focus = Some(enabled);
    self
  }

  #[cfg(test)]
  pub fn deduping_interval(mut self, interval: Duration) -> Self {
    self.deduping_interval = Some(interval);
    self
  }
}

/// Cache-wide defaults, taken from the `refresh` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDefaults {
  pub deduping_interval: Duration,
  pub revalidate_on_focus: bool,
}

impl Default for CacheDefaults {
  fn default() -> Self {
    Self::from(&RefreshConfig::default())
  }
}

impl From<&RefreshConfig> for CacheDefaults {
  fn from(config: &RefreshConfig) -> Self {
    Self {
      deduping_interval: config.deduping_interval(),
      revalidate_on_focus: config.revalidate_on_focus,
    }
  }
}

/// Options of one entry after applying the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryOptions {
  pub refresh_interval: Option<Duration>,
  pub revalidate_on_focus: bool,
  pub deduping_interval: Duration,
}

impl EntryOptions {
  pub fn resolve(options: ResourceOptions, defaults: CacheDefaults) -> Self {
    Self {
      refresh_interval: options.refresh_interval,
      revalidate_on_focus: options
        .revalidate_on_focus
        .unwrap_or(defaults.revalidate_on_focus),
      deduping_interval: options
        .deduping_interval
        .unwrap_or(defaults.deduping_interval),
    }
  }
}

/// Why an entry is being revalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  /// A subscriber attached
  Mount,
  /// Poll timer fired
  Interval,
  /// Terminal regained focus
  Focus,
  /// Manual refresh from the policy store
  Manual,
  /// `Subscription::mutate`
  Mutate,
  /// Explicit invalidation by key
  Invalidate,
}

impl Trigger {
  /// Forced triggers skip deduplication and queue behind an in-flight fetch
  /// instead of joining it.
  pub fn is_forced(self) -> bool {
    matches!(self, Trigger::Manual | Trigger::Mutate | Trigger::Invalidate)
  }

  /// Triggers skipped when a fetch started within the deduping window.
  /// Poll ticks keep their cadence and only join a fetch already running.
  pub fn is_deduplicated(self) -> bool {
    matches!(self, Trigger::Mount | Trigger::Focus)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Trigger::Mount => "mount",
      Trigger::Interval => "interval",
      Trigger::Focus => "focus",
      Trigger::Manual => "manual",
      Trigger::Mutate => "mutate",
      Trigger::Invalidate => "invalidate",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_options_fall_back_to_defaults() {
    let defaults = CacheDefaults {
      deduping_interval: Duration::from_secs(2),
      revalidate_on_focus: true,
    };

    let resolved = EntryOptions::resolve(ResourceOptions::default(), defaults);
    assert_eq!(resolved.refresh_interval, None);
    assert!(resolved.revalidate_on_focus);
    assert_eq!(resolved.deduping_interval, Duration::from_secs(2));

    let resolved = EntryOptions::resolve(
      ResourceOptions::default()
        .refresh_interval(Duration::ZERO)
        .revalidate_on_focus(false)
        .deduping_interval(Duration::from_millis(500)),
      defaults,
    );
    assert_eq!(resolved.refresh_interval, Some(Duration::ZERO));
    assert!(!resolved.revalidate_on_focus);
    assert_eq!(resolved.deduping_interval, Duration::from_millis(500));
  }

  #[test]
  fn test_state_flags() {
    let state: ResourceState<u32> = ResourceState::loading();
    assert!(state.is_loading);
    assert!(state.is_busy());
    assert!(!state.is_stale());

    let state = ResourceState {
      data: Some(1),
      error: Some(RequestError::Network("refused".into())),
      ..ResourceState::default()
    };
    assert!(state.is_stale());
    assert!(!state.is_busy());
  }

  #[test]
  fn test_forced_triggers() {
    assert!(Trigger::Manual.is_forced());
    assert!(Trigger::Mutate.is_forced());
    assert!(!Trigger::Interval.is_forced());
    assert!(!Trigger::Focus.is_forced());
    assert!(!Trigger::Mount.is_forced());
  }
}
