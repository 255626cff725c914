//! Refresh policy shared by every cached resource.
//!
//! Holds the auto-refresh flag and interval (persisted), and the manual
//! refresh counter (memory only). Settings changes are published on a watch
//! channel since only the latest value matters to a scheduler. Manual
//! triggers are delivered on one unbounded channel per listener instead, so
//! that no increment is ever coalesced away.

use color_eyre::Result;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::storage::{self, LocalStorage};

/// Polling interval choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshInterval {
  Off,
  #[default]
  FiveSeconds,
  TenSeconds,
  ThirtySeconds,
  OneMinute,
  FiveMinutes,
}

impl RefreshInterval {
  pub const ALL: [RefreshInterval; 6] = [
    RefreshInterval::Off,
    RefreshInterval::FiveSeconds,
    RefreshInterval::TenSeconds,
    RefreshInterval::ThirtySeconds,
    RefreshInterval::OneMinute,
    RefreshInterval::FiveMinutes,
  ];

  /// Key used in storage and on screen.
  pub fn key(self) -> &'static str {
    match self {
      RefreshInterval::Off => "off",
      RefreshInterval::FiveSeconds => "5s",
      RefreshInterval::TenSeconds => "10s",
      RefreshInterval::ThirtySeconds => "30s",
      RefreshInterval::OneMinute => "1m",
      RefreshInterval::FiveMinutes => "5m",
    }
  }

  pub fn from_key(key: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|i| i.key() == key)
  }

  /// Zero for `Off`.
  pub fn duration(self) -> Duration {
    match self {
      RefreshInterval::Off => Duration::ZERO,
      RefreshInterval::FiveSeconds => Duration::from_secs(5),
      RefreshInterval::TenSeconds => Duration::from_secs(10),
      RefreshInterval::ThirtySeconds => Duration::from_secs(30),
      RefreshInterval::OneMinute => Duration::from_secs(60),
      RefreshInterval::FiveMinutes => Duration::from_secs(300),
    }
  }

  /// Next choice, wrapping around. Used by the interval hotkey.
  pub fn next(self) -> Self {
    let idx = Self::ALL.iter().position(|i| *i == self).unwrap_or(0);
    Self::ALL[(idx + 1) % Self::ALL.len()]
  }
}

impl fmt::Display for RefreshInterval {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}

/// Persisted part of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
  pub auto_refresh: bool,
  pub interval: RefreshInterval,
}

impl Default for RefreshSettings {
  fn default() -> Self {
    Self {
      auto_refresh: true,
      interval: RefreshInterval::default(),
    }
  }
}

impl RefreshSettings {
  /// Zero when auto-refresh is disabled or the interval is off.
  pub fn effective_interval(&self) -> Duration {
    if self.auto_refresh {
      self.interval.duration()
    } else {
      Duration::ZERO
    }
  }
}

/// Receives every manual refresh increment, in order.
pub struct ManualRefreshListener {
  rx: mpsc::UnboundedReceiver<u64>,
}

impl ManualRefreshListener {
  /// Wait for the next trigger. `None` once the policy is gone.
  pub async fn recv(&mut self) -> Option<u64> {
    self.rx.recv().await
  }
}

struct PolicyInner {
  settings: watch::Sender<RefreshSettings>,
  manual_count: AtomicU64,
  listeners: Mutex<Vec<mpsc::UnboundedSender<u64>>>,
  refreshing_until: Mutex<Option<Instant>>,
  flag_window: Duration,
  storage: Arc<dyn LocalStorage>,
}

/// The refresh policy store. Cheap to clone, all clones share state.
#[derive(Clone)]
pub struct RefreshPolicy {
  inner: Arc<PolicyInner>,
}

impl RefreshPolicy {
  /// Hydrate the policy from storage.
  ///
  /// Missing or unrecognized values fall back to the defaults.
  pub fn load(storage: Arc<dyn LocalStorage>, flag_window: Duration) -> Self {
    let settings = read_settings(storage.as_ref());
    info!(
      auto_refresh = settings.auto_refresh,
      interval = %settings.interval,
      "Loaded refresh policy"
    );
    let (tx, _rx) = watch::channel(settings);

    Self {
      inner: Arc::new(PolicyInner {
        settings: tx,
        manual_count: AtomicU64::new(0),
        listeners: Mutex::new(Vec::new()),
        refreshing_until: Mutex::new(None),
        flag_window,
        storage,
      }),
    }
  }

  pub fn settings(&self) -> RefreshSettings {
    *self.inner.settings.borrow()
  }

  pub fn subscribe_settings(&self) -> watch::Receiver<RefreshSettings> {
    self.inner.settings.subscribe()
  }

  pub fn effective_interval(&self) -> Duration {
    self.settings().effective_interval()
  }

  pub fn set_auto_refresh(&self, enabled: bool) -> Result<()> {
    self.inner.settings.send_if_modified(|s| {
      let changed = s.auto_refresh != enabled;
      s.auto_refresh = enabled;
      changed
    });
    info!(enabled, "Auto-refresh changed");
    self
      .inner
      .storage
      .set(storage::AUTO_REFRESH, if enabled { "true" } else { "false" })
  }

  pub fn set_interval(&self, interval: RefreshInterval) -> Result<()> {
    self.inner.settings.send_if_modified(|s| {
      let changed = s.interval != interval;
      s.interval = interval;
      changed
    });
    info!(interval = %interval, "Refresh interval changed");
    self
      .inner
      .storage
      .set(storage::REFRESH_INTERVAL, interval.key())
  }

  /// Bump the manual refresh counter and notify every listener.
  ///
  /// Returns the new counter value.
  pub fn trigger_manual_refresh(&self) -> u64 {
    let count = self.inner.manual_count.fetch_add(1, Ordering::SeqCst) + 1;
    self.mark_refreshing();

    let mut listeners = self
      .inner
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    listeners.retain(|tx| tx.send(count).is_ok());
    info!(count, listeners = listeners.len(), "Manual refresh triggered");

    count
  }

  pub fn manual_trigger_count(&self) -> u64 {
    self.inner.manual_count.load(Ordering::SeqCst)
  }

  /// Register a listener for manual refresh triggers.
  ///
  /// Only triggers issued after this call are delivered. Senders of dropped
  /// listeners are pruned here as well as on every trigger.
  pub fn manual_refresh_listener(&self) -> ManualRefreshListener {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut listeners = self
      .inner
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    listeners.retain(|tx| !tx.is_closed());
    listeners.push(tx);
    ManualRefreshListener { rx }
  }

  #[cfg(test)]
  pub fn listener_count(&self) -> usize {
    self
      .inner
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Start (or extend) the presentation-only "refreshing" window.
  pub fn mark_refreshing(&self) {
    let until = Instant::now() + self.inner.flag_window;
    *self
      .inner
      .refreshing_until
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = Some(until);
  }

  pub fn is_refreshing(&self) -> bool {
    self
      .inner
      .refreshing_until
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some_and(|until| Instant::now() < until)
  }
}

fn read_settings(storage: &dyn LocalStorage) -> RefreshSettings {
  let mut settings = RefreshSettings::default();

  match storage.get(storage::AUTO_REFRESH) {
    Ok(Some(v)) => match v.as_str() {
      "true" => settings.auto_refresh = true,
      "false" => settings.auto_refresh = false,
      other => warn!(value = other, "Ignoring unrecognized autoRefresh value"),
    },
    Ok(None) => {}
    Err(e) => warn!(error = %e, "Failed to read autoRefresh"),
  }

  match storage.get(storage::REFRESH_INTERVAL) {
    Ok(Some(v)) => match RefreshInterval::from_key(&v) {
      Some(interval) => settings.interval = interval,
      None => warn!(value = %v, "Ignoring unrecognized refreshInterval value"),
    },
    Ok(None) => {}
    Err(e) => warn!(error = %e, "Failed to read refreshInterval"),
  }

  settings
}
