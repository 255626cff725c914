//! A single cached resource and its revalidation logic.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::refresh::RefreshSettings;

use super::traits::{EntryOptions, Fetcher, ResourceState, Trigger};

/// Handle to a revalidation. Resolves once its result has been applied.
pub type Revalidation = Shared<BoxFuture<'static, ()>>;

struct Flight {
  seq: u64,
  done: Revalidation,
}

#[derive(Default)]
struct Inflight {
  current: Option<Flight>,
  last_started: Option<Instant>,
  next_seq: u64,
}

/// One resource key: its state channel, its fetcher and at most one
/// request in flight.
pub struct Entry<T> {
  key: String,
  options: EntryOptions,
  fetcher: Box<dyn Fetcher<T>>,
  state: watch::Sender<ResourceState<T>>,
  inflight: Mutex<Inflight>,
  applied_seq: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Entry<T> {
  pub(crate) fn new(key: String, options: EntryOptions, fetcher: Box<dyn Fetcher<T>>) -> Self {
    let (state, _rx) = watch::channel(ResourceState::loading());
    Self {
      key,
      options,
      fetcher,
      state,
      inflight: Mutex::new(Inflight::default()),
      applied_seq: AtomicU64::new(0),
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
    self.state.subscribe()
  }

  #[cfg(test)]
  pub fn snapshot(&self) -> ResourceState<T> {
    self.state.borrow().clone()
  }

  /// Poll period under the given global settings, `None` when not polling.
  pub fn poll_period(&self, settings: &RefreshSettings) -> Option<Duration> {
    if !settings.auto_refresh {
      return None;
    }
    let period = self
      .options
      .refresh_interval
      .unwrap_or_else(|| settings.interval.duration());
    (!period.is_zero()).then_some(period)
  }

  /// Start a revalidation, or join the one already running.
  ///
  /// Non-forced triggers join an in-flight fetch. Mount and focus triggers
  /// are also skipped within the deduping window. Forced triggers always
  /// fetch, but only after the in-flight one has finished. The work is spawned, so the returned
  /// handle may be dropped.
  pub fn revalidate(self: &Arc<Self>, trigger: Trigger) -> Revalidation {
    let mut inflight = self
      .inflight
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    if !trigger.is_forced() {
      if let Some(flight) = &inflight.current {
        debug!(key = %self.key, trigger = trigger.as_str(), "Joining in-flight request");
        return flight.done.clone();
      }
      if let Some(started) = inflight.last_started.filter(|_| trigger.is_deduplicated()) {
        if started.elapsed() < self.options.deduping_interval {
          debug!(key = %self.key, trigger = trigger.as_str(), "Deduplicated");
          return futures::future::ready(()).boxed().shared();
        }
      }
    }

    inflight.next_seq += 1;
    let seq = inflight.next_seq;
    let previous = inflight.current.as_ref().map(|f| f.done.clone());

    let entry = Arc::clone(self);
    let done = async move {
      if let Some(previous) = previous {
        previous.await;
      }
      entry.run(seq, trigger).await;
    }
    .boxed()
    .shared();

    inflight.current = Some(Flight {
      seq,
      done: done.clone(),
    });
    // Stamped at scheduling time so triggers arriving before the spawned
    // task is polled are still deduplicated.
    inflight.last_started = Some(Instant::now());
    drop(inflight);

    tokio::spawn(done.clone());
    done
  }

  async fn run(&self, seq: u64, trigger: Trigger) {
    self.inflight_mut(|f| f.last_started = Some(Instant::now()));
    self.state.send_if_modified(|s| {
      // The first fetch reports through is_loading
      if s.data.is_none() && s.error.is_none() {
        let changed = !s.is_loading;
        s.is_loading = true;
        changed
      } else {
        let changed = !s.is_validating;
        s.is_validating = true;
        changed
      }
    });

    debug!(key = %self.key, seq, trigger = trigger.as_str(), "Revalidating");
    let result = self.fetcher.fetch().await;

    if self.applied_seq.fetch_max(seq, Ordering::SeqCst) > seq {
      debug!(key = %self.key, seq, "Discarding superseded response");
    } else {
      self.state.send_modify(|s| {
        match result {
          Ok(data) => {
            s.data = Some(data);
            s.error = None;
            s.updated_at = Some(Utc::now());
          }
          Err(e) => {
            warn!(key = %self.key, reason = e.reason(), error = %e, "Fetch failed");
            s.error = Some(e);
          }
        }
        s.is_loading = false;
        s.is_validating = false;
      });
    }

    self.inflight_mut(|f| {
      if f.current.as_ref().is_some_and(|c| c.seq == seq) {
        f.current = None;
      }
    });
  }

  fn inflight_mut(&self, f: impl FnOnce(&mut Inflight)) {
    f(&mut self
      .inflight
      .lock()
      .unwrap_or_else(PoisonError::into_inner));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::RequestError;
  use crate::refresh::RefreshInterval;
  use std::sync::atomic::AtomicUsize;
  use tokio::time::sleep;

  fn options(dedupe_ms: u64) -> EntryOptions {
    EntryOptions {
      refresh_interval: None,
      revalidate_on_focus: true,
      deduping_interval: Duration::from_millis(dedupe_ms),
    }
  }

  /// Entry whose fetcher sleeps `delay` and returns the call number.
  /// Also records the highest number of concurrent calls.
  fn counting_entry(delay: Duration) -> (Arc<Entry<usize>>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));

    let fetcher = {
      let calls = calls.clone();
      let max_running = max_running.clone();
      move || {
        let calls = calls.clone();
        let running = running.clone();
        let max_running = max_running.clone();
        async move {
          let now = running.fetch_add(1, Ordering::SeqCst) + 1;
          max_running.fetch_max(now, Ordering::SeqCst);
          sleep(delay).await;
          running.fetch_sub(1, Ordering::SeqCst);
          Ok::<_, RequestError>(calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
      }
    };

    let entry = Arc::new(Entry::new("k".into(), options(2000), Box::new(fetcher)));
    (entry, calls, max_running)
  }

  #[tokio::test(start_paused = true)]
  async fn test_first_fetch_reports_loading() {
    let (entry, _, _) = counting_entry(Duration::from_millis(100));
    assert!(entry.snapshot().is_loading);

    entry.revalidate(Trigger::Mount).await;
    let state = entry.snapshot();
    assert!(!state.is_loading);
    assert!(!state.is_validating);
    assert_eq!(state.data, Some(1));
    assert!(state.updated_at.is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_later_fetch_reports_validating() {
    let (entry, _, _) = counting_entry(Duration::from_millis(100));
    entry.revalidate(Trigger::Mount).await;

    let pending = entry.revalidate(Trigger::Manual);
    sleep(Duration::from_millis(10)).await;
    let state = entry.snapshot();
    assert!(state.is_validating);
    assert!(!state.is_loading);
    assert_eq!(state.data, Some(1));

    pending.await;
    assert!(!entry.snapshot().is_validating);
    assert_eq!(entry.snapshot().data, Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_non_forced_triggers_join_in_flight() {
    let (entry, calls, _) = counting_entry(Duration::from_millis(100));
    let a = entry.revalidate(Trigger::Mount);
    let b = entry.revalidate(Trigger::Focus);
    let c = entry.revalidate(Trigger::Interval);
    futures::future::join3(a, b, c).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dedupe_window() {
    let (entry, calls, _) = counting_entry(Duration::ZERO);
    entry.revalidate(Trigger::Mount).await;

    sleep(Duration::from_millis(1500)).await;
    entry.revalidate(Trigger::Focus).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Forced triggers ignore the window
    entry.revalidate(Trigger::Manual).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    sleep(Duration::from_millis(2001)).await;
    entry.revalidate(Trigger::Focus).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_interval_ignores_dedupe_window() {
    let (entry, calls, _) = counting_entry(Duration::ZERO);
    entry.revalidate(Trigger::Mount).await;

    sleep(Duration::from_millis(500)).await;
    entry.revalidate(Trigger::Interval).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Mount right after the tick is still deduplicated
    entry.revalidate(Trigger::Mount).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_forced_triggers_queue_behind_in_flight() {
    let (entry, calls, max_running) = counting_entry(Duration::from_millis(100));
    let first = entry.revalidate(Trigger::Mount);
    let second = entry.revalidate(Trigger::Mutate);
    let third = entry.revalidate(Trigger::Manual);

    second.await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(entry.snapshot().data, Some(2));

    first.await;
    third.await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(entry.snapshot().data, Some(3));
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_keeps_data() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = {
      let calls = calls.clone();
      move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
          match n {
            2 => Err(RequestError::Network("connection refused".into())),
            _ => Ok(n),
          }
        }
      }
    };
    let entry = Arc::new(Entry::new("k".into(), options(0), Box::new(fetcher)));

    entry.revalidate(Trigger::Mount).await;
    entry.revalidate(Trigger::Manual).await;
    let state = entry.snapshot();
    assert_eq!(state.data, Some(1));
    assert_eq!(state.error.as_ref().map(|e| e.reason()), Some("network"));
    assert!(state.is_stale());

    entry.revalidate(Trigger::Manual).await;
    let state = entry.snapshot();
    assert_eq!(state.data, Some(3));
    assert_eq!(state.error, None);
  }

  #[tokio::test]
  async fn test_first_failure_ends_loading() {
    let fetcher = || async { Err::<u32, _>(RequestError::Unauthorized) };
    let entry = Arc::new(Entry::new("k".into(), options(0), Box::new(fetcher)));

    entry.revalidate(Trigger::Mount).await;
    let state = entry.snapshot();
    assert!(!state.is_loading);
    assert_eq!(state.data, None);
    assert_eq!(state.error, Some(RequestError::Unauthorized));
  }

  #[test]
  fn test_poll_period() {
    let fetcher = || async { Ok::<u32, RequestError>(1) };
    let entry = Entry::new("k".into(), options(0), Box::new(fetcher));

    let mut settings = RefreshSettings::default();
    assert_eq!(entry.poll_period(&settings), Some(Duration::from_secs(5)));

    settings.interval = RefreshInterval::Off;
    assert_eq!(entry.poll_period(&settings), None);

    settings.interval = RefreshInterval::OneMinute;
    settings.auto_refresh = false;
    assert_eq!(entry.poll_period(&settings), None);

    let mut opts = options(0);
    opts.refresh_interval = Some(Duration::from_secs(2));
    let entry = Entry::new("k".into(), opts, Box::new(fetcher));
    assert_eq!(entry.poll_period(&settings), None);
    settings.auto_refresh = true;
    assert_eq!(entry.poll_period(&settings), Some(Duration::from_secs(2)));

    opts.refresh_interval = Some(Duration::ZERO);
    let entry = Entry::new("k".into(), opts, Box::new(fetcher));
    assert_eq!(entry.poll_period(&settings), None);
  }
}
