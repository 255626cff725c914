//! Resource cache: one entry and one scheduler per subscribed key.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::refresh::{ManualRefreshListener, RefreshPolicy, RefreshSettings};

use super::entry::Entry;
use super::traits::{CacheDefaults, EntryOptions, Fetcher, ResourceOptions, ResourceState, Trigger};

type SlotId = (String, TypeId);
type RevalidateFn = Arc<dyn Fn(Trigger) + Send + Sync>;

struct Slot {
  entry: Arc<dyn Any + Send + Sync>,
  revalidate: RevalidateFn,
  revalidate_on_focus: bool,
  subscribers: usize,
  scheduler: JoinHandle<()>,
}

struct CacheInner {
  slots: Mutex<HashMap<SlotId, Slot>>,
  policy: RefreshPolicy,
  defaults: CacheDefaults,
}

impl CacheInner {
  fn release(&self, id: &SlotId) {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(slot) = slots.get_mut(id) else {
      return;
    };
    slot.subscribers -= 1;
    if slot.subscribers == 0 {
      if let Some(slot) = slots.remove(id) {
        slot.scheduler.abort();
        debug!(key = %id.0, "Released cache entry");
      }
    }
  }

  /// Collect revalidation callbacks under the lock, run them outside it.
  fn revalidate_where(&self, trigger: Trigger, pred: impl Fn(&str, &Slot) -> bool) -> usize {
    let targets: Vec<RevalidateFn> = {
      let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
      slots
        .iter()
        .filter(|(id, slot)| pred(&id.0, slot))
        .map(|(_, slot)| Arc::clone(&slot.revalidate))
        .collect()
    };
    for revalidate in &targets {
      revalidate(trigger);
    }
    targets.len()
  }
}

/// Shared cache of backend resources. Cheap to clone.
///
/// Entries live exactly as long as they have subscribers. Each entry owns a
/// scheduler task that polls on the effective interval and listens for
/// manual refreshes from the [`RefreshPolicy`].
#[derive(Clone)]
pub struct ResourceCache {
  inner: Arc<CacheInner>,
}

impl ResourceCache {
  pub fn new(policy: RefreshPolicy, defaults: CacheDefaults) -> Self {
    Self {
      inner: Arc::new(CacheInner {
        slots: Mutex::new(HashMap::new()),
        policy,
        defaults,
      }),
    }
  }

  #[cfg(test)]
  pub fn policy(&self) -> &RefreshPolicy {
    &self.inner.policy
  }

  /// Subscribe to a resource.
  ///
  /// `None` is an inactive subscription that never fetches. The first
  /// subscriber of a key creates its entry (using its `options` and
  /// `fetcher`) and starts the initial fetch; later subscribers share the
  /// entry and trigger a deduplicated revalidation.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn subscribe<T, F>(
    &self,
    key: Option<&str>,
    options: ResourceOptions,
    fetcher: F,
  ) -> Subscription<T>
  where
    T: Clone + Send + Sync + 'static,
    F: Fetcher<T>,
  {
    let Some(key) = key else {
      return Subscription::inactive();
    };
    let id: SlotId = (key.to_string(), TypeId::of::<T>());

    let mut slots = self
      .inner
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    let entry = match slots.get_mut(&id) {
      Some(slot) => {
        slot.subscribers += 1;
        let entry = match Arc::clone(&slot.entry).downcast::<Entry<T>>() {
          Ok(entry) => entry,
          Err(_) => unreachable!("slot id includes the value type"),
        };
        entry.revalidate(Trigger::Mount);
        entry
      }
      None => {
        let options = EntryOptions::resolve(options, self.inner.defaults);
        let entry = Arc::new(Entry::new(key.to_string(), options, Box::new(fetcher)));
        // Listeners are registered before returning so no trigger issued
        // after subscribe() can be missed.
        let settings = self.inner.policy.subscribe_settings();
        let manual = self.inner.policy.manual_refresh_listener();
        entry.revalidate(Trigger::Mount);
        let scheduler = tokio::spawn(schedule(Arc::clone(&entry), settings, manual));

        let revalidate: RevalidateFn = {
          let entry = Arc::clone(&entry);
          Arc::new(move |trigger| {
            entry.revalidate(trigger);
          })
        };
        slots.insert(
          id.clone(),
          Slot {
            entry: entry.clone(),
            revalidate,
            revalidate_on_focus: options.revalidate_on_focus,
            subscribers: 1,
            scheduler,
          },
        );
        debug!(key, "Created cache entry");
        entry
      }
    };
    drop(slots);

    Subscription::active(id, entry, Arc::clone(&self.inner))
  }

  /// Force every entry under `key` to refetch. Returns how many were found.
  pub fn revalidate(&self, key: &str) -> usize {
    self
      .inner
      .revalidate_where(Trigger::Invalidate, |k, _| k == key)
  }

  /// Force every entry whose key matches to refetch.
  pub fn revalidate_matching(&self, pred: impl Fn(&str) -> bool) -> usize {
    self
      .inner
      .revalidate_where(Trigger::Invalidate, |k, _| pred(k))
  }

  /// The terminal regained focus.
  pub fn notify_focus(&self) -> usize {
    let count = self
      .inner
      .revalidate_where(Trigger::Focus, |_, slot| slot.revalidate_on_focus);
    info!(entries = count, "Focus regained");
    count
  }

  /// Keys that currently have subscribers, sorted.
  #[cfg(test)]
  pub fn active_keys(&self) -> Vec<String> {
    let slots = self
      .inner
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    let mut keys: Vec<String> = slots.keys().map(|(key, _)| key.clone()).collect();
    keys.sort();
    keys.dedup();
    keys
  }
}

/// Per-entry scheduler: poll timer plus manual refresh.
async fn schedule<T: Clone + Send + Sync + 'static>(
  entry: Arc<Entry<T>>,
  mut settings: watch::Receiver<RefreshSettings>,
  mut manual: ManualRefreshListener,
) {
  loop {
    let period = entry.poll_period(&settings.borrow_and_update());
    let tick = async {
      match period {
        Some(period) => tokio::time::sleep(period).await,
        None => std::future::pending().await,
      }
    };

    tokio::select! {
      _ = tick => {
        entry.revalidate(Trigger::Interval).await;
      }
      count = manual.recv() => match count {
        Some(count) => {
          debug!(key = entry.key(), count, "Manual refresh");
          entry.revalidate(Trigger::Manual).await;
        }
        None => break,
      },
      // Re-evaluate the period; this also restarts the timer
      changed = settings.changed() => {
        if changed.is_err() {
          break;
        }
      }
    }
  }
}

/// A consumer's view of one cache entry.
///
/// Dropping the last subscription of a key removes the entry and stops its
/// polling.
pub struct Subscription<T> {
  handle: Option<Handle<T>>,
  state: ResourceState<T>,
}

struct Handle<T> {
  id: SlotId,
  entry: Arc<Entry<T>>,
  rx: watch::Receiver<ResourceState<T>>,
  cache: Arc<CacheInner>,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
  fn inactive() -> Self {
    Self {
      handle: None,
      state: ResourceState::default(),
    }
  }

  fn active(id: SlotId, entry: Arc<Entry<T>>, cache: Arc<CacheInner>) -> Self {
    let mut rx = entry.subscribe();
    let state = rx.borrow_and_update().clone();
    Self {
      handle: Some(Handle {
        id,
        entry,
        rx,
        cache,
      }),
      state,
    }
  }

  /// Resource key, `None` for an inactive subscription.
  pub fn key(&self) -> Option<&str> {
    self.handle.as_ref().map(|h| h.id.0.as_str())
  }

  #[cfg(test)]
  pub fn is_active(&self) -> bool {
    self.handle.is_some()
  }

  /// State as of the last `poll()` / `changed()`.
  pub fn state(&self) -> &ResourceState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading
  }

  /// Pick up a newer state if there is one.
  ///
  /// Returns `true` if the state changed. Call this in the tick handler.
  pub fn poll(&mut self) -> bool {
    let Some(handle) = &mut self.handle else {
      return false;
    };
    match handle.rx.has_changed() {
      Ok(true) => {
        self.state = handle.rx.borrow_and_update().clone();
        true
      }
      _ => false,
    }
  }

  /// Wait for the next state change. Returns `false` for an inactive
  /// subscription.
  #[cfg(test)]
  pub async fn changed(&mut self) -> bool {
    let Some(handle) = &mut self.handle else {
      return false;
    };
    if handle.rx.changed().await.is_err() {
      return false;
    }
    self.state = handle.rx.borrow_and_update().clone();
    true
  }

  /// Force a refetch. The returned future resolves to the entry's state once
  /// that fetch has been applied; this subscription picks it up on `poll()`.
  ///
  /// The fetch starts immediately, so the future may be dropped.
  pub fn mutate(&self) -> impl Future<Output = ResourceState<T>> + Send + 'static {
    let handle = self
      .handle
      .as_ref()
      .map(|h| (h.entry.revalidate(Trigger::Mutate), h.rx.clone()));
    let fallback = self.state.clone();
    async move {
      match handle {
        Some((done, rx)) => {
          done.await;
          let state = rx.borrow().clone();
          state
        }
        None => fallback,
      }
    }
  }
}

impl<T> Drop for Subscription<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.cache.release(&handle.id);
    }
  }
}
