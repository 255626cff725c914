//! Bearer credential and the authenticated / logged-out state machine.
//!
//! Every credential gets a generation number when it is installed. A 401
//! invalidates a specific generation, so a burst of concurrent 401s for the
//! same key clears storage and flips the state exactly once, and a stale 401
//! arriving after a fresh login is ignored.

use color_eyre::Result;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::storage::{self, LocalStorage};

/// Authentication state observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
  Authenticated,
  LoggedOut,
}

/// A credential snapshot taken for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
  pub api_key: String,
  pub generation: u64,
}

impl Credential {
  pub fn bearer(&self) -> String {
    format!("Bearer {}", self.api_key)
  }
}

struct Slot {
  credential: Option<Credential>,
  next_generation: u64,
}

/// Shared auth session. Cheap to clone.
#[derive(Clone)]
pub struct AuthSession {
  slot: Arc<Mutex<Slot>>,
  state: Arc<watch::Sender<AuthState>>,
  storage: Arc<dyn LocalStorage>,
}

impl AuthSession {
  /// Create a session, starting authenticated if an initial key is known.
  pub fn new(storage: Arc<dyn LocalStorage>, initial_key: Option<String>) -> Self {
    let credential = initial_key.map(|api_key| Credential {
      api_key,
      generation: 1,
    });
    let state = if credential.is_some() {
      AuthState::Authenticated
    } else {
      AuthState::LoggedOut
    };
    let (tx, _rx) = watch::channel(state);

    Self {
      slot: Arc::new(Mutex::new(Slot {
        credential,
        next_generation: 2,
      })),
      state: Arc::new(tx),
      storage,
    }
  }

  /// Current credential, if any.
  pub fn credential(&self) -> Option<Credential> {
    self
      .slot
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .credential
      .clone()
  }

  pub fn state(&self) -> AuthState {
    *self.state.borrow()
  }

  pub fn is_authenticated(&self) -> bool {
    self.state() == AuthState::Authenticated
  }

  pub fn subscribe(&self) -> watch::Receiver<AuthState> {
    self.state.subscribe()
  }

  /// Install a new API key and persist it.
  ///
  /// The in-memory state switches even if persisting fails; the error is
  /// returned so the caller can report it.
  pub fn login(&self, api_key: &str) -> Result<()> {
    let api_key = api_key.trim().to_string();
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    let generation = slot.next_generation;
    slot.next_generation += 1;
    slot.credential = Some(Credential {
      api_key: api_key.clone(),
      generation,
    });
    self.state.send_replace(AuthState::Authenticated);
    info!(generation, "Logged in");

    self.storage.set(storage::API_KEY, &api_key)
  }

  /// Explicit user logout.
  pub fn logout(&self) -> Result<()> {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.credential.take().is_some() {
      info!("Logged out");
    }
    self.state.send_replace(AuthState::LoggedOut);
    self.storage.remove(storage::API_KEY)
  }

  /// Drop the credential of `generation` after the backend rejected it.
  ///
  /// Returns true only for the call that actually performed the logout.
  /// The slot stays locked until storage and state agree, so a concurrent
  /// login is never undone.
  pub fn invalidate(&self, generation: u64) -> bool {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    match &slot.credential {
      Some(c) if c.generation == generation => slot.credential = None,
      _ => return false,
    }

    warn!(generation, "API key rejected by backend, logging out");
    if let Err(e) = self.storage.remove(storage::API_KEY) {
      warn!(error = %e, "Failed to clear stored API key");
    }
    self.state.send_replace(AuthState::LoggedOut);
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStorage;

  fn session_with_key(key: &str) -> (AuthSession, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(storage::API_KEY, key).unwrap();
    let session = AuthSession::new(storage.clone(), Some(key.to_string()));
    (session, storage)
  }

  #[test]
  fn test_initial_state() {
    let storage = Arc::new(MemoryStorage::new());
    let session = AuthSession::new(storage, None);
    assert_eq!(session.state(), AuthState::LoggedOut);
    assert!(session.credential().is_none());

    let (session, _) = session_with_key("k1");
    assert!(session.is_authenticated());
    assert_eq!(session.credential().unwrap().bearer(), "Bearer k1");
  }

  #[test]
  fn test_login_persists_and_bumps_generation() {
    let storage = Arc::new(MemoryStorage::new());
    let session = AuthSession::new(storage.clone(), None);

    session.login("  first ").unwrap();
    let first = session.credential().unwrap();
    assert_eq!(first.api_key, "first");
    assert_eq!(
      storage.get(storage::API_KEY).unwrap().as_deref(),
      Some("first")
    );

    session.login("second").unwrap();
    let second = session.credential().unwrap();
    assert!(second.generation > first.generation);
  }

  #[test]
  fn test_invalidate_only_once() {
    let (session, storage) = session_with_key("k1");
    let generation = session.credential().unwrap().generation;

    assert!(session.invalidate(generation));
    assert!(!session.invalidate(generation));
    assert_eq!(session.state(), AuthState::LoggedOut);
    assert_eq!(storage.get(storage::API_KEY).unwrap(), None);
  }

  #[test]
  fn test_stale_invalidate_after_relogin_is_ignored() {
    let (session, storage) = session_with_key("old");
    let stale = session.credential().unwrap().generation;

    session.login("new").unwrap();
    assert!(!session.invalidate(stale));
    assert!(session.is_authenticated());
    assert_eq!(storage.get(storage::API_KEY).unwrap().as_deref(), Some("new"));
  }

  #[test]
  fn test_concurrent_invalidate_logs_out_once() {
    let (session, _) = session_with_key("k1");
    let generation = session.credential().unwrap().generation;
    let mut rx = session.subscribe();
    rx.mark_unchanged();

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let session = session.clone();
        std::thread::spawn(move || session.invalidate(generation))
      })
      .collect();
    let winners = handles
      .into_iter()
      .map(|h| h.join().unwrap())
      .filter(|won| *won)
      .count();

    assert_eq!(winners, 1);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), AuthState::LoggedOut);
  }

  #[test]
  fn test_invalidate_racing_login_stays_consistent() {
    for _ in 0..200 {
      let (session, storage) = session_with_key("old");
      let stale = session.credential().unwrap().generation;

      let invalidator = {
        let session = session.clone();
        std::thread::spawn(move || session.invalidate(stale))
      };
      let login = {
        let session = session.clone();
        std::thread::spawn(move || session.login("new").unwrap())
      };
      invalidator.join().unwrap();
      login.join().unwrap();

      // Whichever order won, a fresh login always survives
      assert!(session.is_authenticated());
      assert_eq!(session.credential().unwrap().api_key, "new");
      assert_eq!(storage.get(storage::API_KEY).unwrap().as_deref(), Some("new"));
    }
  }

  #[test]
  fn test_logout_clears_storage() {
    let (session, storage) = session_with_key("k1");
    session.logout().unwrap();
    assert!(!session.is_authenticated());
    assert!(session.credential().is_none());
    assert_eq!(storage.get(storage::API_KEY).unwrap(), None);
  }
}
