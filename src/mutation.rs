//! One-shot async actions (deletes) with state polled on tick.
//!
//! The read side goes through the resource cache; writes are fire-once and
//! report back through a `Mutation<T>`:
//!
//! ```ignore
//! let resources = ctx.resources.clone();
//! self.delete.run(async move { resources.delete_batch(&id).await });
//!
//! // In tick
//! if self.delete.poll() {
//!     if self.delete.is_success() {
//!         ctx.cache().revalidate(&ResourceKey::BatchList.path());
//!     }
//! }
//! ```

use std::future::Future;
use tokio::sync::oneshot;

use crate::api::RequestError;

/// The state of a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
  /// Not started, or reset
  Idle,
  /// Request in flight
  Pending,
  Success(T),
  Error(RequestError),
}

/// A single async write.
pub struct Mutation<T> {
  state: MutationState<T>,
  receiver: Option<oneshot::Receiver<Result<T, RequestError>>>,
}

impl<T> Default for Mutation<T> {
  fn default() -> Self {
    Self {
      state: MutationState::Idle,
      receiver: None,
    }
  }
}

impl<T: Send + 'static> Mutation<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> &MutationState<T> {
    &self.state
  }

  pub fn is_pending(&self) -> bool {
    matches!(self.state, MutationState::Pending)
  }

  pub fn is_success(&self) -> bool {
    matches!(self.state, MutationState::Success(_))
  }

  pub fn error(&self) -> Option<&RequestError> {
    match &self.state {
      MutationState::Error(e) => Some(e),
      _ => None,
    }
  }

  /// Start the action. Ignored while another one is pending.
  pub fn run<Fut>(&mut self, future: Fut)
  where
    Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
  {
    if self.is_pending() {
      return;
    }
    let (tx, rx) = oneshot::channel();
    self.receiver = Some(rx);
    self.state = MutationState::Pending;

    tokio::spawn(async move {
      // Receiver may have been dropped with its view
      let _ = tx.send(future.await);
    });
  }

  /// Pick up the result if it has arrived.
  ///
  /// Returns `true` if the state changed. Call this in the tick handler.
  pub fn poll(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };

    let next = match receiver.try_recv() {
      Ok(Ok(value)) => MutationState::Success(value),
      Ok(Err(e)) => MutationState::Error(e),
      Err(oneshot::error::TryRecvError::Empty) => return false,
      Err(oneshot::error::TryRecvError::Closed) => {
        MutationState::Error(RequestError::Network("request was cancelled".to_string()))
      }
    };
    self.state = next;
    self.receiver = None;
    true
  }

  /// Back to idle, e.g. after the result has been shown.
  pub fn reset(&mut self) {
    self.state = MutationState::Idle;
    self.receiver = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_mutation_success() {
    let mut mutation = Mutation::new();
    assert_eq!(mutation.state(), &MutationState::Idle);
    assert!(!mutation.poll());

    mutation.run(async { Ok(()) });
    assert!(mutation.is_pending());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(mutation.poll());
    assert!(mutation.is_success());
    assert!(!mutation.poll());
  }

  #[tokio::test]
  async fn test_mutation_error() {
    let mut mutation: Mutation<()> = Mutation::new();
    mutation.run(async {
      Err(RequestError::Status {
        status: 404,
        message: "Batch not found".into(),
      })
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(mutation.poll());
    assert_eq!(mutation.error().map(|e| e.to_string()).as_deref(), Some("HTTP 404: Batch not found"));

    mutation.reset();
    assert_eq!(mutation.state(), &MutationState::Idle);
  }

  #[tokio::test]
  async fn test_run_while_pending_is_ignored() {
    let mut mutation = Mutation::new();
    mutation.run(async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(1)
    });
    mutation.run(async { Ok(2) });

    tokio::time::sleep(Duration::from_millis(100)).await;
    mutation.poll();
    assert_eq!(mutation.state(), &MutationState::Success(1));
  }
}
