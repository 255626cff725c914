mod confirm;
mod input;

pub use confirm::ConfirmPrompt;
pub use input::{InputEvent, TextInput};

/// How a component dealt with a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResult<T> {
  /// Consumed, nothing for the parent to do
  Handled,
  /// Consumed, with an event for the parent
  Event(T),
  /// Not consumed, parent should try next handler
  NotHandled,
}
