use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::KeyResult;

/// What a finished input produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
  /// Enter pressed, here's the value
  Submitted(String),
  /// Escape pressed
  Cancelled,
}

/// Single-line text input. The cursor is a char index.
#[derive(Debug, Clone, Default)]
pub struct TextInput {
  buffer: String,
  cursor: usize,
  /// Render every char as a bullet (API keys)
  masked: bool,
}

impl TextInput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn masked() -> Self {
    Self {
      masked: true,
      ..Self::default()
    }
  }

  pub fn value(&self) -> &str {
    &self.buffer
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
    self.cursor = 0;
  }

  fn len(&self) -> usize {
    self.buffer.chars().count()
  }

  fn byte_index(&self, char_idx: usize) -> usize {
    self
      .buffer
      .char_indices()
      .nth(char_idx)
      .map(|(i, _)| i)
      .unwrap_or(self.buffer.len())
  }

  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<InputEvent> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
      KeyCode::Esc => return KeyResult::Event(InputEvent::Cancelled),
      KeyCode::Enter => return KeyResult::Event(InputEvent::Submitted(self.buffer.clone())),
      KeyCode::Backspace if self.cursor > 0 => {
        self.cursor -= 1;
        let idx = self.byte_index(self.cursor);
        self.buffer.remove(idx);
      }
      KeyCode::Delete if self.cursor < self.len() => {
        let idx = self.byte_index(self.cursor);
        self.buffer.remove(idx);
      }
      KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
      KeyCode::Right => self.cursor = (self.cursor + 1).min(self.len()),
      KeyCode::Home => self.cursor = 0,
      KeyCode::End => self.cursor = self.len(),
      KeyCode::Char('a') if ctrl => self.cursor = 0,
      KeyCode::Char('e') if ctrl => self.cursor = self.len(),
      KeyCode::Char('u') if ctrl => {
        let idx = self.byte_index(self.cursor);
        self.buffer.replace_range(..idx, "");
        self.cursor = 0;
      }
      KeyCode::Char(_) if ctrl => return KeyResult::NotHandled,
      KeyCode::Char(c) => {
        let idx = self.byte_index(self.cursor);
        self.buffer.insert(idx, c);
        self.cursor += 1;
      }
      KeyCode::Backspace | KeyCode::Delete => {}
      _ => return KeyResult::NotHandled,
    }
    KeyResult::Handled
  }

  /// Text as it should appear on screen.
  pub fn display(&self) -> String {
    if self.masked {
      "•".repeat(self.len())
    } else {
      self.buffer.clone()
    }
  }

  /// Render on one line and place the terminal cursor.
  pub fn render(&self, frame: &mut Frame, area: Rect, style: Style) {
    frame.render_widget(Paragraph::new(self.display()).style(style), area);
    let x = area.x + (self.cursor as u16).min(area.width.saturating_sub(1));
    frame.set_cursor_position((x, area.y));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn ctrl_key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::CONTROL)
  }

  fn type_str(input: &mut TextInput, s: &str) {
    for c in s.chars() {
      input.handle_key(key(KeyCode::Char(c)));
    }
  }

  #[test]
  fn test_submit_and_cancel() {
    let mut input = TextInput::new();
    type_str(&mut input, "sk-123");
    assert_eq!(
      input.handle_key(key(KeyCode::Enter)),
      KeyResult::Event(InputEvent::Submitted("sk-123".to_string()))
    );
    assert_eq!(
      input.handle_key(key(KeyCode::Esc)),
      KeyResult::Event(InputEvent::Cancelled)
    );
  }

  #[test]
  fn test_editing_multibyte() {
    let mut input = TextInput::new();
    type_str(&mut input, "añc");
    input.handle_key(key(KeyCode::Left));
    input.handle_key(key(KeyCode::Backspace));
    assert_eq!(input.value(), "ac");
    input.handle_key(key(KeyCode::Char('é')));
    assert_eq!(input.value(), "aéc");
    input.handle_key(key(KeyCode::End));
    input.handle_key(key(KeyCode::Delete));
    assert_eq!(input.value(), "aéc");
  }

  #[test]
  fn test_ctrl_u_clears_before_cursor() {
    let mut input = TextInput::new();
    type_str(&mut input, "hello world");
    for _ in 0..5 {
      input.handle_key(key(KeyCode::Left));
    }
    input.handle_key(ctrl_key(KeyCode::Char('u')));
    assert_eq!(input.value(), "world");
  }

  #[test]
  fn test_masked_display() {
    let mut input = TextInput::masked();
    type_str(&mut input, "abc");
    assert_eq!(input.display(), "•••");
    assert_eq!(input.value(), "abc");
  }

  #[test]
  fn test_unhandled_keys() {
    let mut input = TextInput::new();
    assert_eq!(input.handle_key(key(KeyCode::Tab)), KeyResult::NotHandled);
    assert_eq!(
      input.handle_key(ctrl_key(KeyCode::Char('c'))),
      KeyResult::NotHandled
    );
  }
}
