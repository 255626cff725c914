use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use super::KeyResult;

/// y/n prompt shown as a centered overlay.
#[derive(Debug, Clone, Default)]
pub struct ConfirmPrompt {
  message: Option<String>,
}

impl ConfirmPrompt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.message.is_some()
  }

  pub fn ask(&mut self, message: impl Into<String>) {
    self.message = Some(message.into());
  }

  /// `Event(true)` on confirm, `Event(false)` on decline. Any other key is
  /// swallowed while the prompt is open.
  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<bool> {
    if !self.is_active() {
      return KeyResult::NotHandled;
    }
    match key.code {
      KeyCode::Char('y') | KeyCode::Char('Y') => {
        self.message = None;
        KeyResult::Event(true)
      }
      KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
        self.message = None;
        KeyResult::Event(false)
      }
      _ => KeyResult::Handled,
    }
  }

  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    let Some(message) = &self.message else {
      return;
    };

    let width = (area.width * 60 / 100).clamp(30.min(area.width), 70.min(area.width));
    let height = 5.min(area.height);
    let overlay = Rect::new(
      area.x + (area.width.saturating_sub(width)) / 2,
      area.y + (area.height.saturating_sub(height)) / 2,
      width,
      height,
    );

    frame.render_widget(Clear, overlay);
    let block = Block::default()
      .title(" Confirm ")
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Red));
    let text = vec![
      Line::from(message.as_str()),
      Line::from(vec![
        Span::styled("<y>", Style::default().fg(Color::Cyan)),
        Span::styled(" yes   ", Style::default().fg(Color::DarkGray)),
        Span::styled("<n>", Style::default().fg(Color::Cyan)),
        Span::styled(" no", Style::default().fg(Color::DarkGray)),
      ]),
    ];
    frame.render_widget(
      Paragraph::new(text).block(block).wrap(Wrap { trim: true }),
      overlay,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
  }

  #[test]
  fn test_inactive_prompt_passes_keys() {
    let mut prompt = ConfirmPrompt::new();
    assert_eq!(prompt.handle_key(key('y')), KeyResult::NotHandled);
  }

  #[test]
  fn test_confirm_and_decline() {
    let mut prompt = ConfirmPrompt::new();
    prompt.ask("Delete batch b1?");
    assert!(prompt.is_active());
    assert_eq!(prompt.handle_key(key('j')), KeyResult::Handled);
    assert_eq!(prompt.handle_key(key('y')), KeyResult::Event(true));
    assert!(!prompt.is_active());

    prompt.ask("Delete task t1?");
    assert_eq!(prompt.handle_key(key('n')), KeyResult::Event(false));
    assert!(!prompt.is_active());
  }
}
