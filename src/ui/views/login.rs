use crossterm::event::KeyEvent;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use crate::context::AppContext;
use crate::ui::components::{InputEvent, KeyResult, TextInput};
use crate::ui::view::{Shortcut, View, ViewAction};

/// API key prompt, shown whenever the session is logged out
pub struct LoginView {
  ctx: AppContext,
  input: TextInput,
  message: Option<String>,
}

impl LoginView {
  pub fn new(ctx: AppContext) -> Self {
    Self {
      ctx,
      input: TextInput::masked(),
      message: None,
    }
  }

  fn submit(&mut self, value: String) -> ViewAction {
    if value.trim().is_empty() {
      self.message = Some("API key is required".to_string());
      return ViewAction::None;
    }

    self.input.clear();
    self.message = None;
    match self.ctx.auth.login(&value) {
      Ok(()) => ViewAction::None,
      // Still logged in for this session
      Err(e) => ViewAction::Notify(format!("Could not save API key: {}", e)),
    }
  }
}

impl View for LoginView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match self.input.handle_key(key) {
      KeyResult::Event(InputEvent::Submitted(value)) => self.submit(value),
      KeyResult::Event(InputEvent::Cancelled) => {
        self.input.clear();
        self.message = None;
        ViewAction::None
      }
      KeyResult::Handled | KeyResult::NotHandled => ViewAction::None,
    }
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let width = 60.min(area.width);
    let height = 8.min(area.height);
    let popup = Rect::new(
      area.x + area.width.saturating_sub(width) / 2,
      area.y + area.height.saturating_sub(height) / 2,
      width,
      height,
    );

    frame.render_widget(Clear, popup);
    let block = Block::default()
      .title(" Sign in ")
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    let rows = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(1), // Backend
        Constraint::Length(1),
        Constraint::Length(1), // Label
        Constraint::Length(1), // Input
        Constraint::Length(1),
        Constraint::Min(0), // Message
      ])
      .split(inner);

    frame.render_widget(
      Paragraph::new(Line::from(vec![
        Span::styled("Backend: ", Style::default().fg(Color::DarkGray)),
        Span::raw(self.ctx.base_url().to_string()),
      ])),
      rows[0],
    );
    frame.render_widget(
      Paragraph::new("API key:").style(Style::default().fg(Color::White)),
      rows[2],
    );
    self
      .input
      .render(frame, rows[3], Style::default().fg(Color::Yellow));

    if let Some(message) = &self.message {
      frame.render_widget(
        Paragraph::new(message.as_str()).style(Style::default().fg(Color::Red)),
        rows[5],
      );
    }
  }

  fn breadcrumb_label(&self) -> String {
    "Login".to_string()
  }

  fn captures_input(&self) -> bool {
    true
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("enter", "sign in").with_priority(10),
      Shortcut::new("esc", "clear").with_priority(20),
      Shortcut::new("ctrl-c", "quit").with_priority(90),
    ]
  }
}
