pub mod components;
pub mod renderfns;
pub mod view;
pub mod views;

use ratatui::prelude::*;
use ratatui::widgets::TableState;

use crate::app::App;
use renderfns::{draw_footer, draw_header, HeaderInfo};

/// Main draw function
pub fn draw(frame: &mut Frame, app: &mut App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Breadcrumb
    ])
    .split(frame.area());

  let policy = app.context().policy.clone();
  let info = HeaderInfo {
    title: app.title(),
    settings: policy.settings(),
    refreshing: policy.is_refreshing(),
    health: app.health(),
    notice: app.notice(),
  };
  draw_header(frame, chunks[0], &info, &app.shortcuts());

  let status = format!("manual refreshes: {} ", policy.manual_trigger_count());
  draw_footer(frame, chunks[2], &app.breadcrumb(), &status);

  if let Some(view) = app.current_view_mut() {
    view.render(frame, chunks[1]);
  }
}

/// Keep a table selection inside `0..len`, selecting the first row when
/// rows appear and clearing it when they go away.
pub fn ensure_valid_selection(state: &mut TableState, len: usize) {
  match state.selected() {
    _ if len == 0 => state.select(None),
    None => state.select(Some(0)),
    Some(idx) if idx >= len => state.select(Some(len - 1)),
    Some(_) => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ensure_valid_selection() {
    let mut state = TableState::default();
    ensure_valid_selection(&mut state, 3);
    assert_eq!(state.selected(), Some(0));

    state.select(Some(7));
    ensure_valid_selection(&mut state, 3);
    assert_eq!(state.selected(), Some(2));

    ensure_valid_selection(&mut state, 0);
    assert_eq!(state.selected(), None);
  }
}
