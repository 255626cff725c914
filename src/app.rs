use color_eyre::Result;
use crossterm::event::{DisableFocusChange, EnableFocusChange, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::Health;
use crate::auth::AuthState;
use crate::cache::Subscription;
use crate::context::AppContext;
use crate::event::{Event, EventHandler};
use crate::ui;
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::views::{BatchListView, LoginView};

const TICK_RATE: Duration = Duration::from_millis(250);
const NOTICE_TTL: Duration = Duration::from_secs(3);

/// Main application state
pub struct App {
  ctx: AppContext,
  title: String,

  /// Navigation stack - root is always at index 0
  stack: Vec<Box<dyn View>>,

  auth_rx: watch::Receiver<AuthState>,

  /// Header health indicator, polled for as long as the app runs
  health: Subscription<Health>,

  /// Transient header message and when it expires
  notice: Option<(String, Instant)>,

  should_quit: bool,
}

impl App {
  pub fn new(ctx: AppContext) -> Self {
    let mut auth_rx = ctx.auth.subscribe();
    let state = *auth_rx.borrow_and_update();
    let health = ctx.resources.health();
    let title = ctx.title();

    Self {
      stack: vec![root_view(&ctx, state)],
      ctx,
      title,
      auth_rx,
      health,
      notice: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableFocusChange)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = self.event_loop(&mut terminal).await;

    // Cleanup terminal, even when the loop failed
    stdout().execute(DisableFocusChange)?;
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>) -> Result<()> {
    let mut events = EventHandler::new(TICK_RATE);

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }
    Ok(())
  }

  pub fn context(&self) -> &AppContext {
    &self.ctx
  }

  pub fn title(&self) -> &str {
    &self.title
  }

  pub fn health(&self) -> Option<&Health> {
    self.health.data()
  }

  pub fn notice(&self) -> Option<&str> {
    self.notice.as_ref().map(|(message, _)| message.as_str())
  }

  pub fn current_view_mut(&mut self) -> Option<&mut Box<dyn View>> {
    self.stack.last_mut()
  }

  pub fn breadcrumb(&self) -> Vec<String> {
    self.stack.iter().map(|v| v.breadcrumb_label()).collect()
  }

  /// Current view's shortcuts followed by the global ones
  pub fn shortcuts(&self) -> Vec<Shortcut> {
    let mut shortcuts = self
      .stack
      .last()
      .map(|v| v.shortcuts())
      .unwrap_or_default();
    if self.ctx.auth.is_authenticated() {
      shortcuts.extend([
        Shortcut::new("R", "refresh all").with_priority(50),
        Shortcut::new("a", "auto").with_priority(60),
        Shortcut::new("i", "interval").with_priority(61),
        Shortcut::new("L", "logout").with_priority(80),
      ]);
    }
    shortcuts
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => self.tick(),
      Event::FocusGained => {
        let count = self.ctx.cache().notify_focus();
        info!(count, "Terminal focused, revalidating");
      }
      Event::Resize => {} // Redrawn on the next loop iteration
    }
  }

  fn notify(&mut self, message: impl Into<String>) {
    self.notice = Some((message.into(), Instant::now() + NOTICE_TTL));
  }

  fn tick(&mut self) {
    if self.auth_rx.has_changed().unwrap_or(false) {
      let state = *self.auth_rx.borrow_and_update();
      info!(?state, "Auth state changed, resetting views");
      if state == AuthState::LoggedOut {
        self.notify("Signed out");
      }
      // Drop the old views first so their keys are released
      self.stack.clear();
      self.stack.push(root_view(&self.ctx, state));
    }

    self.health.poll();
    if let Some(view) = self.stack.last_mut() {
      view.tick();
    }

    if self
      .notice
      .as_ref()
      .is_some_and(|(_, until)| Instant::now() >= *until)
    {
      self.notice = None;
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    let capturing = self.stack.last().is_some_and(|v| v.captures_input());
    if !capturing && self.ctx.auth.is_authenticated() && self.handle_global_key(key) {
      return;
    }

    let action = match self.stack.last_mut() {
      Some(view) => view.handle_key(key),
      None => ViewAction::None,
    };
    self.apply(action);
  }

  /// Hotkeys that work in every view. Returns true if the key was used.
  fn handle_global_key(&mut self, key: KeyEvent) -> bool {
    let policy = self.ctx.policy.clone();
    match key.code {
      KeyCode::Char('R') => {
        let count = policy.trigger_manual_refresh();
        self.notify(format!("Refreshing everything (#{})", count));
      }
      KeyCode::Char('a') => {
        let enabled = !policy.settings().auto_refresh;
        match policy.set_auto_refresh(enabled) {
          Ok(()) => self.notify(if enabled {
            "Auto-refresh on"
          } else {
            "Auto-refresh paused"
          }),
          Err(e) => {
            warn!(error = %e, "Failed to persist auto-refresh");
            self.notify(format!("Auto-refresh changed but not saved: {}", e));
          }
        }
      }
      KeyCode::Char('i') => {
        let interval = policy.settings().interval.next();
        match policy.set_interval(interval) {
          Ok(()) => self.notify(format!("Refresh interval: {}", interval)),
          Err(e) => {
            warn!(error = %e, "Failed to persist refresh interval");
            self.notify(format!("Interval changed but not saved: {}", e));
          }
        }
      }
      KeyCode::Char('L') => {
        if let Err(e) = self.ctx.auth.logout() {
          warn!(error = %e, "Failed to clear stored API key");
        }
      }
      _ => return false,
    }
    true
  }

  fn apply(&mut self, action: ViewAction) {
    match action {
      ViewAction::None => {}
      ViewAction::Push(view) => self.stack.push(view),
      ViewAction::Pop => {
        if self.stack.len() > 1 {
          self.stack.pop();
        } else {
          self.should_quit = true;
        }
      }
      ViewAction::Notify(message) => self.notify(message),
    }
  }
}

fn root_view(ctx: &AppContext, state: AuthState) -> Box<dyn View> {
  match state {
    AuthState::Authenticated => Box::new(BatchListView::new(ctx.clone())),
    AuthState::LoggedOut => Box::new(LoginView::new(ctx.clone())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::refresh::RefreshInterval;
  use crate::storage::MemoryStorage;
  use std::sync::Arc;

  fn key(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
  }

  fn app() -> App {
    let ctx = AppContext::bootstrap(Config::default(), Arc::new(MemoryStorage::new()), None).unwrap();
    ctx.auth.logout().unwrap();
    App::new(ctx)
  }

  fn type_str(app: &mut App, s: &str) {
    for c in s.chars() {
      app.handle_key(key(c));
    }
  }

  #[tokio::test]
  async fn test_login_swaps_root_view() {
    let mut app = app();
    app.tick();
    assert_eq!(app.breadcrumb(), ["Login"]);

    type_str(&mut app, "sk-1");
    app.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
    app.tick();
    assert_eq!(app.breadcrumb(), ["Batches"]);
  }

  #[tokio::test]
  async fn test_logout_returns_to_login() {
    let mut app = app();
    app.ctx.auth.login("sk-1").unwrap();
    app.tick();
    assert_eq!(app.breadcrumb(), ["Batches"]);

    app.handle_key(key('L'));
    app.tick();
    assert_eq!(app.breadcrumb(), ["Login"]);
    assert_eq!(app.notice(), Some("Signed out"));
  }

  #[tokio::test]
  async fn test_global_refresh_keys() {
    let mut app = app();
    app.ctx.auth.login("sk-1").unwrap();
    app.tick();

    app.handle_key(key('R'));
    app.handle_key(key('R'));
    assert_eq!(app.ctx.policy.manual_trigger_count(), 2);

    let before = app.ctx.policy.settings();
    app.handle_key(key('a'));
    assert_eq!(app.ctx.policy.settings().auto_refresh, !before.auto_refresh);

    app.handle_key(key('i'));
    assert_eq!(app.ctx.policy.settings().interval, before.interval.next());
  }

  #[tokio::test]
  async fn test_hotkeys_go_to_login_input() {
    let mut app = app();
    app.tick();
    type_str(&mut app, "Ra");
    assert_eq!(app.ctx.policy.manual_trigger_count(), 0);
    assert_eq!(app.ctx.policy.settings().interval, RefreshInterval::default());
  }

  #[tokio::test]
  async fn test_quit_on_root_pop() {
    let mut app = app();
    app.ctx.auth.login("sk-1").unwrap();
    app.tick();
    app.handle_key(key('q'));
    assert!(app.should_quit);
  }
}
