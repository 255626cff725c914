use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::api::Task;
use crate::cache::Subscription;
use crate::context::AppContext;
use crate::mutation::Mutation;
use crate::ui::renderfns::{
  format_count, format_duration, format_time, state_note, status_color, truncate,
};
use crate::ui::view::{Shortcut, View, ViewAction};

/// Detail of a single task
pub struct TaskDetailView {
  task_id: String,
  task: Subscription<Task>,
  reload: Mutation<()>,
  status_line: Option<String>,
  scroll: u16,
}

impl TaskDetailView {
  pub fn new(ctx: AppContext, task_id: String) -> Self {
    let task = ctx.resources.task(Some(&task_id));
    Self {
      task_id,
      task,
      reload: Mutation::new(),
      status_line: None,
      scroll: 0,
    }
  }

  /// Refetch the task, bypassing the dedupe window.
  fn start_reload(&mut self) {
    if self.reload.is_pending() {
      return;
    }
    self.status_line = Some("Reloading...".to_string());
    let done = self.task.mutate();
    self.reload.run(async move {
      match done.await.error {
        Some(e) => Err(e),
        None => Ok(()),
      }
    });
  }

  fn lines(task: &Task) -> Vec<Line<'static>> {
    let field = |name: &str, value: String| {
      Line::from(vec![
        Span::styled(format!("{:<12}", name), Style::default().fg(Color::DarkGray)),
        Span::raw(value),
      ])
    };

    let mut lines = vec![
      Line::from(vec![
        Span::styled(format!("{:<12}", "Status"), Style::default().fg(Color::DarkGray)),
        Span::styled(
          task.status.to_string(),
          Style::default().fg(status_color(&task.status)).bold(),
        ),
      ]),
      field("Batch", task.batch_id.clone().unwrap_or_else(|| "-".to_string())),
      field("Created", format_time(task.created_at)),
      field("Started", format_time(task.started_at)),
      field("Completed", format_time(task.completed_at)),
      field(
        "Duration",
        task.duration().map(format_duration).unwrap_or_else(|| "-".to_string()),
      ),
      field(
        "Tokens",
        format!(
          "{} in / {} out",
          format_count(task.tokens.input),
          format_count(task.tokens.output)
        ),
      ),
      field("Cache hit", if task.cache_hit { "yes" } else { "no" }.to_string()),
    ];

    if let Some(error) = &task.error {
      lines.push(Line::from(""));
      lines.push(Line::from(Span::styled(
        "Error",
        Style::default().fg(Color::Red).bold(),
      )));
      lines.extend(error.lines().map(|l| Line::from(l.to_string())));
    }
    lines
  }
}

impl View for TaskDetailView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.scroll = self.scroll.saturating_add(1),
      KeyCode::Char('k') | KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
      KeyCode::Char('r') => self.start_reload(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let note = state_note(self.task.state());
    let title = if note.is_empty() {
      format!(" Task {} ", self.task_id)
    } else {
      format!(" Task {} [{}] ", self.task_id, note)
    };
    let mut block = Block::default()
      .title(title)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));
    if let Some(status_line) = &self.status_line {
      block = block.title_bottom(Line::from(format!(" {} ", status_line)).right_aligned());
    }

    let lines = match self.task.data() {
      Some(task) => Self::lines(task),
      None => vec![Line::from(Span::styled(
        if self.task.is_loading() {
          "Loading task..."
        } else if self.task.state().error().and_then(|e| e.status()) == Some(404) {
          "Task not found."
        } else {
          "Task not available."
        },
        Style::default().fg(Color::DarkGray),
      ))],
    };

    frame.render_widget(
      Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((self.scroll, 0)),
      area,
    );
  }

  fn breadcrumb_label(&self) -> String {
    truncate(&self.task_id, 24)
  }

  fn tick(&mut self) {
    self.task.poll();

    if self.reload.poll() {
      if self.reload.is_success() {
        self.status_line = Some("Reloaded".to_string());
      } else if let Some(e) = self.reload.error() {
        self.status_line = Some(format!("Reload failed: {}", e));
      }
    }
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("j/k", "scroll").with_priority(10),
      Shortcut::new("r", "reload").with_priority(30),
      Shortcut::new("q", "back").with_priority(90),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{json_response, stub_server};
  use crate::config::Config;
  use crate::storage::{self, LocalStorage, MemoryStorage};
  use crossterm::event::KeyModifiers;
  use std::sync::Arc;
  use std::time::Duration;

  async fn tick_until(view: &mut TaskDetailView, done: impl Fn(&TaskDetailView) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
      loop {
        view.tick();
        if done(view) {
          break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
      }
    })
    .await
    .unwrap();
  }

  #[tokio::test]
  async fn test_reload_failure_keeps_task_on_screen() {
    // The environment URL would win over the stub server
    if std::env::var("B9S_API_URL").is_ok() {
      return;
    }
    let task = r#"{"task_id": "t1", "task_status": "COMPLETED", "batch_id": "b1"}"#;
    let (url, _server) = stub_server(vec![
      json_response(200, task),
      json_response(404, r#"{"detail": "Task not found"}"#),
    ])
    .await;
    let store = Arc::new(MemoryStorage::new());
    store.set(storage::API_KEY, "k1").unwrap();
    let ctx = AppContext::bootstrap(Config::default(), store, Some(&url)).unwrap();

    let mut view = TaskDetailView::new(ctx, "t1".to_string());
    tick_until(&mut view, |v| v.task.data().is_some()).await;

    view.handle_key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE));
    assert_eq!(view.status_line.as_deref(), Some("Reloading..."));
    tick_until(&mut view, |v| !v.reload.is_pending()).await;

    assert_eq!(
      view.status_line.as_deref(),
      Some("Reload failed: HTTP 404: Task not found")
    );
    assert_eq!(view.task.data().map(|t| t.id.as_str()), Some("t1"));
    assert_eq!(view.task.state().error().and_then(|e| e.status()), Some(404));
  }
}
