use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Sparkline, Table, TableState};
use tracing::debug;

use crate::api::{Batch, Status, StatsInterval, StatsRange, Task, TaskList, UsageStats};
use crate::cache::Subscription;
use crate::context::AppContext;
use crate::mutation::{Mutation, MutationState};
use crate::ui::components::{ConfirmPrompt, KeyResult};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{
  format_count, format_duration, format_time, state_note, status_color, truncate,
};
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::views::TaskDetailView;

/// Next task filter in the cycle: all, then each status in turn
fn next_filter(current: Option<Status>) -> Option<Status> {
  match current {
    None => Some(Status::ALL[0]),
    Some(status) => Status::ALL
      .iter()
      .position(|s| *s == status)
      .and_then(|idx| Status::ALL.get(idx + 1).copied()),
  }
}

/// One batch: progress, usage over time, and its tasks
pub struct BatchDetailView {
  ctx: AppContext,
  batch_id: String,
  batch: Subscription<Batch>,
  tasks: Subscription<TaskList>,
  usage: Subscription<UsageStats>,
  filter: Option<Status>,
  range: StatsRange,
  interval: StatsInterval,
  table_state: TableState,
  confirm: ConfirmPrompt,
  delete: Mutation<()>,
  target: Option<String>,
  status_line: Option<String>,
}

impl BatchDetailView {
  pub fn new(ctx: AppContext, batch_id: String) -> Self {
    let range = StatsRange::default();
    let interval = range.default_interval();
    let batch = ctx.resources.batch(&batch_id);
    let tasks = ctx.resources.batch_tasks(&batch_id, None);
    let usage = ctx
      .resources
      .batch_stats(&batch_id, range, interval);

    Self {
      ctx,
      batch_id,
      batch,
      tasks,
      usage,
      filter: None,
      range,
      interval,
      table_state: TableState::default(),
      confirm: ConfirmPrompt::new(),
      delete: Mutation::new(),
      target: None,
      status_line: None,
    }
  }

  fn tasks(&self) -> &[Task] {
    self
      .tasks
      .data()
      .map(|list| list.tasks.as_slice())
      .unwrap_or(&[])
  }

  fn selected(&self) -> Option<&Task> {
    self
      .table_state
      .selected()
      .and_then(|idx| self.tasks().get(idx))
  }

  fn cycle_filter(&mut self) {
    self.filter = next_filter(self.filter);
    // Replacing the subscription releases the old key
    self.tasks = self.ctx.resources.batch_tasks(&self.batch_id, self.filter);
    self.table_state.select(None);
    debug!(key = ?self.tasks.key(), "Task filter changed");
  }

  fn cycle_range(&mut self) {
    self.range = self.range.next();
    self.interval = self.range.default_interval();
    self.resubscribe_usage();
  }

  fn cycle_interval(&mut self) {
    self.interval = self.interval.next();
    self.resubscribe_usage();
  }

  fn resubscribe_usage(&mut self) {
    self.usage = self
      .ctx
      .resources
      .batch_stats(&self.batch_id, self.range, self.interval);
    debug!(key = ?self.usage.key(), "Usage window changed");
  }

  fn start_delete(&mut self, confirmed: bool) {
    let Some(id) = self.target.clone() else {
      return;
    };
    if !confirmed {
      self.target = None;
      return;
    }
    let resources = self.ctx.resources.clone();
    self.status_line = Some(format!("Deleting task {}...", id));
    self
      .delete
      .run(async move { resources.delete_task(&id).await });
  }

  fn render_summary(&self, frame: &mut Frame, area: Rect) {
    let note = state_note(self.batch.state());
    let title = if note.is_empty() {
      format!(" Batch {} ", self.batch_id)
    } else {
      format!(" Batch {} [{}] ", self.batch_id, note)
    };
    let block = Block::default()
      .title(title)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));

    let Some(batch) = self.batch.data() else {
      frame.render_widget(block, area);
      return;
    };

    let inner = block.inner(area);
    frame.render_widget(block, area);
    let rows = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
      ])
      .split(inner);

    let label = |s: &str| Span::styled(format!("{}: ", s), Style::default().fg(Color::DarkGray));
    frame.render_widget(
      Paragraph::new(Line::from(vec![
        label("Status"),
        Span::styled(
          batch.status.to_string(),
          Style::default().fg(status_color(&batch.status)).bold(),
        ),
        Span::raw("   "),
        label("Model"),
        Span::raw(batch.model.clone().unwrap_or_else(|| "-".to_string())),
        Span::raw("   "),
        label("Created"),
        Span::raw(format_time(batch.created_at)),
        Span::raw("   "),
        label("Completed"),
        Span::raw(format_time(batch.completed_at)),
      ])),
      rows[0],
    );
    frame.render_widget(
      Paragraph::new(Line::from(vec![
        label("Tasks"),
        Span::raw(format_count(batch.total_tasks)),
        Span::raw("   "),
        label("Pending"),
        Span::raw(format_count(batch.pending_tasks)),
        Span::raw("   "),
        label("Processing"),
        Span::raw(format_count(batch.processing_tasks)),
        Span::raw("   "),
        label("Completed"),
        Span::styled(format_count(batch.completed_tasks), Style::default().fg(Color::Green)),
        Span::raw("   "),
        label("Failed"),
        Span::styled(format_count(batch.failed_tasks), Style::default().fg(Color::Red)),
        Span::raw("   "),
        label("Cached"),
        Span::raw(format_count(batch.cached_tasks)),
        Span::raw("   "),
        label("Tokens"),
        Span::raw(format_count(batch.tokens.total())),
      ])),
      rows[1],
    );

    let progress = batch.progress();
    frame.render_widget(
      Gauge::default()
        .gauge_style(Style::default().fg(if batch.status.is(Status::Failed) {
          Color::Red
        } else if batch.failed_tasks > 0 {
          Color::Yellow
        } else {
          Color::Green
        }))
        .ratio((progress / 100.0).clamp(0.0, 1.0))
        .label(format!("{:.1}%", progress)),
      rows[2],
    );
  }

  fn render_usage(&self, frame: &mut Frame, area: Rect) {
    let note = state_note(self.usage.state());
    let mut title = format!(
      " Usage {} / {} ",
      self.range.as_str(),
      self.interval.as_str()
    );
    if let Some(summary) = self.usage.data().map(|u| &u.summary) {
      title.push_str(&format!(
        "| {} tasks, {:.0}% cached",
        format_count(summary.total_tasks),
        summary.cache_hit_rate()
      ));
      if let Some(avg) = summary.avg_duration_ms {
        title.push_str(&format!(
          ", avg {}",
          format_duration(chrono::Duration::milliseconds(avg as i64))
        ));
      }
      title.push(' ');
    }
    if !note.is_empty() {
      title.push_str(&format!("[{}] ", note));
    }

    let block = Block::default()
      .title(title)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::DarkGray));

    let points: Vec<u64> = self
      .usage
      .data()
      .map(|u| u.points.iter().map(|p| p.total_tasks).collect())
      .unwrap_or_default();

    frame.render_widget(
      Sparkline::default()
        .block(block)
        .data(&points)
        .style(Style::default().fg(Color::Cyan)),
      area,
    );
  }

  fn render_tasks(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.tasks().len();
    ensure_valid_selection(&mut self.table_state, len);

    let filter = self.filter.map(|s| s.as_str()).unwrap_or("ALL");
    let total = self.tasks.data().map(|l| l.total).unwrap_or(0);
    let note = state_note(self.tasks.state());
    let title = if note.is_empty() {
      format!(" Tasks [{}] ({}) ", filter, total)
    } else {
      format!(" Tasks [{}] ({}) [{}] ", filter, total, note)
    };

    let mut block = Block::default()
      .title(title)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));
    if let Some(status_line) = &self.status_line {
      block = block.title_bottom(Line::from(format!(" {} ", status_line)).right_aligned());
    }

    if len == 0 {
      let content = if self.tasks.is_loading() {
        "Loading tasks..."
      } else if self.tasks.state().error().is_some() {
        "Failed to load tasks."
      } else {
        "No tasks match this filter."
      };
      frame.render_widget(
        Paragraph::new(content)
          .block(block)
          .style(Style::default().fg(Color::DarkGray)),
        area,
      );
      return;
    }

    let header = Row::new(["ID", "STATUS", "DURATION", "TOKENS", "CACHE", "ERROR"])
      .style(Style::default().fg(Color::Yellow).bold());
    let rows: Vec<Row> = self
      .tasks()
      .iter()
      .map(|task| {
        Row::new(vec![
          Cell::from(truncate(&task.id, 24)).style(Style::default().fg(Color::Cyan)),
          Cell::from(task.status.to_string()).style(Style::default().fg(status_color(&task.status))),
          Cell::from(task.duration().map(format_duration).unwrap_or_else(|| "-".to_string())),
          Cell::from(format_count(task.tokens.total())),
          Cell::from(if task.cache_hit { "hit" } else { "" }),
          Cell::from(truncate(task.error.as_deref().unwrap_or(""), 60))
            .style(Style::default().fg(Color::Red)),
        ])
      })
      .collect();

    let table = Table::new(
      rows,
      [
        Constraint::Length(25),
        Constraint::Length(12),
        Constraint::Length(9),
        Constraint::Length(8),
        Constraint::Length(6),
        Constraint::Min(10),
      ],
    )
    .header(header)
    .block(block)
    .row_highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

    frame.render_stateful_widget(table, area, &mut self.table_state);
  }
}

impl View for BatchDetailView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match self.confirm.handle_key(key) {
      KeyResult::Event(confirmed) => {
        self.start_delete(confirmed);
        return ViewAction::None;
      }
      KeyResult::Handled => return ViewAction::None,
      KeyResult::NotHandled => {}
    }

    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.table_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.table_state.select_previous(),
      KeyCode::Char('g') | KeyCode::Home => self.table_state.select_first(),
      KeyCode::Char('G') | KeyCode::End => self.table_state.select_last(),
      KeyCode::Char('f') => self.cycle_filter(),
      KeyCode::Char('t') => self.cycle_range(),
      KeyCode::Char('b') => self.cycle_interval(),
      KeyCode::Char('r') => {
        self.ctx.resources.invalidate_batch(&self.batch_id);
      }
      KeyCode::Char('d') => {
        if self.delete.is_pending() {
          return ViewAction::Notify("A delete is already running".to_string());
        }
        if let Some(id) = self.selected().map(|t| t.id.clone()) {
          self.confirm.ask(format!("Delete task {}?", id));
          self.target = Some(id);
        }
      }
      KeyCode::Enter => {
        if let Some(task) = self.selected() {
          return ViewAction::Push(Box::new(TaskDetailView::new(
            self.ctx.clone(),
            task.id.clone(),
          )));
        }
      }
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([
        Constraint::Length(5),
        Constraint::Length(6),
        Constraint::Min(3),
      ])
      .split(area);

    self.render_summary(frame, chunks[0]);
    self.render_usage(frame, chunks[1]);
    self.render_tasks(frame, chunks[2]);
    self.confirm.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    truncate(&self.batch_id, 24)
  }

  fn tick(&mut self) {
    self.batch.poll();
    self.tasks.poll();
    self.usage.poll();

    if self.delete.poll() {
      let id = self.target.take().unwrap_or_default();
      match self.delete.state() {
        MutationState::Success(()) => {
          self.status_line = Some(format!("Deleted task {}", id));
          self.ctx.resources.invalidate_batch(&self.batch_id);
        }
        MutationState::Error(e) => {
          self.status_line = Some(format!("Delete failed: {}", e));
        }
        MutationState::Idle | MutationState::Pending => {}
      }
      self.delete.reset();
    }
  }

  fn captures_input(&self) -> bool {
    self.confirm.is_active()
  }

  fn shortcuts(&self) -> Vec<Shortcut> {
    vec![
      Shortcut::new("enter", "task").with_priority(10),
      Shortcut::new("f", "filter").with_priority(20),
      Shortcut::new("t", "range").with_priority(30),
      Shortcut::new("b", "bucket").with_priority(31),
      Shortcut::new("d", "delete").with_priority(40),
      Shortcut::new("q", "back").with_priority(90),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::storage::MemoryStorage;
  use crossterm::event::KeyModifiers;
  use std::sync::Arc;

  fn view() -> BatchDetailView {
    let ctx = AppContext::bootstrap(Config::default(), Arc::new(MemoryStorage::new()), None).unwrap();
    BatchDetailView::new(ctx, "b1".to_string())
  }

  fn press(view: &mut BatchDetailView, c: char) {
    view.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
  }

  #[tokio::test]
  async fn test_bucket_and_range_keys_resubscribe_usage() {
    let mut view = view();
    assert_eq!(
      view.usage.key(),
      Some("/api/v1/batches/b1/stats?time_range=24h&interval=1h")
    );

    press(&mut view, 'b');
    assert_eq!(
      view.usage.key(),
      Some("/api/v1/batches/b1/stats?time_range=24h&interval=3h")
    );

    // A new range starts from its own default bucket
    press(&mut view, 't');
    assert_eq!(
      view.usage.key(),
      Some("/api/v1/batches/b1/stats?time_range=2d&interval=3h")
    );
    press(&mut view, 'b');
    assert_eq!(
      view.usage.key(),
      Some("/api/v1/batches/b1/stats?time_range=2d&interval=6h")
    );
  }

  #[test]
  fn test_filter_cycle() {
    let mut filter = None;
    let mut seen = Vec::new();
    for _ in 0..5 {
      filter = next_filter(filter);
      seen.push(filter);
    }
    assert_eq!(
      seen,
      [
        Some(Status::Pending),
        Some(Status::Processing),
        Some(Status::Completed),
        Some(Status::Failed),
        None,
      ]
    );
  }
}
