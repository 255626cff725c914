use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState};

use crate::api::{Batch, BatchList, ReportedStatus, ResourceKey, Status, TaskStats};
use crate::cache::Subscription;
use crate::context::AppContext;
use crate::mutation::{Mutation, MutationState};
use crate::ui::components::{ConfirmPrompt, KeyResult};
use crate::ui::ensure_valid_selection;
use crate::ui::renderfns::{format_count, format_time, state_note, status_color, truncate};
use crate::ui::view::{Shortcut, View, ViewAction};
use crate::ui::views::BatchDetailView;

/// Root view: every batch plus the global task counters
pub struct BatchListView {
  ctx: AppContext,
  batches: Subscription<BatchList>,
  stats: Subscription<TaskStats>,
  table_state: TableState,
  confirm: ConfirmPrompt,
  delete: Mutation<()>,
  /// Batch the confirm prompt or the delete request is about
  target: Option<String>,
  status_line: Option<String>,
}

impl BatchListView {
  pub fn new(ctx: AppContext) -> Self {
    let batches = ctx.resources.batch_list();
    let stats = ctx.resources.task_stats();
    Self {
      ctx,
      batches,
      stats,
      table_state: TableState::default(),
      confirm: ConfirmPrompt::new(),
      delete: Mutation::new(),
      target: None,
      status_line: None,
    }
  }

  fn batches(&self) -> &[Batch] {
    self
      .batches
      .data()
      .map(|list| list.batches.as_slice())
      .unwrap_or(&[])
  }

  fn selected(&self) -> Option<&Batch> {
    self
      .table_state
      .selected()
      .and_then(|idx| self.batches().get(idx))
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
    self.status_line = Some(format!("Deleting {}...", id));
    self
      .delete
      .run(async move { resources.delete_batch(&id).await });
  }

  fn render_stats(&self, frame: &mut Frame, area: Rect) {
    let block = Block::default()
      .title(" Tasks ")
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::DarkGray));

    let Some(stats) = self.stats.data() else {
      let note = state_note(self.stats.state());
      frame.render_widget(
        Paragraph::new(note)
          .block(block)
          .style(Style::default().fg(Color::DarkGray)),
        area,
      );
      return;
    };

    let mut spans = vec![
      Span::styled("total ", Style::default().fg(Color::DarkGray)),
      Span::styled(
        format_count(stats.total_tasks),
        Style::default().fg(Color::White).bold(),
      ),
    ];
    for status in Status::ALL {
      let count = stats.by_status.get(&status).copied().unwrap_or(0);
      spans.push(Span::styled(
        format!("   {} ", status.as_str().to_lowercase()),
        Style::default().fg(Color::DarkGray),
      ));
      spans.push(Span::styled(
        format_count(count),
        Style::default().fg(status_color(&ReportedStatus::Known(status))),
      ));
    }
    spans.push(Span::styled("   cached ", Style::default().fg(Color::DarkGray)));
    spans.push(Span::raw(format_count(stats.cached_tasks)));
    spans.push(Span::styled("   tokens ", Style::default().fg(Color::DarkGray)));
    spans.push(Span::raw(format!(
      "{} in / {} out",
      format_count(stats.tokens.input),
      format_count(stats.tokens.output)
    )));

    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
  }

  fn render_table(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.batches().len();
    ensure_valid_selection(&mut self.table_state, len);

    let note = state_note(self.batches.state());
    let total = self.batches.data().map(|l| l.total).unwrap_or(0);
    let title = if note.is_empty() {
      format!(" Batches ({}) ", total)
    } else {
      format!(" Batches ({}) [{}] ", total, note)
    };

    let mut block = Block::default()
      .title(title)
      .title_alignment(Alignment::Center)
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Blue));
    if let Some(status_line) = &self.status_line {
      block = block.title_bottom(Line::from(format!(" {} ", status_line)).right_aligned());
    }

    if len == 0 {
      let content = if self.batches.is_loading() {
        "Loading batches..."
      } else if self.batches.state().error().is_some() {
        "Failed to load batches. Press 'r' to retry."
      } else {
        "No batches yet."
      };
      frame.render_widget(
        Paragraph::new(content)
          .block(block)
          .style(Style::default().fg(Color::DarkGray)),
        area,
      );
      return;
    }

    let header = Row::new(["ID", "STATUS", "PROGRESS", "TASKS", "FAILED", "MODEL", "CREATED"])
      .style(Style::default().fg(Color::Yellow).bold());

    let rows: Vec<Row> = self
      .batches()
      .iter()
      .map(|batch| {
        Row::new(vec![
          Cell::from(truncate(&batch.id, 24)).style(Style::default().fg(Color::Cyan)),
          Cell::from(batch.status.to_string()).style(Style::default().fg(status_color(&batch.status))),
          Cell::from(format!("{:>5.1}%", batch.progress())).style(if batch.is_finished() {
            Style::default().fg(Color::DarkGray)
          } else {
            Style::default()
          }),
          Cell::from(format!(
            "{}/{}",
            format_count(batch.completed_tasks + batch.cached_tasks),
            format_count(batch.total_tasks)
          )),
          Cell::from(format_count(batch.failed_tasks)).style(if batch.failed_tasks > 0 {
            Style::default().fg(Color::Red)
          } else {
            Style::default()
          }),
          Cell::from(truncate(batch.model.as_deref().unwrap_or("-"), 20)),
          Cell::from(format_time(batch.created_at)),
        ])
      })
      .collect();

    let table = Table::new(
      rows,
      [
        Constraint::Length(25),
        Constraint::Length(12),
        Constraint::Length(9),
        Constraint::Length(14),
        Constraint::Length(7),
        Constraint::Min(10),
        Constraint::Length(20),
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

impl View for BatchListView {
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
      KeyCode::Char('r') => {
        // The refetches run on their own; results arrive through poll()
        drop(self.batches.mutate());
        drop(self.stats.mutate());
      }
      KeyCode::Char('d') => {
        if self.delete.is_pending() {
          return ViewAction::Notify("A delete is already running".to_string());
        }
        if let Some(id) = self.selected().map(|b| b.id.clone()) {
          self.confirm.ask(format!("Delete batch {} and all its tasks?", id));
          self.target = Some(id);
        }
      }
      KeyCode::Enter => {
        if let Some(batch) = self.selected() {
          return ViewAction::Push(Box::new(BatchDetailView::new(
            self.ctx.clone(),
            batch.id.clone(),
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
      .constraints([Constraint::Length(3), Constraint::Min(1)])
      .split(area);

    self.render_stats(frame, chunks[0]);
    self.render_table(frame, chunks[1]);
    self.confirm.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Batches".to_string()
  }

  fn tick(&mut self) {
    self.batches.poll();
    self.stats.poll();

    if self.delete.poll() {
      let id = self.target.take().unwrap_or_default();
      match self.delete.state() {
        MutationState::Success(()) => {
          self.status_line = Some(format!("Deleted {}", id));
          self.ctx.resources.invalidate_batch(&id);
          self.ctx.cache().revalidate(&ResourceKey::TaskStats.path());
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
      Shortcut::new("enter", "open").with_priority(10),
      Shortcut::new("d", "delete").with_priority(20),
      Shortcut::new("r", "reload").with_priority(30),
      Shortcut::new("q", "quit").with_priority(90),
    ]
  }
}
