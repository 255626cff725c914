use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::utils::format_duration;
use crate::api::Health;
use crate::refresh::RefreshSettings;
use crate::ui::view::Shortcut;

/// What the header shows besides the shortcuts
pub struct HeaderInfo<'a> {
  pub title: &'a str,
  pub settings: RefreshSettings,
  pub refreshing: bool,
  pub health: Option<&'a Health>,
  pub notice: Option<&'a str>,
}

/// Draw the header bar: logo, backend, refresh status, health, shortcuts
pub fn draw_header(frame: &mut Frame, area: Rect, info: &HeaderInfo, shortcuts: &[Shortcut]) {
  let sep = || Span::styled("│", Style::default().fg(Color::DarkGray));

  let mut spans = vec![
    Span::styled(" b9s ", Style::default().fg(Color::Cyan).bold()),
    sep(),
    Span::styled(format!(" {} ", info.title), Style::default().fg(Color::White)),
    sep(),
  ];

  let (health_label, health_color) = match info.health {
    Some(h) => health_label(h),
    None => ("health ?".to_string(), Color::DarkGray),
  };
  spans.push(Span::styled(
    format!(" {} ", health_label),
    Style::default().fg(health_color),
  ));
  spans.push(sep());
  spans.push(Span::styled(
    format!(" {} ", refresh_label(&info.settings)),
    Style::default().fg(if info.settings.auto_refresh {
      Color::Yellow
    } else {
      Color::DarkGray
    }),
  ));
  if info.refreshing {
    spans.push(Span::styled("⟳ ", Style::default().fg(Color::Cyan).bold()));
  }
  spans.push(Span::raw(" "));

  if let Some(notice) = info.notice {
    spans.push(Span::styled(
      notice.to_string(),
      Style::default().fg(Color::LightRed).bold(),
    ));
  } else {
    let mut sorted = shortcuts.to_vec();
    sorted.sort_by_key(|s| s.priority);
    for shortcut in sorted {
      spans.push(Span::styled(
        format!("<{}>", shortcut.key),
        Style::default().fg(Color::Cyan),
      ));
      spans.push(Span::styled(
        format!(" {}   ", shortcut.label),
        Style::default().fg(Color::DarkGray),
      ));
    }
  }

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

/// Health status with the version, or the failing checks when unhealthy
fn health_label(health: &Health) -> (String, Color) {
  if health.is_healthy() {
    let mut label = match &health.version {
      Some(version) => format!("healthy v{}", version.trim_start_matches('v')),
      None => "healthy".to_string(),
    };
    if let Some(secs) = health.uptime_seconds {
      label.push_str(&format!(
        ", up {}",
        format_duration(chrono::Duration::seconds(secs as i64))
      ));
    }
    return (label, Color::Green);
  }

  let failing = health.failing_checks();
  let label = if failing.is_empty() {
    health.status.to_lowercase()
  } else {
    format!("{} ({})", health.status.to_lowercase(), failing.join(", "))
  };
  (label, Color::Red)
}

/// "auto 5s", "auto off" or "paused"
pub fn refresh_label(settings: &RefreshSettings) -> String {
  if settings.auto_refresh {
    format!("auto {}", settings.interval)
  } else {
    "paused".to_string()
  }
}
