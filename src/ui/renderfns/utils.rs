use chrono::{DateTime, Local, Utc};
use ratatui::prelude::Color;

use crate::api::{ReportedStatus, Status};
use crate::cache::ResourceState;

/// Truncate a string to a maximum number of chars, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for a batch or task status
pub fn status_color(status: &ReportedStatus) -> Color {
  match status.known() {
    Some(Status::Completed) => Color::Green,
    Some(Status::Processing) => Color::Yellow,
    Some(Status::Pending) => Color::Blue,
    Some(Status::Failed) => Color::Red,
    None => Color::Magenta,
  }
}

/// Local time, or "-" when unknown
pub fn format_time(ts: Option<DateTime<Utc>>) -> String {
  ts.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
    .unwrap_or_else(|| "-".to_string())
}

/// Compact duration: "850ms", "12.3s", "4m05s", "2h10m"
pub fn format_duration(d: chrono::Duration) -> String {
  let ms = d.num_milliseconds().max(0);
  if ms < 1000 {
    format!("{}ms", ms)
  } else if ms < 60_000 {
    format!("{:.1}s", ms as f64 / 1000.0)
  } else if ms < 3_600_000 {
    format!("{}m{:02}s", ms / 60_000, (ms / 1000) % 60)
  } else {
    format!("{}h{:02}m", ms / 3_600_000, (ms / 60_000) % 60)
  }
}

/// Thousands with a k/M suffix: 950, 12.4k, 3.1M
pub fn format_count(n: u64) -> String {
  if n < 1_000 {
    n.to_string()
  } else if n < 1_000_000 {
    format!("{:.1}k", n as f64 / 1_000.0)
  } else {
    format!("{:.1}M", n as f64 / 1_000_000.0)
  }
}

/// Short note on a resource's fetch state for block titles, empty when idle
pub fn state_note<T>(state: &ResourceState<T>) -> String {
  match state.error() {
    _ if state.is_loading => "loading...".to_string(),
    Some(e) if state.is_stale() => format!("stale, {}", truncate(&e.to_string(), 40)),
    Some(e) => format!("error: {}", truncate(&e.to_string(), 60)),
    None if state.is_busy() => "refreshing...".to_string(),
    None => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::RequestError;

  #[test]
  fn test_truncate() {
    assert_eq!(truncate("hello", 10), "hello");
    assert_eq!(truncate("hello", 5), "hello");
    assert_eq!(truncate("hello world", 8), "hello...");
    assert_eq!(truncate("ñññññññ", 5), "ññ...");
  }

  #[test]
  fn test_status_color() {
    assert_eq!(
      status_color(&ReportedStatus::Known(Status::Completed)),
      Color::Green
    );
    assert_eq!(
      status_color(&ReportedStatus::Known(Status::Failed)),
      Color::Red
    );
    assert_eq!(
      status_color(&ReportedStatus::Unknown("PAUSED".into())),
      Color::Magenta
    );
  }

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(chrono::Duration::milliseconds(850)), "850ms");
    assert_eq!(format_duration(chrono::Duration::milliseconds(12_340)), "12.3s");
    assert_eq!(format_duration(chrono::Duration::seconds(245)), "4m05s");
    assert_eq!(format_duration(chrono::Duration::minutes(130)), "2h10m");
  }

  #[test]
  fn test_format_count() {
    assert_eq!(format_count(950), "950");
    assert_eq!(format_count(12_400), "12.4k");
    assert_eq!(format_count(3_100_000), "3.1M");
  }

  #[test]
  fn test_state_note() {
    let mut state: ResourceState<u32> = ResourceState {
      is_loading: true,
      ..Default::default()
    };
    assert_eq!(state_note(&state), "loading...");

    state.is_loading = false;
    state.error = Some(RequestError::Network("connection refused".into()));
    assert_eq!(state_note(&state), "error: Network error: connection refused");

    state.data = Some(1);
    assert_eq!(state_note(&state), "stale, Network error: connection refused");

    state.error = None;
    state.is_validating = true;
    assert_eq!(state_note(&state), "refreshing...");

    state.is_validating = false;
    assert_eq!(state_note(&state), "");
  }
}
