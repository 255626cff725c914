use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Processing status of a batch or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
  Pending,
  Processing,
  Completed,
  Failed,
}

impl Status {
  pub const ALL: [Status; 4] = [
    Status::Pending,
    Status::Processing,
    Status::Completed,
    Status::Failed,
  ];

  /// Wire representation, also used as the `task_status` query value.
  pub fn as_str(self) -> &'static str {
    match self {
      Status::Pending => "PENDING",
      Status::Processing => "PROCESSING",
      Status::Completed => "COMPLETED",
      Status::Failed => "FAILED",
    }
  }

  /// Case-insensitive parse of the wire value.
  pub fn parse(s: &str) -> Option<Self> {
    Self::ALL
      .into_iter()
      .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Status as reported by the backend.
///
/// Anything outside the four known values is kept verbatim so it can be
/// shown as-is rather than guessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedStatus {
  Known(Status),
  Unknown(String),
}

impl ReportedStatus {
  pub fn from_wire(raw: Option<&str>) -> Self {
    match raw {
      Some(s) => match Status::parse(s) {
        Some(status) => ReportedStatus::Known(status),
        None => ReportedStatus::Unknown(s.to_string()),
      },
      None => ReportedStatus::Unknown(String::new()),
    }
  }

  pub fn known(&self) -> Option<Status> {
    match self {
      ReportedStatus::Known(status) => Some(*status),
      ReportedStatus::Unknown(_) => None,
    }
  }

  pub fn is(&self, status: Status) -> bool {
    self.known() == Some(status)
  }
}

impl fmt::Display for ReportedStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ReportedStatus::Known(status) => status.fmt(f),
      ReportedStatus::Unknown(raw) if raw.is_empty() => f.write_str("UNKNOWN"),
      ReportedStatus::Unknown(raw) => write!(f, "UNKNOWN({})", raw),
    }
  }
}

/// Token counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
  pub input: u64,
  pub output: u64,
}

impl TokenUsage {
  pub fn total(&self) -> u64 {
    self.input + self.output
  }
}

/// A batch with its aggregate task counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
  pub id: String,
  pub status: ReportedStatus,
  pub model: Option<String>,
  pub total_tasks: u64,
  pub completed_tasks: u64,
  pub failed_tasks: u64,
  pub pending_tasks: u64,
  pub processing_tasks: u64,
  pub cached_tasks: u64,
  pub tokens: TokenUsage,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
  /// Percentage of tasks that are done, counting cache hits as done.
  pub fn progress(&self) -> f64 {
    if self.total_tasks == 0 {
      return 0.0;
    }
    let done = (self.completed_tasks + self.cached_tasks).min(self.total_tasks);
    done as f64 / self.total_tasks as f64 * 100.0
  }

  pub fn is_finished(&self) -> bool {
    matches!(
      self.status.known(),
      Some(Status::Completed) | Some(Status::Failed)
    )
  }
}

/// One page of batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchList {
  pub total: u64,
  pub batches: Vec<Batch>,
}

/// A single task of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
  pub id: String,
  pub batch_id: Option<String>,
  pub status: ReportedStatus,
  pub created_at: Option<DateTime<Utc>>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub tokens: TokenUsage,
  pub cache_hit: bool,
  pub error: Option<String>,
}

impl Task {
  /// Wall time from start to completion, if both are known.
  pub fn duration(&self) -> Option<chrono::Duration> {
    match (self.started_at, self.completed_at) {
      (Some(start), Some(end)) if end >= start => Some(end - start),
      _ => None,
    }
  }
}

/// Tasks of a batch, optionally filtered by status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskList {
  pub total: u64,
  pub tasks: Vec<Task>,
}

/// Time window for usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatsRange {
  OneHour,
  SixHours,
  TwelveHours,
  #[default]
  OneDay,
  TwoDays,
  SevenDays,
  ThirtyDays,
}

impl StatsRange {
  pub const ALL: [StatsRange; 7] = [
    StatsRange::OneHour,
    StatsRange::SixHours,
    StatsRange::TwelveHours,
    StatsRange::OneDay,
    StatsRange::TwoDays,
    StatsRange::SevenDays,
    StatsRange::ThirtyDays,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      StatsRange::OneHour => "1h",
      StatsRange::SixHours => "6h",
      StatsRange::TwelveHours => "12h",
      StatsRange::OneDay => "24h",
      StatsRange::TwoDays => "2d",
      StatsRange::SevenDays => "7d",
      StatsRange::ThirtyDays => "30d",
    }
  }

  /// Bucket size that gives a readable number of points for this range.
  pub fn default_interval(self) -> StatsInterval {
    match self {
      StatsRange::OneHour => StatsInterval::OneMinute,
      StatsRange::SixHours => StatsInterval::FifteenMinutes,
      StatsRange::TwelveHours => StatsInterval::ThirtyMinutes,
      StatsRange::OneDay => StatsInterval::OneHour,
      StatsRange::TwoDays => StatsInterval::ThreeHours,
      StatsRange::SevenDays => StatsInterval::TwelveHours,
      StatsRange::ThirtyDays => StatsInterval::OneDay,
    }
  }

  pub fn next(self) -> Self {
    let idx = Self::ALL.iter().position(|r| *r == self).unwrap_or(0);
    Self::ALL[(idx + 1) % Self::ALL.len()]
  }
}

/// Bucket size for usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsInterval {
  OneMinute,
  FiveMinutes,
  FifteenMinutes,
  ThirtyMinutes,
  OneHour,
  ThreeHours,
  SixHours,
  TwelveHours,
  OneDay,
  OneWeek,
}

impl StatsInterval {
  pub const ALL: [StatsInterval; 10] = [
    StatsInterval::OneMinute,
    StatsInterval::FiveMinutes,
    StatsInterval::FifteenMinutes,
    StatsInterval::ThirtyMinutes,
    StatsInterval::OneHour,
    StatsInterval::ThreeHours,
    StatsInterval::SixHours,
    StatsInterval::TwelveHours,
    StatsInterval::OneDay,
    StatsInterval::OneWeek,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      StatsInterval::OneMinute => "1m",
      StatsInterval::FiveMinutes => "5m",
      StatsInterval::FifteenMinutes => "15m",
      StatsInterval::ThirtyMinutes => "30m",
      StatsInterval::OneHour => "1h",
      StatsInterval::ThreeHours => "3h",
      StatsInterval::SixHours => "6h",
      StatsInterval::TwelveHours => "12h",
      StatsInterval::OneDay => "1d",
      StatsInterval::OneWeek => "1w",
    }
  }

  pub fn next(self) -> Self {
    let idx = Self::ALL.iter().position(|i| *i == self).unwrap_or(0);
    Self::ALL[(idx + 1) % Self::ALL.len()]
  }
}

/// One time bucket of usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsagePoint {
  pub timestamp: Option<DateTime<Utc>>,
  pub total_tasks: u64,
  pub completed_tasks: u64,
  pub failed_tasks: u64,
  pub cached_tasks: u64,
  pub tokens: TokenUsage,
}

/// Totals over the whole stats window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
  pub total_tasks: u64,
  pub completed_tasks: u64,
  pub failed_tasks: u64,
  pub cached_tasks: u64,
  pub tokens: TokenUsage,
  pub avg_duration_ms: Option<f64>,
}

impl UsageSummary {
  /// Share of tasks served from cache, 0..=100.
  pub fn cache_hit_rate(&self) -> f64 {
    if self.total_tasks == 0 {
      0.0
    } else {
      self.cached_tasks as f64 / self.total_tasks as f64 * 100.0
    }
  }
}

/// Time-bucketed usage for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageStats {
  pub time_range: String,
  pub interval: String,
  pub points: Vec<UsagePoint>,
  pub summary: UsageSummary,
}

/// Global task counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStats {
  pub total_tasks: u64,
  pub by_status: BTreeMap<Status, u64>,
  pub cached_tasks: u64,
  pub tokens: TokenUsage,
}

/// Backend health summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Health {
  pub status: String,
  pub version: Option<String>,
  pub uptime_seconds: Option<u64>,
  /// Component checks, e.g. "database" -> "ok"
  pub checks: BTreeMap<String, String>,
}

fn is_ok(status: &str) -> bool {
  matches!(
    status.to_ascii_lowercase().as_str(),
    "ok" | "healthy" | "up" | "pass"
  )
}

impl Health {
  pub fn is_healthy(&self) -> bool {
    is_ok(&self.status)
  }

  /// Names of the component checks that are not ok.
  pub fn failing_checks(&self) -> Vec<&str> {
    self
      .checks
      .iter()
      .filter(|(_, status)| !is_ok(status))
      .map(|(name, _)| name.as_str())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn batch(total: u64, completed: u64, cached: u64) -> Batch {
    Batch {
      id: "b1".to_string(),
      status: ReportedStatus::Known(Status::Processing),
      model: None,
      total_tasks: total,
      completed_tasks: completed,
      failed_tasks: 0,
      pending_tasks: 0,
      processing_tasks: 0,
      cached_tasks: cached,
      tokens: TokenUsage::default(),
      created_at: None,
      updated_at: None,
      completed_at: None,
    }
  }

  #[test]
  fn test_progress_counts_cached_as_done() {
    assert_eq!(batch(10, 3, 2).progress(), 50.0);
  }

  #[test]
  fn test_progress_empty_batch() {
    assert_eq!(batch(0, 0, 0).progress(), 0.0);
  }

  #[test]
  fn test_progress_is_capped() {
    assert_eq!(batch(4, 4, 2).progress(), 100.0);
  }

  #[test]
  fn test_stats_interval_cycle_visits_every_bucket() {
    let mut interval = StatsInterval::OneMinute;
    let mut seen = vec![interval.as_str()];
    for _ in 1..StatsInterval::ALL.len() {
      interval = interval.next();
      seen.push(interval.as_str());
    }
    assert_eq!(
      seen,
      ["1m", "5m", "15m", "30m", "1h", "3h", "6h", "12h", "1d", "1w"]
    );
    assert_eq!(interval.next(), StatsInterval::OneMinute);
  }

  #[test]
  fn test_status_parse() {
    assert_eq!(Status::parse("COMPLETED"), Some(Status::Completed));
    assert_eq!(Status::parse("processing"), Some(Status::Processing));
    assert_eq!(Status::parse("DONE"), None);
  }

  #[test]
  fn test_unknown_status_is_kept() {
    let status = ReportedStatus::from_wire(Some("CANCELLED"));
    assert_eq!(status, ReportedStatus::Unknown("CANCELLED".to_string()));
    assert_eq!(status.known(), None);
    assert_eq!(status.to_string(), "UNKNOWN(CANCELLED)");

    let missing = ReportedStatus::from_wire(None);
    assert_eq!(missing.to_string(), "UNKNOWN");
  }

  #[test]
  fn test_unknown_status_is_not_finished() {
    let mut b = batch(10, 10, 0);
    b.status = ReportedStatus::Unknown("weird".to_string());
    assert!(!b.is_finished());
    b.status = ReportedStatus::Known(Status::Failed);
    assert!(b.is_finished());
  }

  #[test]
  fn test_stats_range_values() {
    let values: Vec<_> = StatsRange::ALL.iter().map(|r| r.as_str()).collect();
    assert_eq!(values, ["1h", "6h", "12h", "24h", "2d", "7d", "30d"]);
    assert_eq!(StatsRange::ThirtyDays.next(), StatsRange::OneHour);
    assert_eq!(StatsRange::OneDay.default_interval().as_str(), "1h");
  }

  #[test]
  fn test_health() {
    let health = Health {
      status: "Healthy".to_string(),
      ..Default::default()
    };
    assert!(health.is_healthy());
    let degraded = Health {
      status: "degraded".to_string(),
      ..Default::default()
    };
    assert!(!degraded.is_healthy());

    let partial = Health {
      status: "degraded".to_string(),
      checks: BTreeMap::from([
        ("database".to_string(), "UP".to_string()),
        ("queue".to_string(), "down".to_string()),
      ]),
      ..Default::default()
    };
    assert_eq!(partial.failing_checks(), ["queue"]);
  }

  #[test]
  fn test_cache_hit_rate() {
    let summary = UsageSummary {
      total_tasks: 8,
      cached_tasks: 2,
      ..Default::default()
    };
    assert_eq!(summary.cache_hit_rate(), 25.0);
    assert_eq!(UsageSummary::default().cache_hit_rate(), 0.0);
  }
}
