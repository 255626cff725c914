//! Serde-deserializable types matching backend API responses.
//!
//! These are separate from the domain types so deserialization can stay
//! lenient (aliases, defaults) while the domain types stay strict. Missing
//! counters default to 0, missing timestamps and strings to `None`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

use super::types::{
  Batch, BatchList, Health, ReportedStatus, Status, Task, TaskList, TaskStats, TokenUsage,
  UsagePoint, UsageStats, UsageSummary,
};

// ============================================================================
// Batches
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiBatch {
  #[serde(alias = "id")]
  pub batch_id: String,
  #[serde(alias = "status")]
  pub batch_status: Option<String>,
  pub model: Option<String>,
  #[serde(default)]
  pub total_tasks: u64,
  #[serde(default)]
  pub completed_tasks: u64,
  #[serde(default)]
  pub failed_tasks: u64,
  #[serde(default)]
  pub pending_tasks: u64,
  #[serde(default)]
  pub processing_tasks: u64,
  #[serde(default)]
  pub cached_tasks: u64,
  #[serde(default, alias = "prompt_tokens", alias = "input_tokens")]
  pub total_input_tokens: u64,
  #[serde(default, alias = "completion_tokens", alias = "output_tokens")]
  pub total_output_tokens: u64,
  pub created_at: Option<String>,
  pub updated_at: Option<String>,
  pub completed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiBatchList {
  #[serde(default, alias = "items")]
  pub batches: Vec<ApiBatch>,
  /// Total across all pages; defaults to the page length
  pub total: Option<u64>,
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTask {
  #[serde(alias = "id")]
  pub task_id: String,
  pub batch_id: Option<String>,
  #[serde(alias = "status")]
  pub task_status: Option<String>,
  pub created_at: Option<String>,
  pub started_at: Option<String>,
  pub completed_at: Option<String>,
  #[serde(default, alias = "prompt_tokens")]
  pub input_tokens: u64,
  #[serde(default, alias = "completion_tokens")]
  pub output_tokens: u64,
  #[serde(default, alias = "cached")]
  pub cache_hit: bool,
  #[serde(alias = "error")]
  pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTaskList {
  #[serde(default, alias = "items")]
  pub tasks: Vec<ApiTask>,
  pub total: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiTaskStats {
  #[serde(default)]
  pub total_tasks: u64,
  #[serde(default)]
  pub pending_tasks: u64,
  #[serde(default)]
  pub processing_tasks: u64,
  #[serde(default)]
  pub completed_tasks: u64,
  #[serde(default)]
  pub failed_tasks: u64,
  #[serde(default)]
  pub cached_tasks: u64,
  #[serde(default, alias = "prompt_tokens")]
  pub total_input_tokens: u64,
  #[serde(default, alias = "completion_tokens")]
  pub total_output_tokens: u64,
}

// ============================================================================
// Usage statistics
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ApiUsagePoint {
  #[serde(alias = "time", alias = "bucket")]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub total_tasks: u64,
  #[serde(default)]
  pub completed_tasks: u64,
  #[serde(default)]
  pub failed_tasks: u64,
  #[serde(default)]
  pub cached_tasks: u64,
  #[serde(default, alias = "prompt_tokens")]
  pub input_tokens: u64,
  #[serde(default, alias = "completion_tokens")]
  pub output_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiUsageSummary {
  #[serde(default)]
  pub total_tasks: u64,
  #[serde(default)]
  pub completed_tasks: u64,
  #[serde(default)]
  pub failed_tasks: u64,
  #[serde(default)]
  pub cached_tasks: u64,
  #[serde(default, alias = "total_input_tokens")]
  pub input_tokens: u64,
  #[serde(default, alias = "total_output_tokens")]
  pub output_tokens: u64,
  pub avg_duration_ms: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ApiUsageStats {
  #[serde(default)]
  pub time_range: String,
  #[serde(default)]
  pub interval: String,
  #[serde(default, alias = "data", alias = "series")]
  pub points: Vec<ApiUsagePoint>,
  #[serde(default)]
  pub summary: ApiUsageSummary,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiHealth {
  #[serde(default)]
  pub status: String,
  pub version: Option<String>,
  #[serde(alias = "uptime")]
  pub uptime_seconds: Option<f64>,
  // Catch-all for component checks
  #[serde(flatten)]
  pub extra: BTreeMap<String, serde_json::Value>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

fn status_from_wire(raw: Option<&str>, what: &str, id: &str) -> ReportedStatus {
  let status = ReportedStatus::from_wire(raw);
  if let ReportedStatus::Unknown(value) = &status {
    warn!(kind = what, id, value = %value, "Backend reported an unrecognized status");
  }
  status
}

impl From<ApiBatch> for Batch {
  fn from(b: ApiBatch) -> Self {
    Batch {
      status: status_from_wire(b.batch_status.as_deref(), "batch", &b.batch_id),
      model: b.model,
      total_tasks: b.total_tasks,
      completed_tasks: b.completed_tasks,
      failed_tasks: b.failed_tasks,
      pending_tasks: b.pending_tasks,
      processing_tasks: b.processing_tasks,
      cached_tasks: b.cached_tasks,
      tokens: TokenUsage {
        input: b.total_input_tokens,
        output: b.total_output_tokens,
      },
      created_at: b.created_at.as_deref().and_then(parse_timestamp),
      updated_at: b.updated_at.as_deref().and_then(parse_timestamp),
      completed_at: b.completed_at.as_deref().and_then(parse_timestamp),
      id: b.batch_id,
    }
  }
}

impl From<ApiBatchList> for BatchList {
  fn from(list: ApiBatchList) -> Self {
    let batches: Vec<Batch> = list.batches.into_iter().map(Batch::from).collect();
    BatchList {
      total: list.total.unwrap_or(batches.len() as u64),
      batches,
    }
  }
}

impl From<ApiTask> for Task {
  fn from(t: ApiTask) -> Self {
    Task {
      status: status_from_wire(t.task_status.as_deref(), "task", &t.task_id),
      batch_id: t.batch_id,
      created_at: t.created_at.as_deref().and_then(parse_timestamp),
      started_at: t.started_at.as_deref().and_then(parse_timestamp),
      completed_at: t.completed_at.as_deref().and_then(parse_timestamp),
      tokens: TokenUsage {
        input: t.input_tokens,
        output: t.output_tokens,
      },
      cache_hit: t.cache_hit,
      error: t.error_message.filter(|e| !e.is_empty()),
      id: t.task_id,
    }
  }
}

impl From<ApiTaskList> for TaskList {
  fn from(list: ApiTaskList) -> Self {
    let tasks: Vec<Task> = list.tasks.into_iter().map(Task::from).collect();
    TaskList {
      total: list.total.unwrap_or(tasks.len() as u64),
      tasks,
    }
  }
}

impl From<ApiTaskStats> for TaskStats {
  fn from(s: ApiTaskStats) -> Self {
    let by_status = BTreeMap::from([
      (Status::Pending, s.pending_tasks),
      (Status::Processing, s.processing_tasks),
      (Status::Completed, s.completed_tasks),
      (Status::Failed, s.failed_tasks),
    ]);
    TaskStats {
      total_tasks: s.total_tasks,
      by_status,
      cached_tasks: s.cached_tasks,
      tokens: TokenUsage {
        input: s.total_input_tokens,
        output: s.total_output_tokens,
      },
    }
  }
}

impl From<ApiUsagePoint> for UsagePoint {
  fn from(p: ApiUsagePoint) -> Self {
    UsagePoint {
      timestamp: p.timestamp.as_deref().and_then(parse_timestamp),
      total_tasks: p.total_tasks,
      completed_tasks: p.completed_tasks,
      failed_tasks: p.failed_tasks,
      cached_tasks: p.cached_tasks,
      tokens: TokenUsage {
        input: p.input_tokens,
        output: p.output_tokens,
      },
    }
  }
}

impl From<ApiUsageStats> for UsageStats {
  fn from(s: ApiUsageStats) -> Self {
    let summary = s.summary;
    UsageStats {
      time_range: s.time_range,
      interval: s.interval,
      points: s.points.into_iter().map(UsagePoint::from).collect(),
      summary: UsageSummary {
        total_tasks: summary.total_tasks,
        completed_tasks: summary.completed_tasks,
        failed_tasks: summary.failed_tasks,
        cached_tasks: summary.cached_tasks,
        tokens: TokenUsage {
          input: summary.input_tokens,
          output: summary.output_tokens,
        },
        avg_duration_ms: summary.avg_duration_ms,
      },
    }
  }
}

impl From<ApiHealth> for Health {
  fn from(h: ApiHealth) -> Self {
    // Keep scalar component checks ("database": "ok"), drop nested objects
    let checks = h
      .extra
      .into_iter()
      .filter_map(|(name, value)| match value {
        serde_json::Value::String(s) => Some((name, s)),
        serde_json::Value::Bool(b) => Some((name, b.to_string())),
        _ => None,
      })
      .collect();

    Health {
      status: h.status,
      version: h.version,
      uptime_seconds: h.uptime_seconds.map(|s| s.max(0.0) as u64),
      checks,
    }
  }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 and naive ISO 8601 (treated as UTC), with or without
/// fractional seconds.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|dt| dt.and_utc())
}
