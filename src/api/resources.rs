//! Typed accessors for every backend resource.

use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

use crate::cache::{ResourceCache, ResourceOptions, Subscription};

use super::api_types::{ApiBatch, ApiBatchList, ApiHealth, ApiTask, ApiTaskList, ApiTaskStats, ApiUsageStats};
use super::client::ApiClient;
use super::error::RequestError;
use super::types::{
  Batch, BatchList, Health, StatsInterval, StatsRange, Status, Task, TaskList, TaskStats,
  UsageStats,
};

/// Health is cheap and rarely changes, so it polls on its own slower period.
const HEALTH_REFRESH: Duration = Duration::from_secs(30);

// ============================================================================
// Resource keys
// ============================================================================

/// Every fetchable backend resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
  Health,
  BatchList,
  Batch {
    id: String,
  },
  /// Tasks of a batch, optionally filtered by status
  BatchTasks {
    id: String,
    status: Option<Status>,
  },
  BatchStats {
    id: String,
    range: StatsRange,
    interval: StatsInterval,
  },
  Task {
    id: String,
  },
  TaskStats,
}

impl ResourceKey {
  /// Request path including the query string. Doubles as the cache key.
  pub fn path(&self) -> String {
    match self {
      ResourceKey::Health => "/health".to_string(),
      ResourceKey::BatchList => "/api/v1/batches".to_string(),
      ResourceKey::Batch { id } => batch_path(id),
      ResourceKey::BatchTasks { id, status } => match status {
        Some(status) => format!(
          "{}/tasks?task_status={}",
          batch_path(id),
          status.as_str()
        ),
        None => format!("{}/tasks", batch_path(id)),
      },
      ResourceKey::BatchStats {
        id,
        range,
        interval,
      } => format!(
        "{}/stats?time_range={}&interval={}",
        batch_path(id),
        range.as_str(),
        interval.as_str()
      ),
      ResourceKey::Task { id } => task_path(id),
      ResourceKey::TaskStats => "/api/v1/tasks/stats".to_string(),
    }
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.path())
  }
}

fn encode(segment: &str) -> String {
  url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Path of a batch. Every key of that batch starts with it.
pub fn batch_path(id: &str) -> String {
  format!("/api/v1/batches/{}", encode(id))
}

pub fn task_path(id: &str) -> String {
  format!("/api/v1/tasks/{}", encode(id))
}

// ============================================================================
// Accessors
// ============================================================================

/// Backend resources, each bound to the shared cache. Cheap to clone.
#[derive(Clone)]
pub struct Resources {
  client: ApiClient,
  cache: ResourceCache,
}

impl Resources {
  pub fn new(client: ApiClient, cache: ResourceCache) -> Self {
    Self { client, cache }
  }

  pub fn cache(&self) -> &ResourceCache {
    &self.cache
  }

  /// Subscribe to `key`, decoding the wire type `W` into the domain type `T`.
  pub fn subscribe<W, T>(&self, key: Option<ResourceKey>, options: ResourceOptions) -> Subscription<T>
  where
    W: DeserializeOwned + Send + 'static,
    T: From<W> + Clone + Send + Sync + 'static,
  {
    let path = key.map(|k| k.path());
    let client = self.client.clone();
    let fetch_path = path.clone().unwrap_or_default();

    self.cache.subscribe(path.as_deref(), options, move || {
      let client = client.clone();
      let path = fetch_path.clone();
      async move { client.get_json::<W>(&path).await.map(T::from) }
    })
  }

  pub fn batch_list(&self) -> Subscription<BatchList> {
    self.subscribe::<ApiBatchList, _>(Some(ResourceKey::BatchList), ResourceOptions::default())
  }

  pub fn batch(&self, id: &str) -> Subscription<Batch> {
    self.subscribe::<ApiBatch, _>(
      Some(ResourceKey::Batch { id: id.to_string() }),
      ResourceOptions::default(),
    )
  }

  pub fn batch_tasks(&self, id: &str, status: Option<Status>) -> Subscription<TaskList> {
    self.subscribe::<ApiTaskList, _>(
      Some(ResourceKey::BatchTasks {
        id: id.to_string(),
        status,
      }),
      ResourceOptions::default(),
    )
  }

  pub fn batch_stats(
    &self,
    id: &str,
    range: StatsRange,
    interval: StatsInterval,
  ) -> Subscription<UsageStats> {
    self.subscribe::<ApiUsageStats, _>(
      Some(ResourceKey::BatchStats {
        id: id.to_string(),
        range,
        interval,
      }),
      ResourceOptions::default(),
    )
  }

  /// Task detail. `None` keeps the subscription inactive (e.g. while no task
  /// is selected).
  pub fn task(&self, id: Option<&str>) -> Subscription<Task> {
    let key = id.map(|id| ResourceKey::Task { id: id.to_string() });
    self.subscribe::<ApiTask, _>(key, ResourceOptions::default())
  }

  pub fn task_stats(&self) -> Subscription<TaskStats> {
    self.subscribe::<ApiTaskStats, _>(Some(ResourceKey::TaskStats), ResourceOptions::default())
  }

  pub fn health(&self) -> Subscription<Health> {
    self.subscribe::<ApiHealth, _>(
      Some(ResourceKey::Health),
      ResourceOptions::default().refresh_interval(HEALTH_REFRESH),
    )
  }

  /// Delete a batch. The caller revalidates the batch list afterwards.
  pub async fn delete_batch(&self, id: &str) -> Result<(), RequestError> {
    self.client.delete(&batch_path(id)).await
  }

  /// Delete a task. The caller revalidates the owning batch afterwards.
  pub async fn delete_task(&self, id: &str) -> Result<(), RequestError> {
    self.client.delete(&task_path(id)).await
  }

  /// Revalidate the batch list and every key of one batch.
  pub fn invalidate_batch(&self, id: &str) -> usize {
    let prefix = batch_path(id);
    let list = ResourceKey::BatchList.path();
    self
      .cache
      .revalidate_matching(|key| key == list || key.starts_with(&prefix))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::client::tests::{json_response, stub_server};
  use crate::auth::AuthSession;
  use crate::cache::CacheDefaults;
  use crate::refresh::{RefreshInterval, RefreshPolicy};
  use crate::storage::MemoryStorage;
  use std::sync::Arc;

  fn resources(base_url: &str) -> Resources {
    let storage = Arc::new(MemoryStorage::new());
    let auth = AuthSession::new(storage.clone(), Some("k1".to_string()));
    let client = ApiClient::new(base_url, auth, Duration::from_secs(5)).unwrap();
    let policy = RefreshPolicy::load(storage, Duration::from_secs(1));
    policy.set_interval(RefreshInterval::Off).unwrap();
    Resources::new(client, ResourceCache::new(policy, CacheDefaults::default()))
  }

  async fn wait_loaded<T: Clone + Send + Sync + 'static>(sub: &mut Subscription<T>) {
    tokio::time::timeout(Duration::from_secs(5), async {
      while sub.state().is_loading {
        assert!(sub.changed().await);
      }
    })
    .await
    .unwrap();
  }

  #[test]
  fn test_paths() {
    assert_eq!(ResourceKey::Health.path(), "/health");
    assert_eq!(ResourceKey::BatchList.path(), "/api/v1/batches");
    assert_eq!(
      ResourceKey::Batch { id: "b1".into() }.path(),
      "/api/v1/batches/b1"
    );
    assert_eq!(
      ResourceKey::BatchTasks {
        id: "b1".into(),
        status: Some(Status::Failed)
      }
      .path(),
      "/api/v1/batches/b1/tasks?task_status=FAILED"
    );
    assert_eq!(
      ResourceKey::BatchTasks {
        id: "b1".into(),
        status: None
      }
      .path(),
      "/api/v1/batches/b1/tasks"
    );
    assert_eq!(
      ResourceKey::BatchStats {
        id: "b1".into(),
        range: StatsRange::SevenDays,
        interval: StatsInterval::TwelveHours,
      }
      .path(),
      "/api/v1/batches/b1/stats?time_range=7d&interval=12h"
    );
    assert_eq!(ResourceKey::Task { id: "t1".into() }.to_string(), "/api/v1/tasks/t1");
    assert_eq!(ResourceKey::TaskStats.path(), "/api/v1/tasks/stats");
  }

  #[test]
  fn test_ids_are_encoded() {
    assert_eq!(batch_path("a/b c"), "/api/v1/batches/a%2Fb+c");
  }

  #[tokio::test]
  async fn test_batch_list_is_decoded() {
    let body = r#"{
      "total": 1,
      "batches": [{
        "batch_id": "b1",
        "batch_status": "PROCESSING",
        "total_tasks": 10,
        "completed_tasks": 3,
        "cached_tasks": 2
      }]
    }"#;
    let (url, server) = stub_server(vec![json_response(200, body)]).await;
    let resources = resources(&url);

    let mut sub = resources.batch_list();
    assert_eq!(sub.key(), Some("/api/v1/batches"));
    wait_loaded(&mut sub).await;

    let list = sub.data().unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.batches[0].id, "b1");
    assert_eq!(list.batches[0].progress(), 50.0);
    assert!(sub.state().error.is_none());

    let requests = server.await.unwrap();
    assert!(requests[0].contains("authorization: bearer k1"));
  }

  #[tokio::test]
  async fn test_schema_mismatch_is_malformed() {
    let (url, _server) = stub_server(vec![json_response(200, r#"{"batches": 3}"#)]).await;
    let resources = resources(&url);

    let mut sub = resources.batch_list();
    wait_loaded(&mut sub).await;
    assert_eq!(sub.data(), None);
    assert_eq!(sub.state().error.as_ref().map(|e| e.reason()), Some("malformed"));
  }

  #[tokio::test]
  async fn test_task_without_id_is_inactive() {
    let resources = resources("http://127.0.0.1:9");
    let sub = resources.task(None);
    assert!(!sub.is_active());
    assert!(!sub.is_loading());
    assert!(resources.cache().active_keys().is_empty());
  }

  #[tokio::test]
  async fn test_delete_batch() {
    let (url, server) = stub_server(vec![json_response(200, r#"{"deleted": true}"#)]).await;
    let resources = resources(&url);

    resources.delete_batch("b1").await.unwrap();
    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("delete /api/v1/batches/b1 "));
  }

  #[tokio::test]
  async fn test_delete_missing_task() {
    let (url, _server) = stub_server(vec![json_response(404, r#"{"detail": "Task not found"}"#)]).await;
    let resources = resources(&url);

    let err = resources.delete_task("t9").await.unwrap_err();
    assert_eq!(err.to_string(), "HTTP 404: Task not found");
  }

  #[tokio::test]
  async fn test_invalidate_batch_refetches_related_keys() {
    let list = r#"{"batches": []}"#;
    let tasks = r#"{"tasks": []}"#;
    let (url, server) = stub_server(vec![
      json_response(200, list),
      json_response(200, tasks),
      json_response(200, list),
      json_response(200, tasks),
    ])
    .await;
    let resources = resources(&url);

    let mut list_sub = resources.batch_list();
    wait_loaded(&mut list_sub).await;
    let mut tasks_sub = resources.batch_tasks("b1", None);
    wait_loaded(&mut tasks_sub).await;

    assert_eq!(resources.invalidate_batch("b1"), 2);
    let requests = tokio::time::timeout(Duration::from_secs(5), server)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(requests.len(), 4);
    let refetched: Vec<&str> = requests[2..]
      .iter()
      .filter_map(|r| r.split_whitespace().nth(1))
      .collect();
    assert!(refetched.contains(&"/api/v1/batches"));
    assert!(refetched.contains(&"/api/v1/batches/b1/tasks"));
  }
}
