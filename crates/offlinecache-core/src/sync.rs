//! Deferred replay of mutating requests that failed for lack of connectivity.
//!
//! Retries are driven entirely by the host's connectivity-restore signal:
//! there is no timer here. Each signal drains the queue once, in insertion
//! order. The queue is persisted as a store record after every mutation.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::Request;
use crate::network::NetworkClient;
use crate::store::CacheStore;
use crate::utils::mutex_lock;

/// Store record holding the serialized queue.
const SYNC_QUEUE_RECORD: &str = "sync-queue";

/// A deferred request, unique by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    pub tag: String,
    pub request: Request,
    pub enqueued_at: DateTime<Utc>,
    /// Replays attempted so far
    #[serde(default)]
    pub attempts: u32,
}

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Tags replayed successfully and removed
    pub completed: Vec<String>,
    /// Tags left queued, with the failure reason
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

pub struct BackgroundSync {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    queue: Mutex<Vec<SyncTask>>,
    /// One drain at a time
    drain_lock: tokio::sync::Mutex<()>,
}

impl BackgroundSync {
    /// Restore the persisted queue. An unreadable record starts an empty queue.
    pub async fn open(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let queue = match store.get_record(SYNC_QUEUE_RECORD).await? {
            Some(bytes) => serde_json::from_slice::<Vec<SyncTask>>(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Sync queue unreadable, starting empty");
                Vec::new()
            }),
            None => Vec::new(),
        };
        if !queue.is_empty() {
            debug!(pending = queue.len(), "Sync queue restored");
        }
        Ok(Self {
            store,
            clock,
            queue: Mutex::new(queue),
            drain_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Queue `request` under `tag`.
    ///
    /// Re-enqueuing a known tag replaces its request in place: the task keeps
    /// its queue position and there is never a second task for the tag.
    pub async fn enqueue(&self, tag: &str, request: Request) -> Result<()> {
        {
            let mut queue = mutex_lock(&self.queue, "sync_enqueue");
            let now = self.clock.now();
            match queue.iter_mut().find(|t| t.tag == tag) {
                Some(existing) => {
                    debug!(tag, "Replacing queued sync task");
                    existing.request = request;
                    existing.enqueued_at = now;
                }
                None => queue.push(SyncTask {
                    tag: tag.to_string(),
                    request,
                    enqueued_at: now,
                    attempts: 0,
                }),
            }
        }
        info!(tag, "Sync task queued");
        self.persist().await
    }

    pub fn pending_tags(&self) -> Vec<String> {
        mutex_lock(&self.queue, "sync_pending_tags")
            .iter()
            .map(|t| t.tag.clone())
            .collect()
    }

    pub fn tasks(&self) -> Vec<SyncTask> {
        mutex_lock(&self.queue, "sync_tasks").clone()
    }

    /// Replay every queued task once, in insertion order.
    ///
    /// Success (2xx) removes the task; a transport failure or any other
    /// status leaves it queued for the next signal. A task re-enqueued while
    /// its replay was in flight keeps the newer request.
    pub async fn on_connectivity_restored(&self, network: &dyn NetworkClient) -> Result<SyncReport> {
        let _drain = self.drain_lock.lock().await;
        let snapshot = self.tasks();
        let mut report = SyncReport::default();

        if snapshot.is_empty() {
            return Ok(report);
        }
        info!(pending = snapshot.len(), "Connectivity restored, replaying sync queue");

        for task in snapshot {
            let failure = match network.fetch(&task.request).await {
                Ok(response) if response.is_success() => None,
                Ok(response) => Some(format!("status {}", response.status)),
                Err(e) => Some(e.to_string()),
            };

            {
                let mut queue = mutex_lock(&self.queue, "sync_drain");
                let position = queue
                    .iter()
                    .position(|t| t.tag == task.tag && t.request == task.request);
                match (&failure, position) {
                    (None, Some(i)) => {
                        queue.remove(i);
                    }
                    (Some(_), Some(i)) => queue[i].attempts += 1,
                    // Replaced or removed while in flight
                    (_, None) => {}
                }
            }

            match failure {
                None => {
                    debug!(tag = %task.tag, "Sync task replayed");
                    report.completed.push(task.tag);
                }
                Some(reason) => {
                    warn!(tag = %task.tag, reason = %reason, "Sync task failed, left queued");
                    report.failed.push((task.tag, reason));
                }
            }
            self.persist().await?;
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "Sync drain finished"
        );
        Ok(report)
    }

    async fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&*mutex_lock(&self.queue, "sync_persist"))?;
        self.store.put_record(SYNC_QUEUE_RECORD, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::Response;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedNetwork;

    const ORDERS: &str = "https://example.com/api/orders";
    const PROFILE: &str = "https://example.com/api/profile";

    async fn sync_with(store: Arc<MemoryStore>) -> BackgroundSync {
        BackgroundSync::open(store, Arc::new(SystemClock)).await.unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_by_tag_keeping_position() {
        let sync = sync_with(Arc::new(MemoryStore::new())).await;
        sync.enqueue("sync-orders", Request::post(ORDERS, "1").unwrap()).await.unwrap();
        sync.enqueue("sync-profile", Request::post(PROFILE, "p").unwrap()).await.unwrap();
        sync.enqueue("sync-orders", Request::post(ORDERS, "2").unwrap()).await.unwrap();

        assert_eq!(sync.pending_tags(), vec!["sync-orders", "sync-profile"]);
        assert_eq!(sync.tasks()[0].request.body, b"2".to_vec());
    }

    #[tokio::test]
    async fn test_drain_removes_successes_and_keeps_failures() {
        let sync = sync_with(Arc::new(MemoryStore::new())).await;
        let network = ScriptedNetwork::new();
        network.respond_ok(ORDERS, "created");
        network.respond(PROFILE, Response::new(500, "nope"));

        sync.enqueue("sync-orders", Request::post(ORDERS, "{}").unwrap()).await.unwrap();
        sync.enqueue("sync-profile", Request::post(PROFILE, "{}").unwrap()).await.unwrap();

        let report = sync.on_connectivity_restored(&network).await.unwrap();
        assert_eq!(report.completed, vec!["sync-orders"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(sync.pending_tags(), vec!["sync-profile"]);
        assert_eq!(sync.tasks()[0].attempts, 1);
        assert_eq!(network.calls(ORDERS), 1);
    }

    #[tokio::test]
    async fn test_each_signal_attempts_each_task_once() {
        let sync = sync_with(Arc::new(MemoryStore::new())).await;
        let network = ScriptedNetwork::new();
        network.set_offline(true);
        sync.enqueue("sync-orders", Request::post(ORDERS, "{}").unwrap()).await.unwrap();

        sync.on_connectivity_restored(&network).await.unwrap();
        sync.on_connectivity_restored(&network).await.unwrap();
        assert_eq!(network.calls(ORDERS), 2);
        assert_eq!(sync.tasks()[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_requeue_during_replay_keeps_newer_request() {
        let sync = Arc::new(sync_with(Arc::new(MemoryStore::new())).await);
        let network = Arc::new(ScriptedNetwork::new());
        network.respond_ok(ORDERS, "created");
        network.set_delay(Some(std::time::Duration::from_millis(200)));
        sync.enqueue("sync-orders", Request::post(ORDERS, "old").unwrap()).await.unwrap();

        let drain = {
            let sync = sync.clone();
            let network = network.clone();
            tokio::spawn(async move { sync.on_connectivity_restored(network.as_ref()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        sync.enqueue("sync-orders", Request::post(ORDERS, "new").unwrap()).await.unwrap();

        let report = drain.await.unwrap().unwrap();
        assert_eq!(report.completed, vec!["sync-orders"]);
        let tasks = sync.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].request.body, b"new".to_vec());
        assert_eq!(tasks[0].attempts, 0);
        assert_eq!(network.calls(ORDERS), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_makes_no_calls() {
        let sync = sync_with(Arc::new(MemoryStore::new())).await;
        let network = ScriptedNetwork::new();
        let report = sync.on_connectivity_restored(&network).await.unwrap();
        assert_eq!(report.attempted(), 0);
        assert_eq!(network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let store = Arc::new(MemoryStore::new());
        {
            let sync = sync_with(store.clone()).await;
            sync.enqueue("sync-orders", Request::post(ORDERS, "{}").unwrap()).await.unwrap();
        }
        let sync = sync_with(store).await;
        assert_eq!(sync.pending_tags(), vec!["sync-orders"]);
    }
}
