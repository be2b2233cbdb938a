//! Fake collaborators for tests and offline replays.
//!
//! - `ScriptedNetwork`: answers from a per-URL script, counts calls, can be
//!   switched offline or slowed down
//! - `FailingStore`: a `MemoryStore` whose reads, writes or deletes can be
//!   made to fail

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::models::{BucketName, CacheEntry, CacheKey, Request, Response};
use crate::network::NetworkClient;
use crate::store::{CacheStore, MemoryStore};
use crate::utils::mutex_lock;

#[derive(Debug, Clone)]
enum Reply {
    Respond(Response),
    Unreachable,
    Reject,
}

/// Scripted network client keyed by full URL.
///
/// Unscripted URLs answer 404. While offline every call fails with
/// `NetworkUnavailable`, scripted or not.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<Request>>,
    total: AtomicUsize,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response` from now on.
    pub fn respond(&self, url: &str, response: Response) {
        mutex_lock(&self.replies, "scripted_respond").insert(url.to_string(), Reply::Respond(response));
    }

    /// Answer `url` with a 200 carrying `body`.
    pub fn respond_ok(&self, url: &str, body: &str) {
        self.respond(url, Response::new(200, body));
    }

    /// Fail `url` with a transport error from now on.
    pub fn unreachable(&self, url: &str) {
        mutex_lock(&self.replies, "scripted_unreachable").insert(url.to_string(), Reply::Unreachable);
    }

    /// Fail `url` with a non-transport error that a retry cannot fix.
    pub fn reject(&self, url: &str) {
        mutex_lock(&self.replies, "scripted_reject").insert(url.to_string(), Reply::Reject);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every reply, to hold fetches in flight.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *mutex_lock(&self.delay, "scripted_delay") = delay;
    }

    /// Number of fetches issued for `url`, including failed ones.
    pub fn calls(&self, url: &str) -> usize {
        mutex_lock(&self.calls, "scripted_calls")
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        mutex_lock(&self.requests, "scripted_requests").clone()
    }
}

#[async_trait]
impl NetworkClient for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let url = request.url.to_string();
        self.total.fetch_add(1, Ordering::SeqCst);
        *mutex_lock(&self.calls, "scripted_fetch").entry(url.clone()).or_default() += 1;
        mutex_lock(&self.requests, "scripted_fetch").push(request.clone());

        let delay = *mutex_lock(&self.delay, "scripted_fetch");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::network(format!("{}: offline", url)));
        }

        let reply = mutex_lock(&self.replies, "scripted_fetch").get(&url).cloned();
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Unreachable) => Err(CacheError::network(format!("{}: unreachable", url))),
            Some(Reply::Reject) => Err(CacheError::InvalidRequest(format!("{}: rejected", url))),
            None => Ok(Response::new(404, "not found")),
        }
    }
}

/// Memory store with switchable failure injection.
///
/// `fail_writes` affects entry writes only; control records stay writable so
/// the generation table and sync queue can still be persisted.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn entry_count(&self) -> usize {
        self.inner.entry_count().await
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, bucket: &BucketName, key: &CacheKey) -> Result<Option<CacheEntry>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::storage(format!("read {} refused", bucket)));
        }
        self.inner.get(bucket, key).await
    }

    async fn put(&self, bucket: &BucketName, entry: CacheEntry) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::storage(format!("write {} refused", bucket)));
        }
        self.inner.put(bucket, entry).await
    }

    async fn keys(&self, bucket: &BucketName) -> Result<Vec<CacheKey>> {
        self.inner.keys(bucket).await
    }

    async fn buckets(&self) -> Result<Vec<BucketName>> {
        self.inner.buckets().await
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CacheError::storage(format!("delete {} refused", bucket)));
        }
        self.inner.delete_bucket(bucket).await
    }

    async fn get_record(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get_record(name).await
    }

    async fn put_record(&self, name: &str, value: Vec<u8>) -> Result<()> {
        self.inner.put_record(name, value).await
    }
}
