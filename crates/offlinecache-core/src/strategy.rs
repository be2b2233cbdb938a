//! Caching strategies.
//!
//! One strategy per request class, dispatched on `RequestClass::strategy()`:
//!
//! - cache-first (`static`): answer from cache without touching the network
//! - network-first (`api`): bounded fetch, cache as fallback
//! - stale-while-revalidate (`dynamic`): answer from cache, refresh in the
//!   background
//!
//! Entries are written only after a fetch has fully completed, so dropping an
//! `execute` future mid-fetch leaves the store untouched. Only successful
//! (2xx) GET responses are ever written.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::classifier::{RequestClass, Strategy};
use crate::error::{CacheError, Result};
use crate::generation::GenerationManager;
use crate::models::{CacheEntry, CacheKey, Partition, Request, Response, ResponseSource, Served};
use crate::network::NetworkClient;
use crate::utils::mutex_lock;

/// Default bound on the network-first primary attempt.
pub const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 5_000;

/// Outcome of one background revalidation, delivered over the engine's channel.
#[derive(Debug, Clone)]
pub struct RevalidationResult {
    pub key: CacheKey,
    pub outcome: RevalidationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// Fresh response written over the cached entry
    Updated { status: u16 },
    /// Network answered but the response was not stored (non-2xx or no active generation)
    NotStored { status: u16 },
    /// Fetch or write failed; the cached entry is unchanged
    Failed(CacheError),
}

/// Removes a key from the in-flight set when the refresh task ends, however it ends.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<CacheKey>>>,
    key: CacheKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        mutex_lock(&self.in_flight, "revalidate_done").remove(&self.key);
    }
}

pub struct StrategyEngine {
    generations: Arc<GenerationManager>,
    network: Arc<dyn NetworkClient>,
    network_timeout: Duration,
    in_flight: Arc<Mutex<HashSet<CacheKey>>>,
    revalidation_tx: mpsc::Sender<RevalidationResult>,
}

impl StrategyEngine {
    pub fn new(
        generations: Arc<GenerationManager>,
        network: Arc<dyn NetworkClient>,
        network_timeout: Duration,
        revalidation_tx: mpsc::Sender<RevalidationResult>,
    ) -> Self {
        Self {
            generations,
            network,
            network_timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            revalidation_tx,
        }
    }

    /// Number of background refreshes still running.
    pub fn revalidations_in_flight(&self) -> usize {
        mutex_lock(&self.in_flight, "revalidations_in_flight").len()
    }

    /// Serve a read-only request with the strategy bound to its class.
    ///
    /// Never fails: transport errors are recovered from cache or turned into
    /// a synthesized offline response.
    pub async fn execute(&self, request: &Request, class: RequestClass, key: CacheKey) -> Served {
        match class.strategy() {
            Strategy::CacheFirst => self.cache_first(request, class, key).await,
            Strategy::NetworkFirst => self.network_first(request, class, key).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, class, key).await,
        }
    }

    async fn cache_first(&self, request: &Request, class: RequestClass, key: CacheKey) -> Served {
        let partition = class.partition();
        if let Some(entry) = self.cached(partition, &key).await {
            debug!(%key, "Cache hit");
            return Served::from_cache(entry.response, class, entry.stored_at, false);
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.write_through(request, partition, key, &response).await;
                Served::from_network(response, Some(class))
            }
            Err(e) => {
                debug!(%key, error = %e, "Cache miss with no network");
                Served::synthesized(Response::unavailable(&key), ResponseSource::Offline, Some(class))
            }
        }
    }

    async fn network_first(&self, request: &Request, class: RequestClass, key: CacheKey) -> Served {
        let partition = class.partition();
        match self.fetch_bounded(request).await {
            Ok(response) => {
                self.write_through(request, partition, key, &response).await;
                Served::from_network(response, Some(class))
            }
            Err(e) => match self.cached(partition, &key).await {
                Some(entry) => {
                    info!(%key, error = %e, stored_at = %entry.stored_at, "Network failed, serving cached");
                    Served::from_cache(entry.response, class, entry.stored_at, true)
                }
                None => {
                    debug!(%key, error = %e, "Network failed with nothing cached");
                    Served::synthesized(Response::offline(&key, &e), ResponseSource::Offline, Some(class))
                }
            },
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &Request,
        class: RequestClass,
        key: CacheKey,
    ) -> Served {
        let partition = class.partition();
        if let Some(entry) = self.cached(partition, &key).await {
            self.spawn_revalidation(request, partition, key);
            return Served::from_cache(entry.response, class, entry.stored_at, false);
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.write_through(request, partition, key, &response).await;
                Served::from_network(response, Some(class))
            }
            Err(e) => Served::synthesized(Response::offline(&key, &e), ResponseSource::Offline, Some(class)),
        }
    }

    /// Start a background refresh for `key` unless one is already running.
    fn spawn_revalidation(&self, request: &Request, partition: Partition, key: CacheKey) {
        if !mutex_lock(&self.in_flight, "revalidate_start").insert(key.clone()) {
            debug!(%key, "Revalidation already in flight");
            return;
        }

        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            key: key.clone(),
        };
        let generations = self.generations.clone();
        let network = self.network.clone();
        let tx = self.revalidation_tx.clone();
        let request = request.clone();

        tokio::spawn(async move {
            let outcome = match network.fetch(&request).await {
                Ok(response) if response.is_success() && request.method == "GET" => {
                    match generations.store(partition, key.clone(), response.clone()).await {
                        Ok(true) => RevalidationOutcome::Updated { status: response.status },
                        Ok(false) => RevalidationOutcome::NotStored { status: response.status },
                        Err(e) => RevalidationOutcome::Failed(e),
                    }
                }
                Ok(response) => RevalidationOutcome::NotStored { status: response.status },
                Err(e) => RevalidationOutcome::Failed(e),
            };

            match &outcome {
                RevalidationOutcome::Failed(e) => warn!(%key, error = %e, "Background revalidation failed"),
                other => debug!(%key, outcome = ?other, "Background revalidation finished"),
            }

            drop(guard);
            // Nobody draining the channel is fine; the outcome was already logged
            if tx.try_send(RevalidationResult { key, outcome }).is_err() {
                debug!("Revalidation channel full or closed, dropping result");
            }
        });
    }

    async fn fetch_bounded(&self, request: &Request) -> Result<Response> {
        match tokio::time::timeout(self.network_timeout, self.network.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::network(format!(
                "{} {} timed out after {}ms",
                request.method,
                request.url,
                self.network_timeout.as_millis()
            ))),
        }
    }

    /// Active-generation lookup; a store failure reads as a miss.
    async fn cached(&self, partition: Partition, key: &CacheKey) -> Option<CacheEntry> {
        match self.generations.lookup(partition, key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, %partition, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a completed network response. Write failures never reach the caller.
    async fn write_through(
        &self,
        request: &Request,
        partition: Partition,
        key: CacheKey,
        response: &Response,
    ) {
        if !response.is_success() || request.method != "GET" {
            return;
        }
        if let Err(e) = self.generations.store(partition, key.clone(), response.clone()).await {
            warn!(%key, %partition, error = %e, "Cache write failed, response still served");
        }
    }
}
