//! The cache manager: one explicit instance wiring every component together.
//!
//! Built from injected collaborators (store, network client, clock) and a
//! `CacheConfig`. Hosts feed it requests, lifecycle events, control
//! messages, connectivity-restore signals and push payloads.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::classifier::{Classification, PassthroughReason, RequestClassifier};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::generation::{Generation, GenerationManager};
use crate::lifecycle::{ControlMessage, Deployment, LifecycleController, LifecycleState};
use crate::models::{CacheKey, GenerationId, Partition, Request, Response, ResponseSource, Served};
use crate::network::NetworkClient;
use crate::push::{NavigationIntent, NotificationDescriptor, PushRouter};
use crate::store::CacheStore;
use crate::strategy::{RevalidationResult, StrategyEngine};
use crate::sync::{BackgroundSync, SyncReport, SyncTask};
use crate::utils::mutex_lock;

pub struct CacheManager {
    config: CacheConfig,
    classifier: RequestClassifier,
    network: Arc<dyn NetworkClient>,
    generations: Arc<GenerationManager>,
    strategies: StrategyEngine,
    lifecycle: LifecycleController,
    sync: BackgroundSync,
    push: PushRouter,
    revalidation_rx: Mutex<mpsc::Receiver<RevalidationResult>>,
}

impl CacheManager {
    /// Open the manager, restoring generations and the sync queue from `store`.
    pub async fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn NetworkClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let generations =
            Arc::new(GenerationManager::open(&config.cache_name, store.clone(), clock.clone()).await?);
        let sync = BackgroundSync::open(store, clock).await?;

        let (tx, rx) = mpsc::channel(config.revalidation_buffer.max(1));
        let strategies = StrategyEngine::new(
            generations.clone(),
            network.clone(),
            config.network_timeout(),
            tx,
        );
        let lifecycle =
            LifecycleController::new(generations.clone(), network.clone(), config.vary_headers.clone());

        info!(
            cache = %config.cache_name,
            active = ?generations.active(),
            pending_sync = sync.pending_tags().len(),
            "Cache manager ready"
        );

        Ok(Self {
            classifier: RequestClassifier::new(&config.classifier),
            push: PushRouter::new(config.push.clone()),
            config,
            network,
            generations,
            strategies,
            lifecycle,
            sync,
            revalidation_rx: Mutex::new(rx),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // =========================================================================
    // Interception
    // =========================================================================

    pub fn classify(&self, request: &Request) -> Classification {
        self.classifier.classify(request)
    }

    /// Serve one outbound request.
    ///
    /// Read-only network requests always resolve (cached, fresh, or a
    /// synthesized offline response). Everything else is forwarded as is;
    /// a mutating request that fails for lack of connectivity is queued for
    /// background sync and answered with a `Queued` response. Errors only
    /// come back for forwarded requests that fail for other reasons.
    pub async fn intercept(&self, request: &Request) -> Result<Served> {
        match self.classifier.classify(request) {
            Classification::Cached(class) => {
                let key = request.cache_key(&self.config.vary_headers);
                debug!(%key, class = ?class, "Intercepted");
                Ok(self.strategies.execute(request, class, key).await)
            }
            Classification::Passthrough(PassthroughReason::Mutating) => {
                self.forward_mutating(request).await
            }
            Classification::Passthrough(PassthroughReason::NonNetworkScheme) => {
                debug!(url = %request.url, "Non-network scheme, passing through");
                Ok(Served::passthrough(self.network.fetch(request).await?))
            }
        }
    }

    async fn forward_mutating(&self, request: &Request) -> Result<Served> {
        match self.network.fetch(request).await {
            Ok(response) => Ok(Served::passthrough(response)),
            Err(CacheError::NetworkUnavailable(reason)) => {
                let tag = request.sync_tag();
                info!(tag = %tag, reason = %reason, "Mutating request failed offline, deferring");
                if let Err(e) = self.sync.enqueue(&tag, request.clone()).await {
                    // Still queued in memory; only persistence failed
                    warn!(tag = %tag, error = %e, "Failed to persist sync queue");
                }
                Ok(Served::synthesized(
                    Response::queued(&tag),
                    ResponseSource::Queued,
                    None,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Finished background revalidations since the last call.
    pub fn drain_revalidations(&self) -> Vec<RevalidationResult> {
        let mut rx = mutex_lock(&self.revalidation_rx, "drain_revalidations");
        let mut results = Vec::new();
        while let Ok(result) = rx.try_recv() {
            results.push(result);
        }
        results
    }

    pub fn revalidations_in_flight(&self) -> usize {
        self.strategies.revalidations_in_flight()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn install(&self, deployment: &Deployment) -> Result<LifecycleState> {
        self.lifecycle.install(deployment).await
    }

    pub fn attach_client(&self) -> usize {
        self.lifecycle.attach_client()
    }

    pub async fn release_client(&self) -> Result<LifecycleState> {
        self.lifecycle.release_client().await
    }

    pub async fn handle_message(&self, message: ControlMessage) -> Result<LifecycleState> {
        self.lifecycle.handle_message(message).await
    }

    /// Parse and handle a raw control message (`{"type":"SKIP_WAITING"}`, ...).
    pub async fn handle_raw_message(&self, raw: &[u8]) -> Result<LifecycleState> {
        self.handle_message(ControlMessage::parse(raw)?).await
    }

    /// UI entry point for CLEAR_CACHE.
    pub async fn clear_all(&self) -> Result<()> {
        self.lifecycle.clear_cache().await.map(|_| ())
    }

    /// UI entry point for SKIP_WAITING.
    pub async fn force_update(&self) -> Result<LifecycleState> {
        self.lifecycle.skip_waiting().await
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn active_generation(&self) -> Option<GenerationId> {
        self.generations.active()
    }

    pub fn active_version(&self) -> Option<String> {
        self.generations.active_version()
    }

    pub fn generations(&self) -> Vec<Generation> {
        self.generations.generations()
    }

    /// Keys held by the active generation in `partition`.
    pub async fn cached_keys(&self, partition: Partition) -> Result<Vec<CacheKey>> {
        self.generations.keys(partition).await
    }

    // =========================================================================
    // Background sync
    // =========================================================================

    pub async fn register_sync_task(&self, tag: &str, request: Request) -> Result<()> {
        self.sync.enqueue(tag, request).await
    }

    pub async fn on_connectivity_restored(&self) -> Result<SyncReport> {
        self.sync.on_connectivity_restored(self.network.as_ref()).await
    }

    pub fn pending_sync_tags(&self) -> Vec<String> {
        self.sync.pending_tags()
    }

    pub fn sync_tasks(&self) -> Vec<SyncTask> {
        self.sync.tasks()
    }

    // =========================================================================
    // Push
    // =========================================================================

    pub fn on_push(&self, payload: &[u8]) -> NotificationDescriptor {
        self.push.on_push(payload)
    }

    pub fn on_notification_action(
        &self,
        action: &str,
        notification: &NotificationDescriptor,
    ) -> NavigationIntent {
        self.push.on_notification_action(action, notification)
    }
}
