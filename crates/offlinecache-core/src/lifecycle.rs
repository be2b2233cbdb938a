//! Install → waiting → active state machine and the control-message surface.
//!
//! Every lifecycle operation (install, activation, clear) runs under one async
//! mutex, so generation population, activation and garbage collection never
//! interleave. The current state itself lives in a std mutex that is never
//! held across an await.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::generation::GenerationManager;
use crate::models::{CacheKey, GenerationId, Partition, Request, Response};
use crate::network::NetworkClient;
use crate::utils::mutex_lock;

/// Max concurrent precache fetches per partition.
const MAX_CONCURRENT_PRECACHE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Uninitialized,
    Installing,
    /// Installed and complete, held back while clients still use the old generation
    Waiting,
    Active,
}

/// Fire-and-forget commands from the presentation layer.
///
/// Wire form: `{"type":"SKIP_WAITING"}` / `{"type":"CLEAR_CACHE"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    ClearCache,
}

impl ControlMessage {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| CacheError::InvalidRequest(format!("unrecognized control message: {}", e)))
    }
}

/// A deployment to install: its version and the URLs to precache per partition.
///
/// Every generation declares all three partitions; a partition without
/// precache URLs is populated empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub precache: BTreeMap<Partition, Vec<String>>,
}

impl Deployment {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            precache: BTreeMap::new(),
        }
    }

    pub fn with_precache(mut self, partition: Partition, urls: &[&str]) -> Self {
        self.precache
            .entry(partition)
            .or_default()
            .extend(urls.iter().map(|u| u.to_string()));
        self
    }
}

#[derive(Debug)]
struct ControllerState {
    state: LifecycleState,
    waiting: Option<GenerationId>,
    clients: usize,
}

pub struct LifecycleController {
    generations: Arc<GenerationManager>,
    network: Arc<dyn NetworkClient>,
    vary_headers: Vec<String>,
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<ControllerState>,
}

impl LifecycleController {
    pub fn new(
        generations: Arc<GenerationManager>,
        network: Arc<dyn NetworkClient>,
        vary_headers: Vec<String>,
    ) -> Self {
        let state = if generations.active().is_some() {
            LifecycleState::Active
        } else {
            LifecycleState::Uninitialized
        };
        Self {
            generations,
            network,
            vary_headers,
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(ControllerState {
                state,
                waiting: None,
                clients: 0,
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        mutex_lock(&self.state, "lifecycle_state").state
    }

    /// The generation installed and waiting for activation, if any.
    pub fn waiting_generation(&self) -> Option<GenerationId> {
        mutex_lock(&self.state, "waiting_generation").waiting
    }

    pub fn clients(&self) -> usize {
        mutex_lock(&self.state, "clients").clients
    }

    // =========================================================================
    // Install
    // =========================================================================

    /// Install a deployment and activate it when nothing holds it back.
    ///
    /// Returns the state reached: `Active` when activation happened right
    /// away, `Waiting` when attached clients still depend on the previous
    /// generation. On `PopulationFailed` the new generation is discarded and
    /// the previous active generation stays authoritative.
    pub async fn install(&self, deployment: &Deployment) -> Result<LifecycleState> {
        let _op = self.op_lock.lock().await;

        if self.generations.active_version().as_deref() == Some(deployment.version.as_str()) {
            debug!(version = %deployment.version, "Deployment already active");
            return Ok(self.state());
        }

        self.set_state(LifecycleState::Installing, None);
        info!(version = %deployment.version, "Installing deployment");

        let id = match self.generations.begin_install(&deployment.version, &Partition::ALL).await {
            Ok(id) => id,
            Err(e) => {
                self.restore_state();
                return Err(e);
            }
        };

        if let Err(e) = self.precache(id, deployment).await {
            self.restore_state();
            return Err(e);
        }

        self.set_state(LifecycleState::Waiting, Some(id));
        let holds = self.generations.active().is_some() && self.clients() > 0;
        if holds {
            info!(generation = %id, clients = self.clients(), "Installed, waiting for clients to release");
            return Ok(LifecycleState::Waiting);
        }
        self.activate_waiting().await
    }

    async fn precache(&self, id: GenerationId, deployment: &Deployment) -> Result<()> {
        let populated = self
            .generations
            .generation(id)
            .map(|g| g.populated)
            .unwrap_or_default();

        for partition in Partition::ALL {
            if populated.contains(&partition) {
                continue;
            }
            let urls = deployment.precache.get(&partition).cloned().unwrap_or_default();
            let entries = match self.fetch_all(&urls).await {
                Ok(entries) => entries,
                Err(reason) => {
                    return Err(self.generations.fail_population(id, partition, &reason).await);
                }
            };
            self.generations.populate(id, partition, entries).await?;
        }
        Ok(())
    }

    /// Fetch every precache URL. Any transport failure or non-2xx aborts.
    async fn fetch_all(&self, urls: &[String]) -> std::result::Result<Vec<(CacheKey, Response)>, String> {
        let mut requests = Vec::with_capacity(urls.len());
        for url in urls {
            requests.push(Request::get(url).map_err(|e| e.to_string())?);
        }

        let mut entries = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(MAX_CONCURRENT_PRECACHE) {
            let futures: Vec<_> = chunk.iter().map(|r| self.network.fetch(r)).collect();
            let results = futures::future::join_all(futures).await;

            for (request, result) in chunk.iter().zip(results) {
                match result {
                    Ok(response) if response.is_success() => {
                        entries.push((request.cache_key(&self.vary_headers), response));
                    }
                    Ok(response) => {
                        return Err(format!("{} answered {}", request.url, response.status));
                    }
                    Err(e) => return Err(e.to_string()),
                }
            }
        }
        Ok(entries)
    }

    // =========================================================================
    // Activation
    // =========================================================================

    /// Force the waiting generation active regardless of attached clients.
    pub async fn skip_waiting(&self) -> Result<LifecycleState> {
        let _op = self.op_lock.lock().await;
        if self.state() != LifecycleState::Waiting {
            debug!(state = ?self.state(), "Nothing waiting, skip-waiting ignored");
            return Ok(self.state());
        }
        self.activate_waiting().await
    }

    /// A client started depending on the active generation.
    pub fn attach_client(&self) -> usize {
        let mut state = mutex_lock(&self.state, "attach_client");
        state.clients += 1;
        state.clients
    }

    /// A client went away; the last one out lets a waiting generation activate.
    pub async fn release_client(&self) -> Result<LifecycleState> {
        let remaining = {
            let mut state = mutex_lock(&self.state, "release_client");
            state.clients = state.clients.saturating_sub(1);
            state.clients
        };
        if remaining > 0 {
            return Ok(self.state());
        }

        let _op = self.op_lock.lock().await;
        // Re-check under the op lock: a client may have attached meanwhile
        if self.state() == LifecycleState::Waiting && self.clients() == 0 {
            return self.activate_waiting().await;
        }
        Ok(self.state())
    }

    /// Activate the waiting generation, then reclaim everything older.
    ///
    /// Callers hold the op lock. A GC failure is logged; the cutover stands.
    async fn activate_waiting(&self) -> Result<LifecycleState> {
        let Some(id) = self.waiting_generation() else {
            return Ok(self.state());
        };

        match self.generations.activate(id).await {
            Ok(superseded) => {
                self.set_state(LifecycleState::Active, None);
                info!(generation = %id, superseded = ?superseded, "Lifecycle active");
            }
            Err(e) => {
                self.restore_state();
                return Err(e);
            }
        }

        if let Err(e) = self.generations.collect_garbage().await {
            warn!(error = %e, "Garbage collection after activation failed");
        }
        Ok(LifecycleState::Active)
    }

    // =========================================================================
    // Control messages
    // =========================================================================

    pub async fn handle_message(&self, message: ControlMessage) -> Result<LifecycleState> {
        debug!(message = ?message, "Control message");
        match message {
            ControlMessage::SkipWaiting => self.skip_waiting().await,
            ControlMessage::ClearCache => {
                self.clear_cache().await?;
                Ok(LifecycleState::Uninitialized)
            }
        }
    }

    /// Delete every generation and bucket; the next install starts from scratch.
    pub async fn clear_cache(&self) -> Result<usize> {
        let _op = self.op_lock.lock().await;
        let result = self.generations.clear_all().await;
        // Whatever survived a failed clear is unreachable without a table entry
        self.set_state(LifecycleState::Uninitialized, None);
        result
    }

    fn set_state(&self, next: LifecycleState, waiting: Option<GenerationId>) {
        let mut state = mutex_lock(&self.state, "set_state");
        if state.state != next {
            debug!(from = ?state.state, to = ?next, "Lifecycle transition");
        }
        state.state = next;
        state.waiting = waiting;
    }

    /// Fall back after a failed install or activation.
    fn restore_state(&self) {
        let state = if self.generations.active().is_some() {
            LifecycleState::Active
        } else {
            LifecycleState::Uninitialized
        };
        self.set_state(state, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedNetwork;

    const APP_JS: &str = "https://example.com/static/app.js";
    const INDEX: &str = "https://example.com/";

    async fn controller() -> (LifecycleController, Arc<GenerationManager>, Arc<ScriptedNetwork>) {
        let generations = Arc::new(
            GenerationManager::open("test", Arc::new(MemoryStore::new()), Arc::new(SystemClock))
                .await
                .unwrap(),
        );
        let network = Arc::new(ScriptedNetwork::new());
        network.respond_ok(APP_JS, "v1");
        network.respond_ok(INDEX, "<html>");
        let controller = LifecycleController::new(generations.clone(), network.clone(), vec![]);
        (controller, generations, network)
    }

    fn deployment(version: &str) -> Deployment {
        Deployment::new(version)
            .with_precache(Partition::Static, &[APP_JS])
            .with_precache(Partition::Dynamic, &[INDEX])
    }

    #[test]
    fn test_control_message_wire_format() {
        assert_eq!(
            ControlMessage::parse(br#"{"type":"SKIP_WAITING"}"#).unwrap(),
            ControlMessage::SkipWaiting
        );
        assert_eq!(
            ControlMessage::parse(br#"{"type":"CLEAR_CACHE"}"#).unwrap(),
            ControlMessage::ClearCache
        );
        assert_eq!(
            ControlMessage::parse(br#"{"type":"REBOOT"}"#).unwrap_err().kind(),
            "invalid_request"
        );
        assert_eq!(
            serde_json::to_string(&ControlMessage::SkipWaiting).unwrap(),
            r#"{"type":"SKIP_WAITING"}"#
        );
    }

    #[tokio::test]
    async fn test_first_install_activates_immediately() {
        let (lc, generations, _) = controller().await;
        assert_eq!(lc.state(), LifecycleState::Uninitialized);

        assert_eq!(lc.install(&deployment("1")).await.unwrap(), LifecycleState::Active);
        let active = generations.active().unwrap();
        let key = Request::get(APP_JS).unwrap().cache_key(&[]);
        let entry = generations.lookup(Partition::Static, &key).await.unwrap().unwrap();
        assert_eq!(entry.generation, active);
        assert_eq!(entry.response.text(), "v1");
    }

    #[tokio::test]
    async fn test_update_waits_for_clients_then_activates() {
        let (lc, generations, _) = controller().await;
        lc.install(&deployment("1")).await.unwrap();
        let g1 = generations.active().unwrap();

        lc.attach_client();
        lc.attach_client();
        assert_eq!(lc.install(&deployment("2")).await.unwrap(), LifecycleState::Waiting);
        assert_eq!(generations.active(), Some(g1));

        assert_eq!(lc.release_client().await.unwrap(), LifecycleState::Waiting);
        assert_eq!(lc.release_client().await.unwrap(), LifecycleState::Active);
        assert_ne!(generations.active(), Some(g1));
        // Superseded generation reclaimed on activation
        assert!(generations.generation(g1).is_none());
    }

    #[tokio::test]
    async fn test_skip_waiting_forces_activation() {
        let (lc, generations, _) = controller().await;
        lc.install(&deployment("1")).await.unwrap();
        lc.attach_client();
        lc.install(&deployment("2")).await.unwrap();
        let waiting = lc.waiting_generation().unwrap();

        assert_eq!(
            lc.handle_message(ControlMessage::SkipWaiting).await.unwrap(),
            LifecycleState::Active
        );
        assert_eq!(generations.active(), Some(waiting));
        // Second skip is a no-op
        assert_eq!(lc.skip_waiting().await.unwrap(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_failed_precache_keeps_previous_generation() {
        let (lc, generations, network) = controller().await;
        lc.install(&deployment("1")).await.unwrap();
        let g1 = generations.active().unwrap();

        network.unreachable(APP_JS);
        let err = lc.install(&deployment("2")).await.unwrap_err();
        assert!(matches!(err, CacheError::PopulationFailed { partition: Partition::Static, .. }));
        assert_eq!(lc.state(), LifecycleState::Active);
        assert_eq!(generations.active(), Some(g1));
        assert_eq!(generations.installing(), None);
    }

    #[tokio::test]
    async fn test_non_success_precache_aborts_first_install() {
        let (lc, generations, network) = controller().await;
        network.respond(INDEX, Response::new(500, "down"));

        let err = lc.install(&deployment("1")).await.unwrap_err();
        assert_eq!(err.kind(), "population_failed");
        assert_eq!(lc.state(), LifecycleState::Uninitialized);
        assert!(generations.generations().is_empty());
    }

    #[tokio::test]
    async fn test_reinstalling_active_version_is_noop() {
        let (lc, generations, network) = controller().await;
        lc.install(&deployment("1")).await.unwrap();
        let calls = network.total_calls();
        lc.install(&deployment("1")).await.unwrap();
        assert_eq!(network.total_calls(), calls);
        assert_eq!(generations.generations().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_resets_to_uninitialized() {
        let (lc, generations, _) = controller().await;
        lc.install(&deployment("1")).await.unwrap();

        assert_eq!(
            lc.handle_message(ControlMessage::ClearCache).await.unwrap(),
            LifecycleState::Uninitialized
        );
        assert_eq!(generations.active(), None);

        // Next install starts a fresh cycle
        assert_eq!(lc.install(&deployment("1")).await.unwrap(), LifecycleState::Active);
    }
}
