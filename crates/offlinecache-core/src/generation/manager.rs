use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::models::{BucketName, CacheEntry, CacheKey, GenerationId, Partition, Response};
use crate::store::CacheStore;
use crate::utils::{mutex_lock, rw_read, rw_write};

/// Store record holding the serialized generation table.
const GENERATIONS_RECORD: &str = "generations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Installing,
    Active,
    Superseded,
}

/// One versioned snapshot of all partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub id: GenerationId,
    /// Deployment version that created this generation
    pub version: String,
    /// Partitions that must be populated before activation
    pub partitions: BTreeSet<Partition>,
    pub populated: BTreeSet<Partition>,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Generation {
    pub fn missing_partitions(&self) -> Vec<Partition> {
        self.partitions.difference(&self.populated).copied().collect()
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(from = "TableRecord", into = "TableRecord")]
struct GenerationTable {
    generations: BTreeMap<GenerationId, Generation>,
    /// Highest id ever handed out; ids are never reused, even after a clear
    last_id: u64,
}

/// On-disk shape of the table: a plain list keeps the JSON keys as strings.
#[derive(Serialize, Deserialize)]
struct TableRecord {
    generations: Vec<Generation>,
    last_id: u64,
}

impl From<TableRecord> for GenerationTable {
    fn from(record: TableRecord) -> Self {
        let last_id = record
            .generations
            .iter()
            .map(|g| g.id.0)
            .fold(record.last_id, u64::max);
        Self {
            generations: record.generations.into_iter().map(|g| (g.id, g)).collect(),
            last_id,
        }
    }
}

impl From<GenerationTable> for TableRecord {
    fn from(table: GenerationTable) -> Self {
        Self {
            generations: table.generations.into_values().collect(),
            last_id: table.last_id,
        }
    }
}

impl GenerationTable {
    fn active(&self) -> Option<&Generation> {
        self.generations
            .values()
            .find(|g| g.status == GenerationStatus::Active)
    }

    fn installing(&self) -> Option<&Generation> {
        self.generations
            .values()
            .find(|g| g.status == GenerationStatus::Installing)
    }
}

/// Outcome of a garbage collection pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub deleted_buckets: Vec<BucketName>,
    pub removed_generations: Vec<GenerationId>,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.deleted_buckets.is_empty() && self.removed_generations.is_empty()
    }
}

/// Owns the partitioned cache generations.
///
/// The generation table lives behind a std `RwLock` that is only ever held
/// for non-suspending critical sections; activation flips the old and new
/// statuses inside a single write section, so readers always observe
/// exactly one active generation (or none before the first activation).
///
/// `begin_install`, `populate`, `activate`, `collect_garbage` and
/// `clear_all` are expected to be serialized by the caller (the lifecycle
/// controller holds one async mutex around them).
pub struct GenerationManager {
    cache_name: String,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    table: RwLock<GenerationTable>,
    /// Population failures waiting to be reported by `activate`
    failures: Mutex<HashMap<GenerationId, (Partition, String)>>,
}

impl GenerationManager {
    /// Restore the generation table from the store.
    ///
    /// A generation that was still installing when the table was saved is
    /// half-populated by definition and is discarded.
    pub async fn open(
        cache_name: &str,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let table = match store.get_record(GENERATIONS_RECORD).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<GenerationTable>(&bytes) {
                Ok(table) => table,
                Err(e) => {
                    warn!(error = %e, "Generation table unreadable, starting empty");
                    GenerationTable::default()
                }
            },
            Ok(None) => GenerationTable::default(),
            Err(e) => return Err(e),
        };

        let manager = Self {
            cache_name: cache_name.to_string(),
            store,
            clock,
            table: RwLock::new(table),
            failures: Mutex::new(HashMap::new()),
        };

        if let Some(stale) = manager.installing() {
            info!(generation = %stale, "Discarding generation left mid-install");
            manager.discard(stale).await;
            manager.persist().await?;
        }

        debug!(active = ?manager.active(), "Generation table restored");
        Ok(manager)
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn bucket(&self, generation: GenerationId, partition: Partition) -> BucketName {
        BucketName::new(&self.cache_name, generation, partition)
    }

    pub fn active(&self) -> Option<GenerationId> {
        rw_read(&self.table, "active").active().map(|g| g.id)
    }

    pub fn active_version(&self) -> Option<String> {
        rw_read(&self.table, "active_version")
            .active()
            .map(|g| g.version.clone())
    }

    pub fn installing(&self) -> Option<GenerationId> {
        rw_read(&self.table, "installing").installing().map(|g| g.id)
    }

    pub fn generation(&self, id: GenerationId) -> Option<Generation> {
        rw_read(&self.table, "generation").generations.get(&id).cloned()
    }

    /// Snapshot of every known generation, oldest first.
    pub fn generations(&self) -> Vec<Generation> {
        rw_read(&self.table, "generations")
            .generations
            .values()
            .cloned()
            .collect()
    }

    // =========================================================================
    // Install / activate
    // =========================================================================

    /// Create a new `installing` generation for a deployment version.
    ///
    /// Idempotent per version: if a generation for `version` is already
    /// installing or active, its id is returned and nothing is created. A
    /// stale installing generation for a different version is discarded
    /// first, so at most one generation is ever installing.
    pub async fn begin_install(
        &self,
        version: &str,
        partitions: &[Partition],
    ) -> Result<GenerationId> {
        let (id, replaced) = {
            let mut table = rw_write(&self.table, "begin_install");

            if let Some(existing) = table.generations.values().find(|g| {
                g.version == version
                    && matches!(g.status, GenerationStatus::Installing | GenerationStatus::Active)
            }) {
                debug!(generation = %existing.id, version, "Install already known for version");
                return Ok(existing.id);
            }

            let replaced = table.installing().map(|g| g.id);
            if let Some(old) = replaced {
                table.generations.remove(&old);
            }
            // Failures of earlier installs can no longer be activated
            mutex_lock(&self.failures, "begin_install").clear();

            let id = GenerationId(table.last_id).next();
            table.last_id = id.0;
            table.generations.insert(
                id,
                Generation {
                    id,
                    version: version.to_string(),
                    partitions: partitions.iter().copied().collect(),
                    populated: BTreeSet::new(),
                    status: GenerationStatus::Installing,
                    created_at: self.clock.now(),
                    activated_at: None,
                },
            );
            (id, replaced)
        };

        if let Some(old) = replaced {
            info!(generation = %old, "Replacing unfinished install");
            self.delete_generation_buckets(old).await;
        }

        info!(generation = %id, version, "Install started");
        self.persist().await?;
        Ok(id)
    }

    /// Fill one declared partition of an installing generation.
    ///
    /// Any store failure discards the whole generation; the failure is then
    /// reported by this call and again by a later `activate` of the same id.
    pub async fn populate(
        &self,
        id: GenerationId,
        partition: Partition,
        entries: Vec<(CacheKey, Response)>,
    ) -> Result<()> {
        self.require_installing(id, partition)?;

        let bucket = self.bucket(id, partition);
        let stored_at = self.clock.now();
        let count = entries.len();

        for (key, response) in entries {
            let entry = CacheEntry {
                key,
                response,
                partition,
                generation: id,
                stored_at,
            };
            if let Err(e) = self.store.put(&bucket, entry).await {
                return Err(self.fail_population(id, partition, &e.to_string()).await);
            }
        }

        let recorded = {
            let mut table = rw_write(&self.table, "populate");
            match table.generations.get_mut(&id) {
                Some(generation) if generation.status == GenerationStatus::Installing => {
                    generation.populated.insert(partition);
                    true
                }
                _ => false,
            }
        };
        if !recorded {
            // Replaced by a newer install while we were writing
            self.delete_generation_buckets(id).await;
            return Err(CacheError::UnknownGeneration(id));
        }

        debug!(generation = %id, %partition, count, "Partition populated");
        self.persist().await?;
        Ok(())
    }

    /// Abort an install: discard the generation and build the error to surface.
    pub async fn fail_population(
        &self,
        id: GenerationId,
        partition: Partition,
        reason: &str,
    ) -> CacheError {
        warn!(generation = %id, %partition, reason, "Population failed, discarding generation");
        mutex_lock(&self.failures, "fail_population").insert(id, (partition, reason.to_string()));
        self.discard(id).await;
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to persist generation table after discard");
        }
        CacheError::PopulationFailed {
            generation: id,
            partition,
            reason: reason.to_string(),
        }
    }

    /// Atomically make `id` the active generation.
    ///
    /// Returns the generation it superseded, if any. Fails with
    /// `PopulationFailed` (discarding `id`) when a declared partition is not
    /// populated or an earlier population of it failed.
    pub async fn activate(&self, id: GenerationId) -> Result<Option<GenerationId>> {
        if let Some((partition, reason)) = mutex_lock(&self.failures, "activate").remove(&id) {
            return Err(CacheError::PopulationFailed {
                generation: id,
                partition,
                reason,
            });
        }

        let outcome = {
            let mut table = rw_write(&self.table, "activate");
            let now = self.clock.now();

            let target = table
                .generations
                .get(&id)
                .ok_or(CacheError::UnknownGeneration(id))?;

            match target.status {
                GenerationStatus::Active => return Ok(None),
                GenerationStatus::Superseded => {
                    return Err(CacheError::InvalidState(format!(
                        "generation {} is superseded and cannot be reactivated",
                        id
                    )))
                }
                GenerationStatus::Installing => {}
            }

            if let Some(partition) = target.missing_partitions().first().copied() {
                Err(partition)
            } else {
                let previous = table.active().map(|g| g.id);
                if let Some(prev) = previous.and_then(|p| table.generations.get_mut(&p)) {
                    prev.status = GenerationStatus::Superseded;
                }
                if let Some(next) = table.generations.get_mut(&id) {
                    next.status = GenerationStatus::Active;
                    next.activated_at = Some(now);
                }
                Ok(previous)
            }
        };

        match outcome {
            Ok(previous) => {
                info!(generation = %id, superseded = ?previous, "Generation activated");
                self.persist().await?;
                Ok(previous)
            }
            Err(partition) => {
                let error = self.fail_population(id, partition, "partition not populated").await;
                // Reported now, not again on a retry
                mutex_lock(&self.failures, "activate").remove(&id);
                Err(error)
            }
        }
    }

    // =========================================================================
    // Reclamation
    // =========================================================================

    /// Delete every bucket that does not belong to the active generation (or
    /// the one currently installing) and forget superseded generations.
    ///
    /// Safe to call at any time; a second call is a no-op.
    pub async fn collect_garbage(&self) -> Result<GcReport> {
        let (keep, removed_generations) = {
            let mut table = rw_write(&self.table, "collect_garbage");
            let removed: Vec<GenerationId> = table
                .generations
                .values()
                .filter(|g| g.status == GenerationStatus::Superseded)
                .map(|g| g.id)
                .collect();
            for id in &removed {
                table.generations.remove(id);
            }
            let keep: BTreeSet<GenerationId> = table.generations.keys().copied().collect();
            (keep, removed)
        };
        // Leftover buckets of a failed sweep are caught by the next one
        if !removed_generations.is_empty() {
            self.persist().await?;
        }

        let mut report = GcReport {
            removed_generations,
            ..Default::default()
        };

        for bucket in self.store.buckets().await? {
            if bucket.cache_name != self.cache_name || keep.contains(&bucket.generation) {
                continue;
            }
            if self.store.delete_bucket(&bucket).await? {
                report.deleted_buckets.push(bucket);
            }
        }

        if !report.is_empty() {
            info!(
                buckets = report.deleted_buckets.len(),
                generations = report.removed_generations.len(),
                "Garbage collected"
            );
        }
        Ok(report)
    }

    /// Delete every generation and bucket unconditionally.
    pub async fn clear_all(&self) -> Result<usize> {
        {
            let mut table = rw_write(&self.table, "clear_all");
            table.generations.clear();
        }
        mutex_lock(&self.failures, "clear_all").clear();
        self.persist().await?;

        let mut deleted = 0;
        for bucket in self.store.buckets().await? {
            if bucket.cache_name == self.cache_name && self.store.delete_bucket(&bucket).await? {
                deleted += 1;
            }
        }

        info!(buckets = deleted, "Cache cleared");
        Ok(deleted)
    }

    // =========================================================================
    // Entry access (active generation)
    // =========================================================================

    /// Look up `key` in the active generation's `partition`.
    pub async fn lookup(&self, partition: Partition, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let Some(active) = self.active() else {
            return Ok(None);
        };
        self.store.get(&self.bucket(active, partition), key).await
    }

    /// Write a response into the active generation's `partition`.
    ///
    /// Returns `Ok(false)` when there is no active generation to write into.
    pub async fn store(&self, partition: Partition, key: CacheKey, response: Response) -> Result<bool> {
        let Some(active) = self.active() else {
            debug!(%key, "No active generation, skipping cache write");
            return Ok(false);
        };
        let entry = CacheEntry {
            key,
            response,
            partition,
            generation: active,
            stored_at: self.clock.now(),
        };
        self.store.put(&self.bucket(active, partition), entry).await?;
        Ok(true)
    }

    /// Keys stored in the active generation's `partition`.
    pub async fn keys(&self, partition: Partition) -> Result<Vec<CacheKey>> {
        match self.active() {
            Some(active) => self.store.keys(&self.bucket(active, partition)).await,
            None => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn require_installing(&self, id: GenerationId, partition: Partition) -> Result<()> {
        let table = rw_read(&self.table, "require_installing");
        let generation = table
            .generations
            .get(&id)
            .ok_or(CacheError::UnknownGeneration(id))?;
        if generation.status != GenerationStatus::Installing {
            return Err(CacheError::InvalidState(format!(
                "generation {} is not installing",
                id
            )));
        }
        if !generation.partitions.contains(&partition) {
            return Err(CacheError::InvalidState(format!(
                "generation {} does not declare partition {}",
                id, partition
            )));
        }
        Ok(())
    }

    /// Remove an installing generation from the table and delete its buckets.
    async fn discard(&self, id: GenerationId) {
        {
            let mut table = rw_write(&self.table, "discard");
            if table
                .generations
                .get(&id)
                .is_some_and(|g| g.status == GenerationStatus::Installing)
            {
                table.generations.remove(&id);
            }
        }
        self.delete_generation_buckets(id).await;
    }

    async fn delete_generation_buckets(&self, id: GenerationId) {
        for partition in Partition::ALL {
            let bucket = self.bucket(id, partition);
            if let Err(e) = self.store.delete_bucket(&bucket).await {
                // Left for the next garbage collection
                warn!(%bucket, error = %e, "Failed to delete bucket");
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let bytes = {
            let table = rw_read(&self.table, "persist");
            serde_json::to_vec(&*table)?
        };
        self.store.put_record(GENERATIONS_RECORD, bytes).await
    }
}
