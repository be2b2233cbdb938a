//! Cache store collaborator.
//!
//! Abstract key/value persistence organised in named buckets, one bucket per
//! `(generation, partition)` pair, plus a small record area for control
//! state (the generation table and the sync queue).
//!
//! Two backends ship with the crate:
//! - `MemoryStore`: process-local, used by tests and embedded hosts
//! - `FileStore`: JSON files on disk, one file per entry, atomic writes
//!
//! Writes always replace a whole entry, so a reader racing a writer on the
//! same key sees either the old or the new value, never a torn one.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{BucketName, CacheEntry, CacheKey};

pub use file::FileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, bucket: &BucketName, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite the entry filed under `entry.key`.
    async fn put(&self, bucket: &BucketName, entry: CacheEntry) -> Result<()>;

    async fn keys(&self, bucket: &BucketName) -> Result<Vec<CacheKey>>;

    /// Every bucket currently holding data.
    async fn buckets(&self) -> Result<Vec<BucketName>>;

    /// Delete a bucket and all its entries. Returns false if it did not exist.
    async fn delete_bucket(&self, bucket: &BucketName) -> Result<bool>;

    async fn get_record(&self, name: &str) -> Result<Option<Vec<u8>>>;

    async fn put_record(&self, name: &str, value: Vec<u8>) -> Result<()>;
}
