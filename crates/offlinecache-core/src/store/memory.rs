use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStore;
use crate::error::Result;
use crate::models::{BucketName, CacheEntry, CacheKey};

/// In-memory store. Cloning entries out keeps readers independent of later writes.
#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<BucketName, HashMap<CacheKey, CacheEntry>>>,
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all buckets.
    pub async fn entry_count(&self) -> usize {
        self.buckets.read().await.values().map(|b| b.len()).sum()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, bucket: &BucketName, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, bucket: &BucketName, entry: CacheEntry) -> Result<()> {
        self.buckets
            .write()
            .await
            .entry(bucket.clone())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn keys(&self, bucket: &BucketName) -> Result<Vec<CacheKey>> {
        let mut keys: Vec<CacheKey> = self
            .buckets
            .read()
            .await
            .get(bucket)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn buckets(&self) -> Result<Vec<BucketName>> {
        let mut names: Vec<BucketName> = self.buckets.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> Result<bool> {
        Ok(self.buckets.write().await.remove(bucket).is_some())
    }

    async fn get_record(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn put_record(&self, name: &str, value: Vec<u8>) -> Result<()> {
        self.records.write().await.insert(name.to_string(), value);
        Ok(())
    }
}
