use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::CacheStore;
use crate::error::{CacheError, Result};
use crate::models::{BucketName, CacheEntry, CacheKey};

const BUCKETS_DIR: &str = "buckets";
const RECORDS_DIR: &str = "records";

/// JSON-on-disk store.
///
/// Layout under the root directory:
///
/// ```text
/// buckets/<bucket-name>/<sha256(key)>.json
/// records/<record-name>.json
/// ```
///
/// Every write goes to a temp file in the same directory and is renamed into
/// place, so readers never observe a partially written entry.
pub struct FileStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(root.join(BUCKETS_DIR))?;
        std::fs::create_dir_all(root.join(RECORDS_DIR))?;
        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &BucketName) -> PathBuf {
        self.root.join(BUCKETS_DIR).join(bucket.to_string())
    }

    fn entry_path(&self, bucket: &BucketName, key: &CacheKey) -> PathBuf {
        self.bucket_dir(bucket).join(format!("{}.json", hash_key(key.as_str())))
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{}.json", hash_key(name)))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));

        fs::write(&temp_path, contents).await?;
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// SHA256 hash for stable, fixed-length file names
fn hash_key(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, bucket: &BucketName, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(bucket, key);
        match Self::read_optional(&path).await? {
            Some(bytes) => {
                let entry: CacheEntry = serde_json::from_slice(&bytes).map_err(|e| {
                    CacheError::storage(format!("Failed to parse {}: {}", path.display(), e))
                })?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, bucket: &BucketName, entry: CacheEntry) -> Result<()> {
        let path = self.entry_path(bucket, &entry.key);
        let contents = serde_json::to_vec(&entry)?;
        self.write_atomic(&path, &contents).await
    }

    async fn keys(&self, bucket: &BucketName) -> Result<Vec<CacheKey>> {
        let dir = self.bucket_dir(bucket);
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(bytes) = Self::read_optional(&path).await? else {
                continue;
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => keys.push(entry.key),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn buckets(&self) -> Result<Vec<BucketName>> {
        let mut reader = fs::read_dir(self.root.join(BUCKETS_DIR)).await?;
        let mut names = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            let name = item.file_name();
            match name.to_str().and_then(BucketName::parse) {
                Some(bucket) => names.push(bucket),
                None => debug!(name = ?name, "Ignoring foreign directory in bucket root"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> Result<bool> {
        match fs::remove_dir_all(self.bucket_dir(bucket)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_record(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Self::read_optional(&self.record_path(name)).await
    }

    async fn put_record(&self, name: &str, value: Vec<u8>) -> Result<()> {
        let path = self.record_path(name);
        self.write_atomic(&path, &value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationId, Partition, Response};
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(key: &str, body: &str) -> CacheEntry {
        CacheEntry {
            key: CacheKey::from(key),
            response: Response::new(200, body).with_header("content-type", "text/plain"),
            partition: Partition::Dynamic,
            generation: GenerationId(3),
            stored_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let bucket = BucketName::new("app", GenerationId(3), Partition::Dynamic);
        let key = CacheKey::from("GET https://example.com/dashboard");

        {
            let store = FileStore::new(dir.path().to_path_buf()).unwrap();
            store.put(&bucket, entry(key.as_str(), "hello")).await.unwrap();
        }

        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        let got = store.get(&bucket, &key).await.unwrap().unwrap();
        assert_eq!(got.response.text(), "hello");
        assert_eq!(got.response.header("content-type"), Some("text/plain"));
        assert_eq!(store.keys(&bucket).await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_buckets_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        let old = BucketName::new("app", GenerationId(1), Partition::Static);
        let new = BucketName::new("app", GenerationId(2), Partition::Static);

        store.put(&old, entry("GET https://example.com/a.js", "1")).await.unwrap();
        store.put(&new, entry("GET https://example.com/a.js", "2")).await.unwrap();
        std::fs::create_dir_all(dir.path().join(BUCKETS_DIR).join("not-a-bucket")).unwrap();

        assert_eq!(store.buckets().await.unwrap(), vec![old.clone(), new.clone()]);

        assert!(store.delete_bucket(&old).await.unwrap());
        assert!(!store.delete_bucket(&old).await.unwrap());
        assert_eq!(store.buckets().await.unwrap(), vec![new]);
        assert!(store.keys(&old).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        let bucket = BucketName::new("app", GenerationId(1), Partition::Api);
        for i in 0..5 {
            store
                .put(&bucket, entry("GET https://example.com/api/x", &i.to_string()))
                .await
                .unwrap();
        }

        let files: Vec<_> = std::fs::read_dir(store.bucket_dir(&bucket))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].extension().unwrap() == "json");
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        let bucket = BucketName::new("app", GenerationId(1), Partition::Api);
        let key = CacheKey::from("GET https://example.com/api/x");
        let path = store.entry_path(&bucket, &key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let err = store.get(&bucket, &key).await.unwrap_err();
        assert_eq!(err.kind(), "storage_error");
    }

    #[tokio::test]
    async fn test_records_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.get_record("sync-queue").await.unwrap().is_none());
        store.put_record("sync-queue", b"[1]".to_vec()).await.unwrap();
        assert_eq!(store.get_record("sync-queue").await.unwrap(), Some(b"[1]".to_vec()));
    }
}
