//! Named cache buckets for offline asset serving.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::http::AssetResponse;
use crate::cache::StoreError;

/// A set of named buckets, each mapping request keys to stored responses.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the bucket if it does not exist.
    async fn open(&self, bucket: &str) -> Result<(), StoreError>;

    async fn bucket_names(&self) -> Result<Vec<String>, StoreError>;

    /// Returns whether a bucket was removed.
    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<AssetResponse>, StoreError>;

    async fn put(&self, bucket: &str, key: &str, response: &AssetResponse) -> Result<(), StoreError>;

    /// Look `key` up in every bucket, in name order.
    async fn match_any(&self, key: &str) -> Result<Option<AssetResponse>, StoreError> {
        for bucket in self.bucket_names().await? {
            if let Some(found) = self.get(&bucket, key).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// In-memory buckets
// ============================================================================

#[derive(Default)]
pub struct MemoryCacheStorage {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, AssetResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, bucket: &str) -> Result<(), StoreError> {
        self.buckets.write().entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn bucket_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.buckets.read().keys().cloned().collect())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.buckets.write().remove(bucket).is_some())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<AssetResponse>, StoreError> {
        Ok(self
            .buckets
            .read()
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, bucket: &str, key: &str, response: &AssetResponse) -> Result<(), StoreError> {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }
}

// ============================================================================
// On-disk buckets
// ============================================================================

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    response: AssetResponse,
}

/// One directory per bucket under `root`, one JSON file per entry named by
/// the SHA-256 of its key.
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// A bucket is any single plain path component under `root`, so every
    /// directory `bucket_names` lists can be read and deleted again.
    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        let mut components = Path::new(bucket).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(bucket)),
            _ => Err(StoreError::Unavailable(format!("invalid bucket name: {:?}", bucket))),
        }
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        dir.join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, bucket: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(self.bucket_dir(bucket)?).await?;
        Ok(())
    }

    async fn bucket_names(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        match tokio::fs::remove_dir_all(self.bucket_dir(bucket)?).await {
            Ok(()) => {
                debug!(bucket, "Bucket deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<AssetResponse>, StoreError> {
        let path = Self::entry_path(&self.bucket_dir(bucket)?, key);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: StoredEntry = serde_json::from_str(&contents)?;
        // Guard against a digest collision
        Ok((entry.key == key).then_some(entry.response))
    }

    async fn put(&self, bucket: &str, key: &str, response: &AssetResponse) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket)?;
        tokio::fs::create_dir_all(&dir).await?;

        let path = Self::entry_path(&dir, key);
        let contents = serde_json::to_string(&StoredEntry {
            key: key.to_string(),
            response: response.clone(),
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> AssetResponse {
        AssetResponse::new(200, Some("text/html"), body)
    }

    #[tokio::test]
    async fn test_memory_buckets() {
        let storage = MemoryCacheStorage::new();
        storage.open("app-v1").await.unwrap();
        storage.put("app-v2", "https://x/", &response("two")).await.unwrap();

        assert_eq!(storage.bucket_names().await.unwrap(), vec!["app-v1", "app-v2"]);
        assert_eq!(storage.match_any("https://x/").await.unwrap(), Some(response("two")));
        assert!(storage.delete_bucket("app-v1").await.unwrap());
        assert!(!storage.delete_bucket("app-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_disk_buckets_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().join("assets"));
        assert!(storage.bucket_names().await.unwrap().is_empty());

        storage.open("app-v1").await.unwrap();
        storage.put("app-v2", "https://x/main.js", &response("js")).await.unwrap();

        assert_eq!(storage.bucket_names().await.unwrap(), vec!["app-v1", "app-v2"]);
        assert_eq!(
            storage.get("app-v2", "https://x/main.js").await.unwrap(),
            Some(response("js"))
        );
        assert_eq!(storage.get("app-v1", "https://x/main.js").await.unwrap(), None);
        assert_eq!(storage.match_any("https://x/main.js").await.unwrap(), Some(response("js")));

        assert!(storage.delete_bucket("app-v2").await.unwrap());
        assert_eq!(storage.bucket_names().await.unwrap(), vec!["app-v1"]);
    }

    #[tokio::test]
    async fn test_disk_rejects_path_like_bucket_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf());
        assert!(storage.open("../escape").await.is_err());
        assert!(storage.open("").await.is_err());
        assert!(storage.open("..").await.is_err());
        assert!(storage.open("a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_disk_foreign_directories_are_buckets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("old cache v1")).unwrap();
        let storage = DiskCacheStorage::new(dir.path().to_path_buf());

        assert_eq!(storage.bucket_names().await.unwrap(), vec!["old cache v1"]);
        assert_eq!(storage.match_any("https://x/").await.unwrap(), None);
        assert!(storage.delete_bucket("old cache v1").await.unwrap());
        assert!(!dir.path().join("old cache v1").exists());
    }
}
