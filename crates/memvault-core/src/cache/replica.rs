use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{KeyValueStore, StoreError};
use crate::models::Record;

/// Namespace prefix for every persisted entry.
const KEY_PREFIX: &str = "memvault";

const RECORDS_KEY: &str = "memvault.records";
const OWNER_KEY: &str = "memvault.owner_user_id";
const LAST_SYNC_KEY: &str = "memvault.last_sync";

/// The local replica of a single user's record set.
///
/// Read operations treat storage failures as "no data" and log them; only
/// `save` propagates errors, so the sync manager can report them.
#[derive(Clone)]
pub struct ReplicaStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ReplicaStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn namespace() -> &'static str {
        KEY_PREFIX
    }

    /// Replace the stored replica with `records`, owned by `user_id`, and
    /// stamp the current time as the last sync. Returns that timestamp.
    pub async fn save(&self, records: &[Record], user_id: &str) -> Result<DateTime<Utc>, StoreError> {
        let synced_at = Utc::now();
        let serialized = serde_json::to_string(records)?;

        self.kv
            .set_many(vec![
                (RECORDS_KEY.to_string(), serialized),
                (OWNER_KEY.to_string(), user_id.to_string()),
                (LAST_SYNC_KEY.to_string(), synced_at.to_rfc3339()),
            ])
            .await?;

        debug!(user_id, count = records.len(), "Replica saved");
        Ok(synced_at)
    }

    /// The most recently saved records, or an empty list.
    pub async fn load(&self) -> Vec<Record> {
        match self.try_load().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to load replica, treating as empty");
                Vec::new()
            }
        }
    }

    /// Like `load`, but surfaces read and parse failures.
    pub async fn try_load(&self) -> Result<Vec<Record>, StoreError> {
        match self.kv.get(RECORDS_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// The replica's records if it belongs to `user_id`, otherwise empty.
    /// Owner and records come from one snapshot, so a concurrent `save` for
    /// another user can never pair its records with this owner.
    pub async fn load_owned(&self, user_id: &str) -> Result<Vec<Record>, StoreError> {
        let mut values = self.kv.get_many(&[OWNER_KEY, RECORDS_KEY]).await?.into_iter();
        let owner = values.next().flatten();
        let records = values.next().flatten();

        match (owner, records) {
            (Some(owner), Some(json)) if owner == user_id => Ok(serde_json::from_str(&json)?),
            _ => Ok(Vec::new()),
        }
    }

    /// True only if a replica exists and belongs to `user_id`.
    pub async fn matches_owner(&self, user_id: &str) -> bool {
        match self.kv.get(OWNER_KEY).await {
            Ok(Some(owner)) => owner == user_id,
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read replica owner");
                false
            }
        }
    }

    pub async fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        match self.kv.get(LAST_SYNC_KEY).await {
            Ok(Some(raw)) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    warn!(error = %e, raw = %raw, "Invalid last-sync timestamp");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read last-sync timestamp");
                None
            }
        }
    }

    /// Erase the replica and its metadata.
    pub async fn clear(&self) {
        if let Err(e) = self
            .kv
            .remove_many(&[RECORDS_KEY, OWNER_KEY, LAST_SYNC_KEY])
            .await
        {
            warn!(error = %e, "Failed to clear replica");
        } else {
            debug!("Replica cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::kv::testing::FlakyStore;
    use crate::cache::{JsonFileStore, MemoryStore};
    use crate::models::record::fixtures::record;

    fn store() -> ReplicaStore {
        ReplicaStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let replica = store();
        let records = vec![
            record("r1", "Walked the dog", &[("place", "park")]),
            record("r2", "Baked bread", &[]),
        ];

        let synced_at = replica.save(&records, "user-1").await.unwrap();

        assert_eq!(replica.load().await, records);
        assert!(replica.matches_owner("user-1").await);
        assert!(!replica.matches_owner("user-2").await);
        assert_eq!(replica.last_synced_at().await, Some(synced_at));
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_replica() {
        let replica = store();
        replica
            .save(&[record("old-1", "a", &[]), record("old-2", "b", &[])], "user-1")
            .await
            .unwrap();
        replica.save(&[record("new", "c", &[])], "user-2").await.unwrap();

        let loaded = replica.load().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "new");
        assert!(replica.matches_owner("user-2").await);
        assert!(!replica.matches_owner("user-1").await);
    }

    #[tokio::test]
    async fn test_load_without_replica_is_empty() {
        let replica = store();
        assert!(replica.load().await.is_empty());
        assert!(!replica.matches_owner("user-1").await);
        assert!(replica.last_synced_at().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_erases_everything() {
        let replica = store();
        replica.save(&[record("r1", "a", &[])], "user-1").await.unwrap();
        replica.clear().await;

        assert!(replica.load().await.is_empty());
        assert!(!replica.matches_owner("user-1").await);
        assert!(replica.last_synced_at().await.is_none());
    }

    #[tokio::test]
    async fn test_read_failures_are_swallowed() {
        let kv = Arc::new(FlakyStore::default());
        let replica = ReplicaStore::new(kv.clone());
        replica.save(&[record("r1", "a", &[])], "user-1").await.unwrap();

        kv.fail_reads(true);
        assert!(replica.load().await.is_empty());
        assert!(!replica.matches_owner("user-1").await);
        assert!(replica.last_synced_at().await.is_none());
        assert!(replica.try_load().await.is_err());
    }

    /// Store that only answers batched reads.
    #[derive(Default)]
    struct SnapshotOnly(MemoryStore);

    #[async_trait::async_trait]
    impl KeyValueStore for SnapshotOnly {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("single-key read".into()))
        }

        async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
            self.0.get_many(keys).await
        }

        async fn set_many(&self, entries: Vec<(String, String)>) -> Result<(), StoreError> {
            self.0.set_many(entries).await
        }

        async fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
            self.0.remove_many(keys).await
        }
    }

    #[tokio::test]
    async fn test_load_owned_reads_one_snapshot() {
        let replica = ReplicaStore::new(Arc::new(SnapshotOnly::default()));
        let records = vec![record("r1", "a", &[])];
        replica.save(&records, "user-1").await.unwrap();

        assert_eq!(replica.load_owned("user-1").await.unwrap(), records);
        assert!(replica.load_owned("user-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_owned_without_replica_is_empty() {
        let replica = store();
        assert!(replica.load_owned("user-1").await.unwrap().is_empty());

        let kv = Arc::new(FlakyStore::default());
        let flaky = ReplicaStore::new(kv.clone());
        kv.fail_reads(true);
        assert!(flaky.load_owned("user-1").await.is_err());
    }

    #[tokio::test]
    async fn test_save_failure_propagates() {
        let kv = Arc::new(FlakyStore::default());
        let replica = ReplicaStore::new(kv.clone());
        kv.fail_writes(true);

        assert!(replica.save(&[record("r1", "a", &[])], "user-1").await.is_err());
    }

    #[tokio::test]
    async fn test_file_backed_replica_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record("r1", "Walked the dog", &[("place", "park")])];
        {
            let replica = ReplicaStore::new(Arc::new(JsonFileStore::in_dir(dir.path(), ReplicaStore::namespace())));
            replica.save(&records, "user-1").await.unwrap();
        }

        let reopened = ReplicaStore::new(Arc::new(JsonFileStore::in_dir(dir.path(), ReplicaStore::namespace())));
        assert_eq!(reopened.load().await, records);
        assert!(reopened.matches_owner("user-1").await);
    }
}
