use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{Subscription, SyncObservers, SyncState, SyncStatus};
use crate::api::RemoteSource;
use crate::cache::ReplicaStore;
use crate::network::{wait_for_change, NetworkMonitor};

// ============================================================================
// Constants
// ============================================================================

/// Published when a sync attempt starts.
const PROGRESS_STARTED: u8 = 0;

/// Published once the remote fetch has been issued.
const PROGRESS_FETCHING: u8 = 10;

/// Published after the remote fetch completes, before the local write.
const PROGRESS_FETCHED: u8 = 50;

const PROGRESS_DONE: u8 = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Cannot sync while offline")]
    Offline,

    #[error("Failed to fetch records: {0}")]
    Remote(String),

    #[error("Failed to save replica: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub record_count: usize,
    pub synced_at: DateTime<Utc>,
}

/// Outcome of `ensure_replica_present`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaStatus {
    /// A valid replica was already stored; nothing was fetched.
    AlreadyPresent,
    Synced(SyncReport),
}

type SharedSync = Shared<BoxFuture<'static, Result<SyncReport, SyncError>>>;

struct Inner {
    remote: Arc<dyn RemoteSource>,
    store: ReplicaStore,
    network: NetworkMonitor,
    state: Mutex<SyncState>,
    observers: SyncObservers,
    in_flight: Mutex<HashMap<String, SharedSync>>,
}

/// Orchestrates full-replica downloads into the local store.
/// Clone is cheap and clones share state, observers, and in-flight syncs.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(remote: Arc<dyn RemoteSource>, store: ReplicaStore, network: NetworkMonitor) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                store,
                network,
                state: Mutex::new(SyncState::default()),
                observers: SyncObservers::new(),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Seed `last_synced_at` from the store. Call once at startup.
    pub async fn restore(&self) {
        let last = self.inner.store.last_synced_at().await;
        debug!(last_synced_at = ?last, "Restored sync state");
        self.inner.state.lock().last_synced_at = last;
    }

    pub fn state(&self) -> SyncState {
        self.inner.state.lock().clone()
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(observer)
    }

    /// Fetch the complete record set for `user_id` and replace the local
    /// replica with it.
    ///
    /// Concurrent calls for the same user share a single run and all receive
    /// its result.
    pub async fn synchronize(&self, user_id: &str) -> Result<SyncReport, SyncError> {
        let run = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(user_id) {
                Some(run) => {
                    debug!(user_id, "Joining in-flight sync");
                    run.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let owner = user_id.to_string();
                    let run = async move {
                        let result = inner.run_sync(&owner).await;
                        inner.in_flight.lock().remove(&owner);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(user_id.to_string(), run.clone());
                    run
                }
            }
        };

        run.await
    }

    /// Sync only if there is no valid replica for `user_id`.
    pub async fn ensure_replica_present(&self, user_id: &str) -> Result<ReplicaStatus, SyncError> {
        let store = &self.inner.store;
        if store.matches_owner(user_id).await {
            if !store.load().await.is_empty() {
                debug!(user_id, "Replica already present");
                return Ok(ReplicaStatus::AlreadyPresent);
            }
        } else if store.last_synced_at().await.is_some() {
            info!(user_id, "Discarding replica owned by another user");
            store.clear().await;
        }

        self.synchronize(user_id).await.map(ReplicaStatus::Synced)
    }

    /// Always perform a full fetch. Fails without touching any state when
    /// offline.
    pub async fn force_synchronize(&self, user_id: &str) -> Result<SyncReport, SyncError> {
        if !self.inner.network.is_online() {
            warn!(user_id, "Refusing forced sync while offline");
            return Err(SyncError::Offline);
        }
        self.synchronize(user_id).await
    }

    /// Run `ensure_replica_present` every time the network comes back.
    pub fn spawn_auto_sync(&self, user_id: String) -> JoinHandle<()> {
        let manager = self.clone();
        let mut rx = self.inner.network.subscribe();

        tokio::spawn(async move {
            while let Some(online) = wait_for_change(&mut rx).await {
                if !online {
                    continue;
                }
                info!(user_id = %user_id, "Back online, checking replica");
                if let Err(e) = manager.ensure_replica_present(&user_id).await {
                    warn!(error = %e, "Automatic sync failed");
                }
            }
            debug!("Network monitor closed, auto-sync stopped");
        })
    }
}

impl Inner {
    fn publish(&self, update: impl FnOnce(&mut SyncState)) {
        let snapshot = {
            let mut state = self.state.lock();
            update(&mut state);
            state.clone()
        };
        self.observers.notify(&snapshot);
    }

    fn publish_progress(&self, progress: u8) {
        self.publish(|s| {
            s.status = SyncStatus::Syncing;
            s.progress = progress;
            s.error = None;
        });
    }

    fn fail(&self, err: SyncError) -> SyncError {
        error!(error = %err, "Sync failed");
        let message = err.to_string();
        self.publish(|s| {
            s.status = SyncStatus::Error;
            s.error = Some(message);
        });
        err
    }

    async fn run_sync(&self, user_id: &str) -> Result<SyncReport, SyncError> {
        info!(user_id, "Starting sync");
        self.publish_progress(PROGRESS_STARTED);

        self.publish_progress(PROGRESS_FETCHING);
        let records = match self.remote.fetch_records(user_id, None).await {
            Ok(records) => records,
            Err(e) => return Err(self.fail(SyncError::Remote(e.to_string()))),
        };

        self.publish_progress(PROGRESS_FETCHED);
        let synced_at = match self.store.save(&records, user_id).await {
            Ok(at) => at,
            Err(e) => return Err(self.fail(SyncError::Storage(e.to_string()))),
        };

        self.publish(|s| {
            s.status = SyncStatus::Success;
            s.progress = PROGRESS_DONE;
            s.last_synced_at = Some(synced_at);
            s.error = None;
        });
        info!(user_id, count = records.len(), "Sync complete");

        Ok(SyncReport {
            record_count: records.len(),
            synced_at,
        })
    }
}
