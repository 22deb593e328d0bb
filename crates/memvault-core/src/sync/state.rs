use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Success => write!(f, "success"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// Lifecycle status of a replication attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SyncState {
    pub status: SyncStatus,
    /// 0 through 100
    pub progress: u8,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            progress: 0,
            last_synced_at: None,
            error: None,
        }
    }
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        self.status == SyncStatus::Syncing
    }
}

type Observer = Arc<dyn Fn(&SyncState) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(u64, Observer)>,
}

/// Observer registry for sync state changes.
///
/// Observers are called synchronously, in registration order, on the task
/// that changed the state. The registry lock is not held during callbacks,
/// so an observer may subscribe or unsubscribe others.
#[derive(Default, Clone)]
pub struct SyncObservers {
    registry: Arc<Mutex<Registry>>,
}

impl SyncObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.observers.push((id, Arc::new(observer)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn notify(&self, state: &SyncState) {
        let snapshot: Vec<Observer> = self
            .registry
            .lock()
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in snapshot {
            observer(state);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.registry.lock().observers.len()
    }
}

/// Disposer returned by `SyncObservers::subscribe`. The observer stays
/// registered until this is dropped or `unsubscribe` is called.
#[must_use = "dropping a Subscription immediately removes the observer"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().observers.retain(|(id, _)| *id != self.id);
        }
    }
}
