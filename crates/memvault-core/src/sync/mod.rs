//! Replica synchronization.
//!
//! `SyncManager` downloads a user's complete record set and atomically
//! replaces the local replica with it. Progress is published to observers
//! as a strictly ordered sequence of `SyncState`s:
//!
//! `syncing(0) -> syncing(10) -> syncing(50) -> success(100) | error`

pub mod manager;
pub mod state;

pub use manager::{ReplicaStatus, SyncError, SyncManager, SyncReport};
pub use state::{Subscription, SyncObservers, SyncState, SyncStatus};
