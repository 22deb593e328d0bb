//! Local caching module for offline data access.
//!
//! This module provides the `ReplicaStore`, the local copy of one user's
//! full record set, on top of a small asynchronous key-value abstraction.
//!
//! Persisted entries:
//! - serialized record array
//! - owning user id
//! - last-sync timestamp (RFC 3339)
//!
//! All three are written in a single atomic batch, so readers always see
//! either the previous replica or the new one.

pub mod kv;
pub mod replica;

pub use kv::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};
pub use replica::ReplicaStore;
