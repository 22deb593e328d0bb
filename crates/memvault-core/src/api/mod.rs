//! Remote data source client.
//!
//! This module provides the `RemoteSource` abstraction the sync manager and
//! search router fetch records through, and `ApiClient`, its REST
//! implementation against the hosted memories service.
//!
//! Records arrive as nested rows (memory -> memory_tags -> tag key / tag
//! value) and are flattened into `Record`s by `rows::flatten_rows`.

pub mod client;
pub mod error;
pub mod rows;

pub use client::{ApiClient, RemoteSource, UnconfiguredSource};
pub use error::ApiError;
