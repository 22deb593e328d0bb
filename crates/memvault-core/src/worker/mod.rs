//! Asset caching worker.
//!
//! Intercepts the application's outbound GET requests and answers them from
//! a versioned cache bucket when the network is unavailable. The worker owns
//! its state in a dedicated task and is driven only through `WorkerHandle`
//! messages; it shares no memory with the rest of the application.
//!
//! Lifecycle: `Installing` (precache the manifest into the bucket for the
//! current version) -> `Waiting` (only if not activating immediately) ->
//! `Activating` (delete every other bucket) -> `Active` (intercept fetches).

pub mod http;
pub mod policy;
pub mod runtime;
pub mod storage;

pub use reqwest::Url;

pub use http::{AssetRequest, AssetResponse, Destination, FetchError, Fetcher, HttpFetcher};
pub use policy::{FetchPolicy, RequestClass};
pub use runtime::{AssetWorker, WorkerError, WorkerHandle, WorkerState};
pub use storage::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};

/// Fixed prefix of every bucket name.
pub const CACHE_PREFIX: &str = "memvault";

/// Entry points cached at install time.
pub const DEFAULT_PRECACHE: &[&str] = &["/", "/manifest.json", "/favicon.ico"];

/// URL path prefixes and hosts that identify API / remote-data requests.
pub const DEFAULT_API_MARKERS: &[&str] = &["/api/", "/rest/v1/", "supabase.co"];

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Release version, embedded in the bucket name.
    pub version: String,
    pub cache_prefix: String,
    /// Origin the precache manifest paths are resolved against.
    pub origin: Url,
    pub precache: Vec<String>,
    pub api_markers: Vec<String>,
    /// Skip the `Waiting` state after a successful install.
    pub activate_immediately: bool,
}

impl WorkerConfig {
    pub fn new(origin: Url, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            cache_prefix: CACHE_PREFIX.to_string(),
            origin,
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            api_markers: DEFAULT_API_MARKERS.iter().map(|m| m.to_string()).collect(),
            activate_immediately: true,
        }
    }

    /// The single current bucket name; every other name is obsolete.
    pub fn bucket_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Cache key of the root document used as the navigation fallback.
    pub fn root_key(&self) -> String {
        self.origin
            .join("/")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.origin.to_string())
    }
}
