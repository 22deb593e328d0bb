//! Per-request caching policy.
//!
//! - API / remote-data requests: network first, synthesized 503 JSON when
//!   the network fails. Never cached.
//! - Everything else: cache first, then network. Successful (200) static
//!   build artifacts are stored in the current bucket on the way through.
//! - Cache and network both failing: navigations get the cached root
//!   document, scripts and stylesheets a 503 placeholder, anything else a
//!   503 text response.

use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, warn};

use super::http::{AssetRequest, AssetResponse, Destination, Fetcher};
use super::storage::CacheStorage;
use super::WorkerConfig;

const SERVICE_UNAVAILABLE: u16 = 503;

/// Path suffixes of static build artifacts.
const STATIC_EXTENSIONS: &[&str] = &[".js", ".mjs", ".css"];

/// Path segments under which the build emits its output.
const STATIC_PATH_MARKERS: &[&str] = &["/_next/static/", "/static/", "/assets/", "/build/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Api,
    Navigation,
    Script,
    Style,
    Other,
}

/// Shared, cloneable handler for intercepted fetches.
#[derive(Clone)]
pub struct FetchPolicy {
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl FetchPolicy {
    pub fn new(config: Arc<WorkerConfig>, storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            storage,
            fetcher,
        }
    }

    /// Only GET requests over http(s) are ever intercepted.
    pub fn intercepts(request: &AssetRequest) -> bool {
        request.method == Method::GET && matches!(request.url.scheme(), "http" | "https")
    }

    pub fn classify(&self, request: &AssetRequest) -> RequestClass {
        let url = &request.url;
        let path = url.path();
        let host = url.host_str().unwrap_or_default();

        let is_api = self
            .config
            .api_markers
            .iter()
            .any(|marker| path.starts_with(marker.as_str()) || host == marker || host.ends_with(&format!(".{}", marker)));
        if is_api {
            return RequestClass::Api;
        }

        match request.destination {
            Destination::Document => RequestClass::Navigation,
            Destination::Script => RequestClass::Script,
            Destination::Style => RequestClass::Style,
            _ if path.ends_with(".js") || path.ends_with(".mjs") => RequestClass::Script,
            _ if path.ends_with(".css") => RequestClass::Style,
            _ => RequestClass::Other,
        }
    }

    /// Whether a successful response for `request` belongs in the cache.
    pub fn is_static_asset(request: &AssetRequest) -> bool {
        let path = request.url.path();
        STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            || STATIC_PATH_MARKERS.iter().any(|marker| path.contains(marker))
    }

    /// Produce the response for an intercepted request.
    pub async fn respond(&self, request: &AssetRequest) -> AssetResponse {
        match self.classify(request) {
            RequestClass::Api => self.network_first(request).await,
            class => self.cache_first(request, class).await,
        }
    }

    async fn network_first(&self, request: &AssetRequest) -> AssetResponse {
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "API request failed, returning offline response");
                api_offline_response()
            }
        }
    }

    async fn cache_first(&self, request: &AssetRequest, class: RequestClass) -> AssetResponse {
        let key = request.cache_key();
        match self.storage.match_any(&key).await {
            Ok(Some(cached)) => {
                debug!(key = %key, "Serving from cache");
                return cached;
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache lookup failed"),
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() && Self::is_static_asset(request) {
                    let bucket = self.config.bucket_name();
                    if let Err(e) = self.storage.put(&bucket, &key, &response).await {
                        warn!(key = %key, error = %e, "Failed to cache asset");
                    }
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, using offline fallback");
                self.offline_fallback(class).await
            }
        }
    }

    async fn offline_fallback(&self, class: RequestClass) -> AssetResponse {
        match class {
            RequestClass::Navigation => {
                let root = self.config.root_key();
                match self.storage.match_any(&root).await {
                    Ok(Some(document)) => document,
                    Ok(None) => text_offline_response(),
                    Err(e) => {
                        warn!(error = %e, "Root document lookup failed");
                        text_offline_response()
                    }
                }
            }
            RequestClass::Script => AssetResponse::new(
                SERVICE_UNAVAILABLE,
                Some("application/javascript"),
                "// offline: script unavailable\n",
            ),
            RequestClass::Style => AssetResponse::new(
                SERVICE_UNAVAILABLE,
                Some("text/plain"),
                "/* offline: stylesheet unavailable */\n",
            ),
            RequestClass::Api => api_offline_response(),
            RequestClass::Other => text_offline_response(),
        }
    }
}

fn api_offline_response() -> AssetResponse {
    let body = serde_json::json!({
        "error": "offline",
        "message": "Network unavailable",
    });
    AssetResponse::new(SERVICE_UNAVAILABLE, Some("application/json"), body.to_string())
}

fn text_offline_response() -> AssetResponse {
    AssetResponse::new(SERVICE_UNAVAILABLE, Some("text/plain"), "Offline")
}
