//! API client for the hosted memories service.
//!
//! The service exposes a PostgREST-style interface: resources live under
//! `/rest/v1/`, embedded relations are requested through `select`, and
//! filters are passed as `column=op.value` query parameters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::rows::{flatten_rows, MemoryRow};
use super::ApiError;
use crate::models::Record;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for the connectivity probe.
const PING_TIMEOUT_SECS: u64 = 5;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Embedded relations requested with every memory row.
const MEMORY_SELECT: &str = "*,memory_tags(tag_keys(name),tag_values(value))";

/// A queryable source of a user's complete record set.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch all records for `user_id`, newest event date first, each with
    /// its tags resolved. `limit` caps the number of rows returned.
    async fn fetch_records(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Record>, ApiError>;

    /// Whether the service is reachable at all.
    async fn ping(&self) -> bool;
}

/// API client for the memories service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::NotConfigured(format!("invalid API URL {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: None,
            token: None,
        })
    }

    /// Set the project API key sent as the `apikey` header
    pub fn set_api_key(&mut self, api_key: String) {
        self.api_key = Some(api_key);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            token: Some(token),
        }
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref key) = self.api_key {
            headers.insert(
                "apikey",
                header::HeaderValue::from_str(key)
                    .map_err(|e| ApiError::NotConfigured(format!("invalid API key: {}", e)))?,
            );
        }
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ApiError::NotConfigured(format!("invalid token: {}", e)))?,
            );
        }
        Ok(headers)
    }

    /// Build the memories query URL for a user
    pub fn memories_url(&self, user_id: &str, limit: Option<usize>) -> Result<Url, ApiError> {
        let mut url = self
            .base_url
            .join("rest/v1/memories")
            .map_err(|e| ApiError::NotConfigured(format!("invalid API URL: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("select", MEMORY_SELECT)
                .append_pair("user_id", &format!("eq.{}", user_id))
                .append_pair("order", "event_date.desc");
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url.clone())
                .headers(self.auth_headers()?)
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return serde_json::from_str(&text).map_err(|e| {
                        ApiError::InvalidResponse(format!("failed to parse {}: {}", url.path(), e))
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl RemoteSource for ApiClient {
    async fn fetch_records(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Record>, ApiError> {
        let url = self.memories_url(user_id, limit)?;
        let rows: Vec<MemoryRow> = self.get(url).await?;
        let records = flatten_rows(rows);
        debug!(user_id, count = records.len(), ?limit, "Fetched records");
        Ok(records)
    }

    async fn ping(&self) -> bool {
        let url = match self.base_url.join("rest/v1/") {
            Ok(url) => url,
            Err(_) => return false,
        };
        let headers = match self.auth_headers() {
            Ok(h) => h,
            Err(_) => return false,
        };

        // Any HTTP answer, even an auth failure, means the service is reachable.
        match self
            .client
            .head(url)
            .headers(headers)
            .timeout(Duration::from_secs(PING_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

/// Stand-in source for when no API URL is configured. Always unreachable,
/// so callers fall back to the local replica.
pub struct UnconfiguredSource;

#[async_trait]
impl RemoteSource for UnconfiguredSource {
    async fn fetch_records(&self, _user_id: &str, _limit: Option<usize>) -> Result<Vec<Record>, ApiError> {
        Err(ApiError::NotConfigured("no API URL set".to_string()))
    }

    async fn ping(&self) -> bool {
        false
    }
}
