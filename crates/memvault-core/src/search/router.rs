use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::engine::OfflineSearchEngine;
use super::matcher::ParsedQuery;
use super::{SearchError, SearchHit, MAX_RESULTS};
use crate::api::RemoteSource;

/// Number of newest records fetched from the remote service per online query.
pub const ONLINE_CANDIDATE_LIMIT: usize = 50;

/// Chooses between the remote service and the local replica per query.
/// Holds no result cache; every call is independent.
pub struct SearchRouter {
    remote: Arc<dyn RemoteSource>,
    engine: OfflineSearchEngine,
}

impl SearchRouter {
    pub fn new(remote: Arc<dyn RemoteSource>, engine: OfflineSearchEngine) -> Self {
        Self { remote, engine }
    }

    pub async fn search(&self, user_id: &str, query: &str, is_online: bool) -> Result<Vec<SearchHit>, SearchError> {
        let Some(parsed) = ParsedQuery::parse(query) else {
            return Ok(Vec::new());
        };

        if !is_online {
            debug!(query, "Routing search to offline engine");
            return self.engine.search(user_id, query).await;
        }

        let candidates = self
            .remote
            .fetch_records(user_id, Some(ONLINE_CANDIDATE_LIMIT))
            .await
            .map_err(|e| {
                warn!(error = %e, "Online search failed");
                SearchError::Remote(e.to_string())
            })?;

        let mut seen = HashSet::new();
        let hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|r| parsed.matches_exactly(r))
            .filter(|r| seen.insert(r.id.clone()))
            .take(MAX_RESULTS)
            .map(SearchHit::exact)
            .collect();

        debug!(query, hits = hits.len(), "Online search complete");
        Ok(hits)
    }
}
