use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::matcher::{FuzzyConfig, FuzzyMatcher, ParsedQuery};
use super::{SearchError, SearchHit, MAX_RESULTS};
use crate::cache::ReplicaStore;
use crate::models::Record;

/// Dual-mode (exact / fuzzy) search over the local replica.
pub struct OfflineSearchEngine {
    store: ReplicaStore,
    config: FuzzyConfig,
    matcher: OnceCell<Option<Arc<FuzzyMatcher>>>,
}

impl OfflineSearchEngine {
    pub fn new(store: ReplicaStore) -> Self {
        Self::with_config(store, FuzzyConfig::default())
    }

    pub fn with_config(store: ReplicaStore, config: FuzzyConfig) -> Self {
        Self {
            store,
            config,
            matcher: OnceCell::new(),
        }
    }

    /// The fuzzy matcher, built on first use. `None` if it could not be
    /// built, in which case callers fall back to exact matching.
    async fn matcher(&self) -> Option<Arc<FuzzyMatcher>> {
        self.matcher
            .get_or_init(|| async {
                match FuzzyMatcher::new(self.config.clone()) {
                    Ok(matcher) => Some(Arc::new(matcher)),
                    Err(e) => {
                        warn!(error = %e, "Fuzzy matching disabled, using exact matching");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Search the replica belonging to `user_id`. A replica owned by anyone
    /// else is treated as absent.
    pub async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let Some(parsed) = ParsedQuery::parse(query) else {
            return Ok(Vec::new());
        };

        let records = self.store.load_owned(user_id).await.map_err(|e| {
            warn!(error = %e, "Failed to read replica for search");
            SearchError::OfflineUnavailable
        })?;

        if records.is_empty() {
            debug!(user_id, "No usable replica for offline search");
            return Ok(Vec::new());
        }

        let matcher = match parsed {
            ParsedQuery::Fuzzy(_) => self.matcher().await,
            _ => None,
        };
        let hits = search_records(&parsed, records, matcher.as_deref());
        debug!(query, hits = hits.len(), "Offline search complete");
        Ok(hits)
    }
}

/// Run `query` over `records`. Fuzzy queries need `matcher`; without one
/// they degrade to exact substring matching.
pub fn search_records(query: &ParsedQuery, records: Vec<Record>, matcher: Option<&FuzzyMatcher>) -> Vec<SearchHit> {
    match (query, matcher) {
        (ParsedQuery::Fuzzy(needle), Some(matcher)) => {
            let mut scored: Vec<(f64, Record)> = records
                .into_iter()
                .filter_map(|r| matcher.score(needle, &r).map(|s| (s, r)))
                .collect();
            // Stable, so equal scores keep replica order
            scored.sort_by(|a, b| a.0.total_cmp(&b.0));
            scored
                .into_iter()
                .take(MAX_RESULTS)
                .map(|(score, record)| SearchHit {
                    record,
                    score: Some(score),
                })
                .collect()
        }
        _ => records
            .into_iter()
            .filter(|r| query.matches_exactly(r))
            .take(MAX_RESULTS)
            .map(SearchHit::exact)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::kv::testing::FlakyStore;
    use crate::cache::MemoryStore;
    use crate::models::record::fixtures::record;

    async fn engine_with(records: Vec<Record>) -> OfflineSearchEngine {
        let store = ReplicaStore::new(Arc::new(MemoryStore::new()));
        store.save(&records, "user-1").await.unwrap();
        OfflineSearchEngine::new(store)
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.record.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_tag_query_matches_key_and_value() {
        let engine = engine_with(vec![
            record("grat", "a good day", &[("feeling", "gratified")]),
            record("exc", "a big day", &[("feeling", "excited")]),
            record("other", "gr gr", &[("place", "green")]),
        ])
        .await;

        let hits = engine.search("user-1", "feeling:gr").await.unwrap();
        assert_eq!(ids(&hits), vec!["grat"]);
        assert!(hits[0].score.is_none());
    }

    #[tokio::test]
    async fn test_short_query_is_exact_substring_only() {
        let engine = engine_with(vec![
            record("r1", "Ran a 5k", &[]),
            record("r2", "Read a book", &[("genre", "sci-fi")]),
            record("r3", "Nap", &[]),
        ])
        .await;

        assert_eq!(ids(&engine.search("user-1", "RA").await.unwrap()), vec!["r1"]);
        assert_eq!(ids(&engine.search("user-1", "fi").await.unwrap()), vec!["r2"]);
        // "rn" is one edit from "ra" and "re" but is not a substring anywhere
        assert!(engine.search("user-1", "rn").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fuzzy_query_tolerates_typo_and_orders_best_first() {
        let engine = engine_with(vec![
            record("typo", "some fedback here", &[]),
            record("exact", "got feedback today", &[]),
            record("none", "went hiking", &[]),
        ])
        .await;

        let hits = engine.search("user-1", "feedback").await.unwrap();
        assert_eq!(ids(&hits), vec!["exact", "typo"]);
        assert!(hits[0].score.unwrap() < hits[1].score.unwrap());

        let hits = engine.search("user-1", "feeback").await.unwrap();
        assert!(ids(&hits).contains(&"exact"));
    }

    #[tokio::test]
    async fn test_results_are_capped() {
        let records = (0..30)
            .map(|i| record(&format!("r{}", i), "daily standup notes", &[]))
            .collect();
        let engine = engine_with(records).await;

        assert_eq!(engine.search("user-1", "standup").await.unwrap().len(), MAX_RESULTS);
        assert_eq!(engine.search("user-1", "up").await.unwrap().len(), MAX_RESULTS);
    }

    #[tokio::test]
    async fn test_blank_query_returns_nothing() {
        let engine = engine_with(vec![record("r1", "anything", &[])]).await;
        assert!(engine.search("user-1", "").await.unwrap().is_empty());
        assert!(engine.search("user-1", "   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_replica_is_ignored() {
        let engine = engine_with(vec![record("r1", "feedback", &[])]).await;
        assert!(engine.search("user-2", "feedback").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_store_is_single_failure() {
        let kv = Arc::new(FlakyStore::default());
        let store = ReplicaStore::new(kv.clone());
        store.save(&[record("r1", "feedback", &[])], "user-1").await.unwrap();
        kv.fail_reads(true);

        let engine = OfflineSearchEngine::new(store);
        assert_eq!(
            engine.search("user-1", "feedback").await,
            Err(SearchError::OfflineUnavailable)
        );
    }

    #[tokio::test]
    async fn test_unavailable_matcher_falls_back_to_exact() {
        let store = ReplicaStore::new(Arc::new(MemoryStore::new()));
        store
            .save(&[record("r1", "got feedback", &[]), record("r2", "fedback", &[])], "user-1")
            .await
            .unwrap();
        let broken = FuzzyConfig { threshold: -1.0, ..Default::default() };
        let engine = OfflineSearchEngine::with_config(store, broken);

        let hits = engine.search("user-1", "feedback").await.unwrap();
        assert_eq!(ids(&hits), vec!["r1"]);
        assert!(hits[0].score.is_none());

        // Typo no longer matches without fuzzy support
        assert!(engine.search("user-1", "feeback").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_matcher_is_built_once() {
        let engine = engine_with(vec![record("r1", "feedback", &[])]).await;
        let first = engine.matcher().await.unwrap();
        let second = engine.matcher().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
