//! Search over the user's records.
//!
//! `SearchRouter` picks the data source per query: the remote service when
//! online, the local replica (via `OfflineSearchEngine`) when offline. Both
//! paths produce the same `SearchHit` shape, capped at `MAX_RESULTS`.

pub mod engine;
pub mod matcher;
pub mod router;

use serde::Serialize;
use thiserror::Error;

use crate::models::Record;

pub use engine::OfflineSearchEngine;
pub use matcher::{FuzzyConfig, FuzzyMatcher, ParsedQuery};
pub use router::SearchRouter;

/// Result lists never exceed this many items.
pub const MAX_RESULTS: usize = 20;

/// A record annotated with its match score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SearchHit {
    pub record: Record,
    /// Fuzzy distance score, lower is better. `None` for exact and tag matches.
    pub score: Option<f64>,
}

impl SearchHit {
    pub fn exact(record: Record) -> Self {
        Self { record, score: None }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Search failed: {0}")]
    Remote(String),

    #[error("Offline search unavailable")]
    OfflineUnavailable,
}
