//! Query parsing and record matching.
//!
//! Three modes, chosen from the normalized (trimmed, lowercased) query:
//!
//! - `key:value` with both halves non-empty: tag-qualified match
//! - fewer than 3 characters: exact substring over content and tags
//! - otherwise: fuzzy match scored by approximate edit distance

use thiserror::Error;

use crate::models::Record;
use crate::utils::contains_ignore_case;

/// Queries shorter than this (in characters) never use fuzzy matching.
pub const MIN_FUZZY_QUERY_CHARS: usize = 3;

/// Acceptance threshold on normalized edit distance.
pub const DEFAULT_THRESHOLD: f64 = 0.4;

pub const CONTENT_WEIGHT: f64 = 0.7;
pub const TAG_VALUE_WEIGHT: f64 = 0.2;
pub const TAG_KEY_WEIGHT: f64 = 0.1;

/// Floor for a perfect field score so weighting still orders exact matches.
const PERFECT_SCORE_FLOOR: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedQuery {
    Tag { key: String, value: String },
    Exact(String),
    Fuzzy(String),
}

impl ParsedQuery {
    /// Parse a raw query. Returns `None` for empty or whitespace-only input.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        if let Some((key, value)) = normalized.split_once(':') {
            let (key, value) = (key.trim(), value.trim());
            if !key.is_empty() && !value.is_empty() {
                return Some(ParsedQuery::Tag {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }

        if normalized.chars().count() < MIN_FUZZY_QUERY_CHARS {
            Some(ParsedQuery::Exact(normalized))
        } else {
            Some(ParsedQuery::Fuzzy(normalized))
        }
    }

    /// Substring/tag predicate used wherever fuzzy scoring does not apply.
    pub fn matches_exactly(&self, record: &Record) -> bool {
        match self {
            ParsedQuery::Tag { key, value } => tag_match(record, key, value),
            ParsedQuery::Exact(needle) | ParsedQuery::Fuzzy(needle) => exact_match(record, needle),
        }
    }
}

/// True if some tag's key contains `key` and its value contains `value`.
pub fn tag_match(record: &Record, key: &str, value: &str) -> bool {
    record
        .tags
        .iter()
        .any(|t| contains_ignore_case(&t.key, key) && contains_ignore_case(&t.value, value))
}

/// True if `needle` is a substring of the content or of any tag key or value.
pub fn exact_match(record: &Record, needle: &str) -> bool {
    contains_ignore_case(&record.content, needle)
        || record
            .tags
            .iter()
            .any(|t| contains_ignore_case(&t.key, needle) || contains_ignore_case(&t.value, needle))
}

// ============================================================================
// Fuzzy matching
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyConfig {
    pub threshold: f64,
    pub content_weight: f64,
    pub tag_value_weight: f64,
    pub tag_key_weight: f64,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            content_weight: CONTENT_WEIGHT,
            tag_value_weight: TAG_VALUE_WEIGHT,
            tag_key_weight: TAG_KEY_WEIGHT,
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("Fuzzy matcher unavailable: {0}")]
pub struct MatcherUnavailable(String);

/// Weighted approximate matcher over a record's searchable fields.
#[derive(Debug)]
pub struct FuzzyMatcher {
    config: FuzzyConfig,
}

impl FuzzyMatcher {
    pub fn new(config: FuzzyConfig) -> Result<Self, MatcherUnavailable> {
        if !(config.threshold > 0.0 && config.threshold <= 1.0) {
            return Err(MatcherUnavailable(format!("threshold {} out of range", config.threshold)));
        }
        let weights = [config.content_weight, config.tag_value_weight, config.tag_key_weight];
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(MatcherUnavailable(format!("invalid field weights {:?}", weights)));
        }
        Ok(Self { config })
    }

    /// Score `record` against an already-normalized query. Lower is better;
    /// `None` means no field came within the threshold.
    pub fn score(&self, query: &str, record: &Record) -> Option<f64> {
        let query: Vec<char> = query.chars().collect();
        if query.is_empty() {
            return None;
        }

        let content = field_score(&query, &record.content);
        let tag_value = record
            .tags
            .iter()
            .map(|t| field_score(&query, &t.value))
            .fold(None, min_score);
        let tag_key = record
            .tags
            .iter()
            .map(|t| field_score(&query, &t.key))
            .fold(None, min_score);

        let fields = [
            (Some(content), self.config.content_weight),
            (tag_value, self.config.tag_value_weight),
            (tag_key, self.config.tag_key_weight),
        ];

        let mut matched = false;
        let mut total = 1.0;
        for (score, weight) in fields {
            if let Some(score) = score.filter(|s| *s <= self.config.threshold) {
                matched = true;
                total *= score.max(PERFECT_SCORE_FLOOR).powf(weight);
            }
        }

        matched.then_some(total)
    }
}

fn min_score(best: Option<f64>, next: f64) -> Option<f64> {
    Some(best.map_or(next, |b| b.min(next)))
}

/// Normalized distance between `query` and its best-matching span of `text`.
fn field_score(query: &[char], text: &str) -> f64 {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    approximate_distance(query, &text) as f64 / query.len() as f64
}

/// Smallest edit distance between `pattern` and any substring of `text`.
///
/// Levenshtein with a free start position in `text` (Sellers' algorithm):
/// the first row is all zeros and the answer is the minimum of the last row.
pub fn approximate_distance(pattern: &[char], text: &[char]) -> usize {
    let m = pattern.len();
    if m == 0 {
        return 0;
    }
    if text.is_empty() {
        return m;
    }

    // Columns index the pattern; rows walk the text.
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr: Vec<usize> = vec![0; m + 1];
    let mut best = prev[m];

    for &tc in text {
        curr[0] = 0;
        for j in 1..=m {
            let cost = if pattern[j - 1] == tc { 0 } else { 1 };
            curr[j] = (prev[j] + 1) // skip a text char
                .min(curr[j - 1] + 1) // skip a pattern char
                .min(prev[j - 1] + cost);
        }
        best = best.min(curr[m]);
        std::mem::swap(&mut prev, &mut curr);
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::fixtures::record;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!(ParsedQuery::parse("   "), None);
        assert_eq!(ParsedQuery::parse(""), None);
        assert_eq!(ParsedQuery::parse(" Ab "), Some(ParsedQuery::Exact("ab".into())));
        assert_eq!(ParsedQuery::parse("Feeback"), Some(ParsedQuery::Fuzzy("feeback".into())));
        assert_eq!(
            ParsedQuery::parse("Feeling : GR"),
            Some(ParsedQuery::Tag { key: "feeling".into(), value: "gr".into() })
        );
    }

    #[test]
    fn test_parse_incomplete_tag_falls_through() {
        assert_eq!(ParsedQuery::parse("feeling:"), Some(ParsedQuery::Fuzzy("feeling:".into())));
        assert_eq!(ParsedQuery::parse(":x"), Some(ParsedQuery::Fuzzy(":x".into())));
        assert_eq!(ParsedQuery::parse("a:"), Some(ParsedQuery::Exact("a:".into())));
    }

    #[test]
    fn test_tag_match_uses_substrings() {
        let gratified = record("r1", "x", &[("feeling", "gratified")]);
        let excited = record("r2", "x", &[("feeling", "excited")]);
        assert!(tag_match(&gratified, "feeling", "gr"));
        assert!(!tag_match(&excited, "feeling", "gr"));
        assert!(tag_match(&gratified, "feel", "fied"));
    }

    #[test]
    fn test_tag_match_requires_same_tag() {
        let rec = record("r1", "x", &[("feeling", "calm"), ("place", "gridiron")]);
        assert!(!tag_match(&rec, "feeling", "gr"));
    }

    #[test]
    fn test_exact_match_fields() {
        let rec = record("r1", "Morning Run", &[("place", "Park")]);
        assert!(exact_match(&rec, "ru"));
        assert!(exact_match(&rec, "pl"));
        assert!(exact_match(&rec, "pa"));
        assert!(!exact_match(&rec, "zz"));
    }

    #[test]
    fn test_approximate_distance() {
        assert_eq!(approximate_distance(&chars("feedback"), &chars("got feedback today")), 0);
        assert_eq!(approximate_distance(&chars("feeback"), &chars("got feedback today")), 1);
        assert_eq!(approximate_distance(&chars("kitten"), &chars("sitting")), 2);
        assert_eq!(approximate_distance(&chars("abc"), &chars("")), 3);
        assert_eq!(approximate_distance(&chars(""), &chars("abc")), 0);
    }

    #[test]
    fn test_fuzzy_tolerates_missing_letter() {
        let matcher = FuzzyMatcher::new(FuzzyConfig::default()).unwrap();
        let rec = record("r1", "Asked the team for feedback", &[]);
        assert!(matcher.score("feeback", &rec).is_some());
    }

    #[test]
    fn test_fuzzy_rejects_distant_text() {
        let matcher = FuzzyMatcher::new(FuzzyConfig::default()).unwrap();
        let rec = record("r1", "Went swimming", &[("place", "pool")]);
        assert!(matcher.score("keyboard", &rec).is_none());
    }

    #[test]
    fn test_fuzzy_prefers_content_over_tag_key() {
        let matcher = FuzzyMatcher::new(FuzzyConfig::default()).unwrap();
        let in_content = record("r1", "project kickoff", &[]);
        let in_key = record("r2", "unrelated", &[("project", "atlas")]);

        let content_score = matcher.score("project", &in_content).unwrap();
        let key_score = matcher.score("project", &in_key).unwrap();
        assert!(content_score < key_score);
    }

    #[test]
    fn test_fuzzy_exact_beats_typo() {
        let matcher = FuzzyMatcher::new(FuzzyConfig::default()).unwrap();
        let exact = record("r1", "feedback", &[]);
        let typo = record("r2", "fedback", &[]);
        assert!(matcher.score("feedback", &exact).unwrap() < matcher.score("feedback", &typo).unwrap());
    }

    #[test]
    fn test_invalid_config_is_unavailable() {
        let bad_threshold = FuzzyConfig { threshold: 0.0, ..Default::default() };
        assert!(FuzzyMatcher::new(bad_threshold).is_err());

        let bad_weight = FuzzyConfig { tag_key_weight: f64::NAN, ..Default::default() };
        assert!(FuzzyMatcher::new(bad_weight).is_err());
    }
}
