use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A key/value label attached to a record. Both halves are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    /// Build a tag, rejecting blank keys or values.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Option<Self> {
        let key = key.into();
        let value = value.into();
        if key.trim().is_empty() || value.trim().is_empty() {
            return None;
        }
        Some(Self { key, value })
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// One memory entry as held in a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Record {
    pub id: String,
    pub content: String,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub event_date: NaiveDate,
    #[serde(default)]
    pub url: Option<String>,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub updated_at: DateTime<Utc>,
    pub user_id: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Record {
    pub fn tag_summary(&self) -> String {
        self.tags
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Build a record for tests. Tags are given as `(key, value)` pairs.
    pub fn record(id: &str, content: &str, tags: &[(&str, &str)]) -> Record {
        let now = Utc::now();
        Record {
            id: id.to_string(),
            content: content.to_string(),
            event_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            url: None,
            created_at: now,
            updated_at: now,
            user_id: "user-1".to_string(),
            tags: tags
                .iter()
                .filter_map(|(k, v)| Tag::new(*k, *v))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[test]
    fn test_tag_rejects_blank_parts() {
        assert!(Tag::new("feeling", "happy").is_some());
        assert!(Tag::new("", "happy").is_none());
        assert!(Tag::new("feeling", "   ").is_none());
    }

    #[test]
    fn test_record_json_shape() {
        let rec = record("r1", "Walked the dog", &[("place", "park")]);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["event_date"], "2024-05-01");
        assert_eq!(json["tags"][0]["key"], "place");

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_missing_tags_default_to_empty() {
        let json = serde_json::json!({
            "id": "r1",
            "content": "x",
            "event_date": "2024-01-02",
            "created_at": "2024-01-02T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
            "user_id": "u"
        });
        let rec: Record = serde_json::from_value(json).unwrap();
        assert!(rec.tags.is_empty());
        assert!(rec.url.is_none());
    }

    #[test]
    fn test_tag_summary() {
        let rec = record("r1", "x", &[("feeling", "Gratified"), ("place", "home")]);
        assert_eq!(rec.tag_summary(), "feeling:Gratified, place:home");
        assert_eq!(record("r2", "x", &[]).tag_summary(), "");
    }
}
