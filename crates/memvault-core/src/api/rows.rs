//! Wire shapes returned by the memories endpoint.
//!
//! Every nesting level is optional on the wire: a tag link may reference a
//! deleted key or value, and the embedded objects may come back as `null`.
//! `flatten_rows` turns these into `Record`s, dropping any tag link that does
//! not resolve to a non-empty key and value.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::models::{Record, Tag};

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryRow {
    pub id: String,
    pub content: String,
    pub event_date: NaiveDate,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: String,
    #[serde(default)]
    pub memory_tags: Option<Vec<MemoryTagRow>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryTagRow {
    #[serde(default)]
    pub tag_keys: Option<TagKeyRow>,
    #[serde(default)]
    pub tag_values: Option<TagValueRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagKeyRow {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagValueRow {
    pub value: Option<String>,
}

impl MemoryTagRow {
    fn resolve(self) -> Option<Tag> {
        let key = self.tag_keys?.name?;
        let value = self.tag_values?.value?;
        Tag::new(key, value)
    }
}

impl MemoryRow {
    pub fn into_record(self) -> Record {
        let tags = self
            .memory_tags
            .unwrap_or_default()
            .into_iter()
            .filter_map(MemoryTagRow::resolve)
            .collect();

        Record {
            id: self.id,
            content: self.content,
            event_date: self.event_date,
            url: self.url.filter(|u| !u.trim().is_empty()),
            created_at: self.created_at,
            updated_at: self.updated_at,
            user_id: self.user_id,
            tags,
        }
    }
}

/// Flatten nested rows into records, preserving row order.
pub fn flatten_rows(rows: Vec<MemoryRow>) -> Vec<Record> {
    rows.into_iter().map(MemoryRow::into_record).collect()
}
