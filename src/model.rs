use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Healthy,
    Error,
    #[default]
    Unknown,
}

/// A configured remote source. `status` and `last_updated` are only
/// written by the sync coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: String,
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    /// Category id, or empty when uncategorized.
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(default)]
    pub status: FeedStatus,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Fields this version does not know about, kept so a typed rewrite
    /// does not drop what a migration or a newer UI stored.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Feed {
    pub fn new(id: impl Into<String>, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: title.into(),
            category: String::new(),
            status: FeedStatus::Unknown,
            last_updated: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub categories: BTreeSet<String>,
}

/// Snapshot of one feed's items, replaced wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleCache {
    pub feed_id: String,
    #[serde(default)]
    pub last_fetched: Option<DateTime<Utc>>,
    #[serde(default)]
    pub articles: Vec<Article>,
}

impl ArticleCache {
    pub fn empty(feed_id: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            last_fetched: None,
            articles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadState {
    pub read: bool,
    pub read_at: DateTime<Utc>,
}

/// Article id -> read state. Only user interaction writes this document.
pub type ReadStates = BTreeMap<String, ReadState>;

/// Free-form settings document; `appVersion` is the schema version marker.
pub type Settings = Map<String, Value>;

pub const APP_VERSION_KEY: &str = "appVersion";

/// Reads an explicit `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feed_serializes_camel_case_and_lowercase_status() {
        let mut feed = Feed::new("f1", "https://example.com/rss", "Example");
        feed.status = FeedStatus::Healthy;

        let value = serde_json::to_value(&feed).unwrap();
        assert_eq!(value["status"], json!("healthy"));
        assert_eq!(value["lastUpdated"], Value::Null);
        assert_eq!(value["category"], json!(""));
    }

    #[test]
    fn test_feed_missing_optional_fields_use_defaults() {
        let feed: Feed = serde_json::from_value(json!({
            "id": "f1",
            "url": "https://example.com/rss"
        }))
        .unwrap();

        assert_eq!(feed.status, FeedStatus::Unknown);
        assert!(feed.last_updated.is_none());
        assert!(feed.title.is_empty());
    }

    #[test]
    fn test_feed_null_text_fields_read_as_empty() {
        let feeds: Vec<Feed> = serde_json::from_value(json!([{
            "id": "a",
            "url": "https://a.example/rss",
            "title": null,
            "category": null,
            "status": "healthy",
            "lastUpdated": null
        }]))
        .unwrap();

        assert_eq!(feeds[0].category, "");
        assert_eq!(feeds[0].title, "");
        assert_eq!(feeds[0].status, FeedStatus::Healthy);
        assert!(feeds[0].extra.is_empty());
    }

    #[test]
    fn test_category_null_name_reads_as_empty() {
        let category: Category =
            serde_json::from_value(json!({"id": "tech", "name": null})).unwrap();
        assert_eq!(category.name, "");
    }

    #[test]
    fn test_feed_preserves_unknown_fields() {
        let raw = json!({
            "id": "f1",
            "url": "https://example.com/rss",
            "title": "Example",
            "migratedTo1_1_0": true,
            "color": "blue"
        });

        let feed: Feed = serde_json::from_value(raw).unwrap();
        assert_eq!(feed.extra.get("color"), Some(&json!("blue")));

        let back = serde_json::to_value(&feed).unwrap();
        assert_eq!(back["migratedTo1_1_0"], json!(true));
        assert_eq!(back["color"], json!("blue"));
    }

    #[test]
    fn test_article_cache_empty() {
        let cache = ArticleCache::empty("abc");
        let value = serde_json::to_value(&cache).unwrap();
        assert_eq!(
            value,
            json!({"feedId": "abc", "lastFetched": null, "articles": []})
        );
    }

    #[test]
    fn test_read_state_shape() {
        let value = json!({"read": true, "readAt": "2024-12-09T12:00:00Z"});
        let state: ReadState = serde_json::from_value(value).unwrap();
        assert!(state.read);
        assert_eq!(state.read_at.to_rfc3339(), "2024-12-09T12:00:00+00:00");
    }
}
