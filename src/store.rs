//! JSON document store.
//!
//! Every logical key maps to exactly one pretty-printed JSON file in the
//! data directory. Reads of a missing file return the key's default value.
//! Writes go to a temporary file in the same directory which is then
//! renamed over the target, so a failed write leaves the old content intact.
//! Writes and read-modify-write updates to the same key are serialized by a
//! per-key async mutex.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::StoreError;
use crate::model::{ArticleCache, Category, Feed, ReadState, ReadStates, Settings};

const ARTICLES_PREFIX: &str = "articles:";
const ARTICLES_FILE_PREFIX: &str = "articles-";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    Feeds,
    Categories,
    ReadStates,
    Settings,
    Articles(String),
    Custom(String),
}

impl DocumentKey {
    pub fn parse(key: &str) -> Result<Self, StoreError> {
        match key {
            "feeds" => Ok(Self::Feeds),
            "categories" => Ok(Self::Categories),
            "read-states" => Ok(Self::ReadStates),
            "settings" => Ok(Self::Settings),
            _ => {
                if let Some(feed_id) = key.strip_prefix(ARTICLES_PREFIX) {
                    Self::articles(feed_id)
                } else if is_safe_name(key) && !key.starts_with(ARTICLES_FILE_PREFIX) {
                    Ok(Self::Custom(key.to_string()))
                } else {
                    Err(StoreError::InvalidKey(key.to_string()))
                }
            }
        }
    }

    /// Key of the article cache belonging to `feed_id`.
    pub fn articles(feed_id: &str) -> Result<Self, StoreError> {
        if is_safe_name(feed_id) {
            Ok(Self::Articles(feed_id.to_string()))
        } else {
            Err(StoreError::InvalidKey(format!("{ARTICLES_PREFIX}{feed_id}")))
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            Self::Feeds => "feeds.json".to_string(),
            Self::Categories => "categories.json".to_string(),
            Self::ReadStates => "read-states.json".to_string(),
            Self::Settings => "settings.json".to_string(),
            Self::Articles(feed_id) => format!("{ARTICLES_FILE_PREFIX}{feed_id}.json"),
            Self::Custom(name) => format!("{name}.json"),
        }
    }

    /// Content reported for a document that has never been written.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Feeds | Self::Categories => json!([]),
            Self::ReadStates | Self::Settings => json!({}),
            Self::Articles(feed_id) => json!({
                "feedId": feed_id,
                "lastFetched": null,
                "articles": []
            }),
            Self::Custom(_) => Value::Null,
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feeds => f.write_str("feeds"),
            Self::Categories => f.write_str("categories"),
            Self::ReadStates => f.write_str("read-states"),
            Self::Settings => f.write_str("settings"),
            Self::Articles(feed_id) => write!(f, "{ARTICLES_PREFIX}{feed_id}"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub struct DocumentStore {
    dir: PathBuf,
    locks: Mutex<HashMap<DocumentKey, Arc<Mutex<()>>>>,
}

impl DocumentStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    /// A creation failure is only logged; the next read or write reports it.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            error!("Failed to create data directory {}: {}", dir.display(), e);
        }

        Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &DocumentKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    pub async fn read(&self, key: &DocumentKey) -> Result<Value, StoreError> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Document '{}' not found, using default", key);
                return Ok(key.default_value());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    path,
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            key: key.to_string(),
            source,
        })
    }

    pub async fn read_as<T: DeserializeOwned>(&self, key: &DocumentKey) -> Result<T, StoreError> {
        let value = self.read(key).await?;
        serde_json::from_value(value).map_err(|source| StoreError::Shape {
            key: key.to_string(),
            source,
        })
    }

    pub async fn write<T: Serialize + ?Sized>(
        &self,
        key: &DocumentKey,
        value: &T,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;
        self.write_unlocked(key, value).await
    }

    /// Atomic read-modify-write of one document. No other `write` or
    /// `update` of the same key can run between the read and the write.
    pub async fn update<T, R, F>(&self, key: &DocumentKey, apply: F) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(&mut T) -> R,
    {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let mut document: T = self.read_as(key).await?;
        let result = apply(&mut document);
        self.write_unlocked(key, &document).await?;
        Ok(result)
    }

    /// Removes a document. Deleting a document that does not exist succeeds.
    pub async fn delete(&self, key: &DocumentKey) -> Result<(), StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let path = self.path_for(key);
        let result = match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                path,
                source,
            }),
        };

        self.forget_lock(key, &lock).await;
        result
    }

    async fn lock_for(&self, key: &DocumentKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.clone()).or_default().clone()
    }

    /// Drops the key's lock entry unless another task holds or waits on it.
    /// Clones are only handed out under the map lock, so the count is exact.
    async fn forget_lock(&self, key: &DocumentKey, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one held by the caller.
        if Arc::strong_count(lock) == 2 {
            locks.remove(key);
        }
    }

    async fn write_unlocked<T: Serialize + ?Sized>(
        &self,
        key: &DocumentKey,
        value: &T,
    ) -> Result<(), StoreError> {
        let content =
            serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize {
                key: key.to_string(),
                source,
            })?;

        let dir = self.dir.clone();
        let path = self.path_for(key);
        let key_name = key.to_string();

        let task_path = path.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&task_path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|_| StoreError::Interrupted(key_name.clone()))?;

        result.map_err(|source| StoreError::Io {
            key: key_name,
            path,
            source,
        })
    }

    // Typed accessors

    pub async fn feeds(&self) -> Result<Vec<Feed>, StoreError> {
        self.read_as(&DocumentKey::Feeds).await
    }

    pub async fn save_feeds(&self, feeds: &[Feed]) -> Result<(), StoreError> {
        self.write(&DocumentKey::Feeds, feeds).await
    }

    pub async fn update_feeds<R>(
        &self,
        apply: impl FnOnce(&mut Vec<Feed>) -> R,
    ) -> Result<R, StoreError> {
        self.update(&DocumentKey::Feeds, apply).await
    }

    /// Removes a feed and its article cache. Returns whether the feed existed.
    pub async fn delete_feed(&self, feed_id: &str) -> Result<bool, StoreError> {
        let cache_key = DocumentKey::articles(feed_id)?;
        let removed = self
            .update_feeds(|feeds| {
                let before = feeds.len();
                feeds.retain(|f| f.id != feed_id);
                feeds.len() != before
            })
            .await?;
        self.delete(&cache_key).await?;
        Ok(removed)
    }

    pub async fn categories(&self) -> Result<Vec<Category>, StoreError> {
        self.read_as(&DocumentKey::Categories).await
    }

    pub async fn save_categories(&self, categories: &[Category]) -> Result<(), StoreError> {
        self.write(&DocumentKey::Categories, categories).await
    }

    pub async fn read_states(&self) -> Result<ReadStates, StoreError> {
        self.read_as(&DocumentKey::ReadStates).await
    }

    pub async fn save_read_states(&self, states: &ReadStates) -> Result<(), StoreError> {
        self.write(&DocumentKey::ReadStates, states).await
    }

    pub async fn set_read_state(&self, article_id: &str, read: bool) -> Result<ReadState, StoreError> {
        let state = ReadState {
            read,
            read_at: Utc::now(),
        };
        let stored = state.clone();
        self.update(&DocumentKey::ReadStates, move |states: &mut ReadStates| {
            states.insert(article_id.to_string(), stored);
        })
        .await?;
        Ok(state)
    }

    pub async fn settings(&self) -> Result<Settings, StoreError> {
        self.read_as(&DocumentKey::Settings).await
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        self.write(&DocumentKey::Settings, settings).await
    }

    pub async fn article_cache(&self, feed_id: &str) -> Result<ArticleCache, StoreError> {
        self.read_as(&DocumentKey::articles(feed_id)?).await
    }

    pub async fn save_article_cache(&self, cache: &ArticleCache) -> Result<(), StoreError> {
        self.write(&DocumentKey::articles(&cache.feed_id)?, cache).await
    }
}
