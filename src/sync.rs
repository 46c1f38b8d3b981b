use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::fetcher::Fetcher;
use crate::model::{ArticleCache, Feed, FeedStatus};
use crate::store::{DocumentKey, DocumentStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FeedSyncResult {
    Updated { feed_id: String, articles: usize },
    Failed { feed_id: String, cause: String },
}

impl FeedSyncResult {
    pub fn feed_id(&self) -> &str {
        match self {
            Self::Updated { feed_id, .. } | Self::Failed { feed_id, .. } => feed_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// True when another sync was already running and this call did nothing.
    pub skipped: bool,
    pub results: Vec<FeedSyncResult>,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Refreshes article caches and feed status. Every feed is fetched
/// concurrently; each completion replaces that feed's article cache and
/// then records the outcome in the feed list through an atomic update, so
/// concurrent completions cannot drop each other's status changes.
pub struct SyncCoordinator {
    store: Arc<DocumentStore>,
    fetcher: Arc<Fetcher>,
    refreshing: Arc<RwLock<bool>>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<DocumentStore>, fetcher: Arc<Fetcher>) -> Self {
        Self {
            store,
            fetcher,
            refreshing: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Syncs every feed in the feed list. Per-feed failures are recorded on
    /// the feed and in the report; only failing to read the feed list is an
    /// error.
    pub async fn sync_all(&self) -> Result<SyncReport, StoreError> {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Sync already in progress, skipping");
                return Ok(SyncReport {
                    skipped: true,
                    results: Vec::new(),
                });
            }
            *refreshing = true;
        }

        let result = self.do_sync_all().await;

        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        result
    }

    async fn do_sync_all(&self) -> Result<SyncReport, StoreError> {
        let feeds = self.store.feeds().await?;
        info!("Syncing {} feeds", feeds.len());

        let mut pending: FuturesUnordered<_> =
            feeds.iter().map(|feed| self.sync_one(feed)).collect();

        let mut report = SyncReport::default();
        while let Some(result) = pending.next().await {
            report.results.push(result);
        }

        info!(
            "Sync complete: {} updated, {} failed",
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    /// Syncs one feed now. Returns `None` when no feed has this id.
    pub async fn sync_feed(&self, feed_id: &str) -> Result<Option<FeedSyncResult>, StoreError> {
        let feeds = self.store.feeds().await?;
        match feeds.iter().find(|f| f.id == feed_id) {
            Some(feed) => Ok(Some(self.sync_one(feed).await)),
            None => Ok(None),
        }
    }

    async fn sync_one(&self, feed: &Feed) -> FeedSyncResult {
        let fetched_at = Utc::now();

        match self.fetch_and_cache(feed, fetched_at).await {
            Ok(count) => {
                match self
                    .record_status(&feed.id, FeedStatus::Healthy, Some(fetched_at))
                    .await
                {
                    Ok(true) => FeedSyncResult::Updated {
                        feed_id: feed.id.clone(),
                        articles: count,
                    },
                    Ok(false) => {
                        self.discard_orphan_cache(&feed.id).await;
                        FeedSyncResult::Failed {
                            feed_id: feed.id.clone(),
                            cause: "feed was removed during sync".to_string(),
                        }
                    }
                    Err(e) => {
                        error!("Failed to record status for feed '{}': {}", feed.id, e);
                        FeedSyncResult::Failed {
                            feed_id: feed.id.clone(),
                            cause: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Failed to sync feed '{}' ({}): {}", feed.title, feed.url, e);
                if let Err(store_err) = self.record_status(&feed.id, FeedStatus::Error, None).await {
                    error!(
                        "Failed to record error status for feed '{}': {}",
                        feed.id, store_err
                    );
                }
                FeedSyncResult::Failed {
                    feed_id: feed.id.clone(),
                    cause: e.to_string(),
                }
            }
        }
    }

    async fn fetch_and_cache(&self, feed: &Feed, fetched_at: DateTime<Utc>) -> anyhow::Result<usize> {
        let fetched = self.fetcher.fetch(&feed.url).await?;
        let count = fetched.articles.len();

        let cache = ArticleCache {
            feed_id: feed.id.clone(),
            last_fetched: Some(fetched_at),
            articles: fetched.articles,
        };
        self.store.save_article_cache(&cache).await?;

        info!("Stored {} articles for feed '{}'", count, feed.title);
        Ok(count)
    }

    /// Sets one feed's status; `last_updated` is only replaced when given.
    /// Returns false when the feed is no longer in the list.
    async fn record_status(
        &self,
        feed_id: &str,
        status: FeedStatus,
        last_updated: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let found = self
            .store
            .update_feeds(|feeds| match feeds.iter_mut().find(|f| f.id == feed_id) {
                Some(feed) => {
                    feed.status = status;
                    if let Some(at) = last_updated {
                        feed.last_updated = Some(at);
                    }
                    true
                }
                None => false,
            })
            .await?;

        if !found {
            debug!("Feed '{}' was removed during sync, status not recorded", feed_id);
        }
        Ok(found)
    }

    async fn discard_orphan_cache(&self, feed_id: &str) {
        let result = match DocumentKey::articles(feed_id) {
            Ok(key) => self.store.delete(&key).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to remove article cache of deleted feed '{}': {}", feed_id, e);
        }
    }
}

/// Runs one sync immediately, then every `interval_minutes` (never again if
/// zero). Meant to be spawned as a detached task at startup; it owns all of
/// its error handling and is simply dropped when the process exits.
pub async fn start_background_sync(coordinator: Arc<SyncCoordinator>, interval_minutes: u64) {
    info!("Starting initial feed sync");
    run_logged(&coordinator).await;

    if interval_minutes == 0 {
        return;
    }

    let interval = Duration::from_secs(interval_minutes * 60);
    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled feed sync");
        run_logged(&coordinator).await;
    }
}

async fn run_logged(coordinator: &SyncCoordinator) {
    if let Err(e) = coordinator.sync_all().await {
        error!("Feed sync failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_coordinator() -> (TempDir, Arc<DocumentStore>, SyncCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::open(dir.path()));
        let fetcher = Arc::new(Fetcher::new(Duration::from_secs(2), "feedstash-test").unwrap());
        let coordinator = SyncCoordinator::new(store.clone(), fetcher);
        (dir, store, coordinator)
    }

    #[test]
    fn test_report_counts() {
        let report = SyncReport {
            skipped: false,
            results: vec![
                FeedSyncResult::Updated {
                    feed_id: "a".to_string(),
                    articles: 3,
                },
                FeedSyncResult::Failed {
                    feed_id: "b".to_string(),
                    cause: "timeout".to_string(),
                },
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.results[1].feed_id(), "b");
    }

    #[tokio::test]
    async fn test_empty_feed_list() {
        let (_dir, _store, coordinator) = create_coordinator();
        let report = coordinator.sync_all().await.unwrap();
        assert!(report.results.is_empty());
        assert!(!coordinator.is_refreshing().await);
    }

    #[tokio::test]
    async fn test_unreachable_feed_marked_error() {
        let (_dir, store, coordinator) = create_coordinator();
        let mut feed = Feed::new("dead", "http://127.0.0.1:9/feed.xml", "Dead");
        let earlier = Utc::now() - chrono::Duration::days(1);
        feed.last_updated = Some(earlier);
        store.save_feeds(&[feed]).await.unwrap();

        let report = coordinator.sync_all().await.unwrap();
        assert_eq!(report.failed(), 1);

        let feeds = store.feeds().await.unwrap();
        assert_eq!(feeds[0].status, FeedStatus::Error);
        assert_eq!(feeds[0].last_updated, Some(earlier));
        assert!(!store
            .path_for(&DocumentKey::articles("dead").unwrap())
            .exists());
    }

    #[tokio::test]
    async fn test_sync_feed_unknown_id() {
        let (_dir, _store, coordinator) = create_coordinator();
        assert!(coordinator.sync_feed("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_sync_is_skipped_while_running() {
        let (_dir, _store, coordinator) = create_coordinator();
        *coordinator.refreshing.write().await = true;

        let report = coordinator.sync_all().await.unwrap();
        assert!(report.skipped);
    }

    #[tokio::test]
    async fn test_status_for_removed_feed_is_not_readded() {
        let (_dir, store, coordinator) = create_coordinator();
        store
            .save_feeds(&[Feed::new("kept", "https://kept.example/rss", "Kept")])
            .await
            .unwrap();

        let found = coordinator
            .record_status("gone", FeedStatus::Healthy, Some(Utc::now()))
            .await
            .unwrap();
        assert!(!found);

        let feeds = store.feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, "kept");
        assert_eq!(feeds[0].status, FeedStatus::Unknown);
    }

    #[tokio::test]
    async fn test_feed_list_read_failure_is_reported() {
        let (_dir, store, coordinator) = create_coordinator();
        std::fs::write(store.path_for(&DocumentKey::Feeds), "not json").unwrap();

        assert!(coordinator.sync_all().await.is_err());
        assert!(!coordinator.is_refreshing().await);
    }
}
