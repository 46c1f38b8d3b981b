use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::{StoreError, UpdateError};
use crate::model::{ArticleCache, Category, Feed, ReadStates, Settings, APP_VERSION_KEY};
use crate::store::{DocumentKey, DocumentStore};
use crate::sync::{FeedSyncResult, SyncCoordinator};
use crate::updater::ManifestUpdater;

pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub coordinator: Arc<SyncCoordinator>,
    pub updater: Arc<ManifestUpdater>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/documents/:key", get(get_document).put(put_document))
        .route("/feeds", get(get_feeds).put(put_feeds))
        .route("/feeds/:id", delete(delete_feed))
        .route("/feeds/:id/articles", get(get_articles).put(put_articles))
        .route("/feeds/:id/fetch", post(fetch_feed_now))
        .route("/categories", get(get_categories).put(put_categories))
        .route("/read-states", get(get_read_states).put(put_read_states))
        .route("/read-states/:article_id", put(put_read_state))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/sync", post(start_sync))
        .route("/sync/status", get(sync_status))
        .route("/update/check", post(check_update))
        .route("/update/status", get(update_status))
        .route("/update/install", post(install_update))
        .with_state(state)
}

// Custom error type
pub enum AppError {
    Store(StoreError),
    Update(UpdateError),
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Store(e @ StoreError::InvalidKey(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Store(e) => {
                error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Update(e @ UpdateError::NotConfigured) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            AppError::Update(e @ UpdateError::NoUpdateAvailable) => {
                (StatusCode::CONFLICT, e.to_string())
            }
            AppError::Update(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<UpdateError> for AppError {
    fn from(err: UpdateError) -> Self {
        AppError::Update(err)
    }
}

pub async fn health() -> impl IntoResponse {
    "OK"
}

// Raw documents

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, AppError> {
    let key = DocumentKey::parse(&key)?;
    Ok(Json(state.store.read(&key).await?))
}

/// Writes a document by key. Known documents go through the same checks as
/// their dedicated routes; only custom keys are stored as given.
pub async fn put_document(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> Result<StatusCode, AppError> {
    let key = DocumentKey::parse(&key)?;
    let store = &state.store;

    match &key {
        DocumentKey::Feeds => save_feeds(store, typed_body(&key, value)?).await?,
        DocumentKey::Categories => {
            let categories: Vec<Category> = typed_body(&key, value)?;
            store.save_categories(&categories).await?
        }
        DocumentKey::ReadStates => {
            let states: ReadStates = typed_body(&key, value)?;
            store.save_read_states(&states).await?
        }
        DocumentKey::Settings => replace_settings(store, typed_body(&key, value)?).await?,
        DocumentKey::Articles(feed_id) => {
            save_article_cache(store, feed_id, typed_body(&key, value)?).await?
        }
        DocumentKey::Custom(_) => store.write(&key, &value).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

fn typed_body<T: DeserializeOwned>(key: &DocumentKey, value: Value) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|e| AppError::BadRequest(format!("invalid '{}' document: {}", key, e)))
}

async fn save_feeds(store: &DocumentStore, feeds: Vec<Feed>) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    if let Some(dup) = feeds.iter().find(|f| !seen.insert(f.id.as_str())) {
        return Err(AppError::BadRequest(format!("duplicate feed id '{}'", dup.id)));
    }

    store.save_feeds(&feeds).await?;
    Ok(())
}

async fn save_article_cache(
    store: &DocumentStore,
    feed_id: &str,
    cache: ArticleCache,
) -> Result<(), AppError> {
    if cache.feed_id != feed_id {
        return Err(AppError::BadRequest(format!(
            "article cache belongs to '{}', not '{}'",
            cache.feed_id, feed_id
        )));
    }

    store.save_article_cache(&cache).await?;
    Ok(())
}

/// Replaces the settings. The schema version marker is owned by the
/// migration engine and keeps its stored value.
async fn replace_settings(store: &DocumentStore, mut incoming: Settings) -> Result<(), AppError> {
    store
        .update(&DocumentKey::Settings, move |settings: &mut Settings| {
            match settings.remove(APP_VERSION_KEY) {
                Some(marker) => {
                    incoming.insert(APP_VERSION_KEY.to_string(), marker);
                }
                None => {
                    incoming.remove(APP_VERSION_KEY);
                }
            }
            *settings = incoming;
        })
        .await?;
    Ok(())
}

// Feeds

pub async fn get_feeds(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Feed>>, AppError> {
    Ok(Json(state.store.feeds().await?))
}

pub async fn put_feeds(
    State(state): State<Arc<AppState>>,
    Json(feeds): Json<Vec<Feed>>,
) -> Result<StatusCode, AppError> {
    save_feeds(&state.store, feeds).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_feed(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("feed '{}' not found", id)))
    }
}

pub async fn get_articles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ArticleCache>, AppError> {
    Ok(Json(state.store.article_cache(&id).await?))
}

pub async fn put_articles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(cache): Json<ArticleCache>,
) -> Result<StatusCode, AppError> {
    save_article_cache(&state.store, &id, cache).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn fetch_feed_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    match state.coordinator.sync_feed(&id).await? {
        Some(result @ FeedSyncResult::Updated { .. }) => Ok(Json(result).into_response()),
        Some(result @ FeedSyncResult::Failed { .. }) => {
            Ok((StatusCode::BAD_GATEWAY, Json(result)).into_response())
        }
        None => Err(AppError::NotFound(format!("feed '{}' not found", id))),
    }
}

// Categories, read states, settings

pub async fn get_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.store.categories().await?))
}

pub async fn put_categories(
    State(state): State<Arc<AppState>>,
    Json(categories): Json<Vec<Category>>,
) -> Result<StatusCode, AppError> {
    state.store.save_categories(&categories).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_read_states(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadStates>, AppError> {
    Ok(Json(state.store.read_states().await?))
}

pub async fn put_read_states(
    State(state): State<Arc<AppState>>,
    Json(states): Json<ReadStates>,
) -> Result<StatusCode, AppError> {
    state.store.save_read_states(&states).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ReadStateBody {
    pub read: bool,
}

pub async fn put_read_state(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<String>,
    Json(body): Json<ReadStateBody>,
) -> Result<impl IntoResponse, AppError> {
    let read_state = state.store.set_read_state(&article_id, body.read).await?;
    Ok(Json(read_state))
}

pub async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<Settings>, AppError> {
    Ok(Json(state.store.settings().await?))
}

pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(incoming): Json<Settings>,
) -> Result<StatusCode, AppError> {
    replace_settings(&state.store, incoming).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Sync

pub async fn start_sync(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = coordinator.sync_all().await {
            error!("Requested sync failed: {}", e);
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "refreshing": true })))
}

pub async fn sync_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.coordinator.is_refreshing().await;
    Json(json!({ "refreshing": refreshing }))
}

// Updates

pub async fn check_update(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.updater.check().await?))
}

pub async fn update_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.updater.status().await)
}

pub async fn install_update(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let url = state.updater.install().await?;
    Ok(Json(json!({ "url": url })))
}
