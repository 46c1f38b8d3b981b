use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedstash::config::Config;
use feedstash::fetcher::Fetcher;
use feedstash::migration::{run_startup_migrations, MigrationOutcome};
use feedstash::routes::{self, AppState};
use feedstash::store::DocumentStore;
use feedstash::sync::{start_background_sync, SyncCoordinator};
use feedstash::updater::ManifestUpdater;
use feedstash::version::Version;
use feedstash::APP_VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedstash=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("FEEDSTASH_CONFIG").unwrap_or_else(|_| "feedstash.toml".to_string());
    let config = Config::load_or_default(&config_path)?;

    let data_dir = config.resolve_data_dir();
    let store = Arc::new(DocumentStore::open(&data_dir));
    info!("Using data directory {}", data_dir.display());

    // Migrations finish before anything else reads the documents
    let current = Version::parse(APP_VERSION)?;
    match run_startup_migrations(&store, &current).await {
        Some(MigrationOutcome::Migrated { applied }) => {
            info!("Applied {} migration(s)", applied.len())
        }
        Some(MigrationOutcome::NoPath { stored, .. }) => {
            warn!("Data left at version {}", stored)
        }
        Some(_) => {}
        None => warn!("Continuing with unmigrated data"),
    }

    let fetcher = Arc::new(Fetcher::from_config(&config)?);
    let coordinator = Arc::new(SyncCoordinator::new(store.clone(), fetcher));

    // Detached; its only output is the log
    tokio::spawn(start_background_sync(
        coordinator.clone(),
        config.refresh_interval,
    ));

    let updater = Arc::new(ManifestUpdater::new(
        config.update_manifest_url.clone(),
        current,
        Duration::from_secs(config.fetch_timeout_secs),
    )?);

    let state = Arc::new(AppState {
        store,
        coordinator,
        updater,
    });

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
