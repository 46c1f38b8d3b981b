//! Schema migrations for the data directory.
//!
//! The settings document records, under `appVersion`, the last application
//! version whose migrations were fully applied. On startup the steps needed
//! to move from that version to the running version are selected from an
//! explicit registry and applied one at a time. The marker is advanced only
//! after every selected step succeeded, so an interrupted run repeats the
//! same steps next time; steps must therefore be idempotent.

mod normalize_feeds;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{MigrationError, StoreError};
use crate::model::{Settings, APP_VERSION_KEY};
use crate::store::{DocumentKey, DocumentStore};
use crate::version::Version;

pub use normalize_feeds::NormalizeFeedFields;

/// Version assumed for a data directory that has never recorded one.
pub const INITIAL_VERSION: &str = "1.0.0";

/// One transformation of the on-disk documents from `from_version`'s shape
/// to `to_version`'s shape.
pub trait Migration: Send + Sync {
    fn from_version(&self) -> Version;

    fn to_version(&self) -> Version;

    fn name(&self) -> String {
        format!("{}-to-{}", self.from_version(), self.to_version())
    }

    /// Must be safe to run more than once against the same data.
    fn apply<'a>(&'a self, store: &'a DocumentStore) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Every migration shipped with this build.
pub fn registry() -> Vec<Box<dyn Migration>> {
    vec![Box::new(NormalizeFeedFields)]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Stored data already matches the running version.
    UpToDate,
    /// Data was written by a newer build; nothing was touched.
    StoredNewer { stored: Version, current: Version },
    /// No registered step covers the gap; the marker was left alone.
    NoPath { stored: Version, current: Version },
    /// Steps ran in order and the marker now equals the running version.
    Migrated { applied: Vec<String> },
}

pub struct Migrator {
    steps: Vec<Box<dyn Migration>>,
}

impl Migrator {
    pub fn new(steps: Vec<Box<dyn Migration>>) -> Self {
        Self { steps }
    }

    pub fn builtin() -> Self {
        Self::new(registry())
    }

    /// Steps to run for `stored -> current`, in execution order.
    ///
    /// A step is eligible when it moves forward, starts at or after the
    /// stored version, and does not end past the running version. Ties on
    /// the start version keep registry order.
    pub fn plan(&self, stored: &Version, current: &Version) -> Vec<&dyn Migration> {
        let mut selected: Vec<&dyn Migration> = self
            .steps
            .iter()
            .map(|step| step.as_ref())
            .filter(|step| {
                let from = step.from_version();
                let to = step.to_version();
                from < to && &from >= stored && &to <= current
            })
            .collect();

        selected.sort_by_key(|step| step.from_version());
        selected
    }

    pub async fn run(
        &self,
        store: &DocumentStore,
        current: &Version,
    ) -> Result<MigrationOutcome, MigrationError> {
        let stored = stored_version(store).await?;

        if &stored == current {
            info!("Data is already at version {}, no migration needed", current);
            return Ok(MigrationOutcome::UpToDate);
        }

        if &stored > current {
            warn!(
                "Stored version ({}) is newer than app version ({}), skipping migration",
                stored, current
            );
            return Ok(MigrationOutcome::StoredNewer {
                stored,
                current: current.clone(),
            });
        }

        let steps = self.plan(&stored, current);
        if steps.is_empty() {
            warn!(
                "No migrations found to upgrade from {} to {}, data version not updated",
                stored, current
            );
            return Ok(MigrationOutcome::NoPath {
                stored,
                current: current.clone(),
            });
        }

        info!("Running {} migration(s) from {} to {}", steps.len(), stored, current);

        let mut applied = Vec::with_capacity(steps.len());
        for step in steps {
            let name = step.name();
            info!("Running migration {}", name);

            step.apply(store)
                .await
                .map_err(|source| MigrationError::StepFailed {
                    name: name.clone(),
                    source,
                })?;

            info!("Migration {} completed", name);
            applied.push(name);
        }

        record_version(store, current).await?;
        info!("All migrations completed, data is now at version {}", current);

        Ok(MigrationOutcome::Migrated { applied })
    }
}

/// Reads the schema version marker, defaulting to [`INITIAL_VERSION`].
pub async fn stored_version(store: &DocumentStore) -> Result<Version, MigrationError> {
    let settings = store.settings().await?;
    let version = match settings.get(APP_VERSION_KEY) {
        None | Some(Value::Null) => Version::parse(INITIAL_VERSION)?,
        Some(Value::String(text)) => Version::parse(text)?,
        Some(other) => Version::parse(&other.to_string())?,
    };
    Ok(version)
}

/// Sets the schema version marker, keeping every other setting.
pub async fn record_version(store: &DocumentStore, version: &Version) -> Result<(), StoreError> {
    let text = version.to_string();
    store
        .update(&DocumentKey::Settings, move |settings: &mut Settings| {
            settings.insert(APP_VERSION_KEY.to_string(), Value::String(text));
        })
        .await
}

/// Runs the built-in migrations for startup. Failures are logged and the
/// application continues with whatever data is on disk.
pub async fn run_startup_migrations(
    store: &DocumentStore,
    current: &Version,
) -> Option<MigrationOutcome> {
    match Migrator::builtin().run(store, current).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!("Migration failed, continuing with existing data: {}", e);
            None
        }
    }
}
