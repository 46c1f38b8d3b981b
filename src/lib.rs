//! Feedstash - local feed library storage and synchronization
//!
//! Persists feeds, categories, article caches, read states and settings as
//! JSON documents in a data directory, migrates those documents across
//! application versions, and refreshes every feed concurrently in the
//! background.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod migration;
pub mod model;
pub mod routes;
pub mod store;
pub mod sync;
pub mod updater;
pub mod version;

/// Version of the running build; the schema version migrations target.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
