use std::path::PathBuf;

use thiserror::Error;

/// Failure reading or writing a persisted document.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid document key '{0}'")]
    InvalidKey(String),

    #[error("I/O error on document '{key}' ({path}): {source}")]
    Io {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document '{key}' is not valid JSON: {source}")]
    Parse {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("document '{key}' does not have the expected shape: {source}")]
    Shape {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize document '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("background write task for '{0}' did not complete")]
    Interrupted(String),
}

/// Failure retrieving or parsing one remote feed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not build HTTP client: {0}")]
    Client(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("malformed feed: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version string is empty")]
    Empty,

    #[error("invalid version component '{component}' in '{version}'")]
    InvalidComponent { version: String, component: String },
}

/// Failure while bringing the data directory up to the current schema.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    InvalidVersion(#[from] VersionError),

    #[error("migration {name} failed: {source}")]
    StepFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("no update manifest is configured")]
    NotConfigured,

    #[error("no update is available")]
    NoUpdateAvailable,

    #[error("update check failed: {0}")]
    Request(String),

    #[error(transparent)]
    InvalidVersion(#[from] VersionError),
}
