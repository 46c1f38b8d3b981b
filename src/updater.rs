use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::UpdateError;
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UpdateStatus {
    NotChecked,
    UpToDate { version: String },
    Available { version: String, url: String },
    Failed { message: String },
}

#[derive(Debug, Deserialize)]
struct ReleaseManifest {
    version: String,
    url: String,
}

/// Checks a JSON release manifest (`{"version": ..., "url": ...}`) for a
/// newer build. Downloading and installing belong to the platform
/// installer; `install` only hands over the download location.
pub struct ManifestUpdater {
    client: Client,
    manifest_url: Option<String>,
    current: Version,
    status: RwLock<UpdateStatus>,
}

impl ManifestUpdater {
    pub fn new(
        manifest_url: Option<String>,
        current: Version,
        timeout: Duration,
    ) -> Result<Self, UpdateError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpdateError::Request(e.to_string()))?;

        Ok(Self {
            client,
            manifest_url,
            current,
            status: RwLock::new(UpdateStatus::NotChecked),
        })
    }

    pub async fn check(&self) -> Result<UpdateStatus, UpdateError> {
        let url = self
            .manifest_url
            .as_deref()
            .ok_or(UpdateError::NotConfigured)?;

        match self.compare_manifest(url).await {
            Ok(status) => {
                *self.status.write().await = status.clone();
                Ok(status)
            }
            Err(e) => {
                warn!("Update check failed: {}", e);
                *self.status.write().await = UpdateStatus::Failed {
                    message: e.to_string(),
                };
                Err(e)
            }
        }
    }

    async fn compare_manifest(&self, url: &str) -> Result<UpdateStatus, UpdateError> {
        let manifest = self.fetch_manifest(url).await?;
        let latest = Version::parse(&manifest.version)?;

        if latest > self.current {
            info!("Update available: {} -> {}", self.current, latest);
            Ok(UpdateStatus::Available {
                version: latest.to_string(),
                url: manifest.url,
            })
        } else {
            Ok(UpdateStatus::UpToDate {
                version: self.current.to_string(),
            })
        }
    }

    async fn fetch_manifest(&self, url: &str) -> Result<ReleaseManifest, UpdateError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| UpdateError::Request(e.to_string()))?;

        response
            .json::<ReleaseManifest>()
            .await
            .map_err(|e| UpdateError::Request(e.to_string()))
    }

    pub async fn status(&self) -> UpdateStatus {
        self.status.read().await.clone()
    }

    /// Returns the download URL of the update found by the last check.
    pub async fn install(&self) -> Result<String, UpdateError> {
        match &*self.status.read().await {
            UpdateStatus::Available { version, url } => {
                info!("Handing update {} to the installer: {}", version, url);
                Ok(url.clone())
            }
            _ => Err(UpdateError::NoUpdateAvailable),
        }
    }
}
