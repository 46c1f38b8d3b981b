use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DATA_DIR_ENV: &str = "FEEDSTASH_DATA_DIR";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory holding the JSON documents
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Refresh interval in minutes; 0 syncs only at startup
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Release manifest consulted by the update check
    #[serde(default)]
    pub update_manifest_url: Option<String>,
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("feedstash/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            bind_address: default_bind_address(),
            refresh_interval: default_refresh_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
            update_manifest_url: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Data directory: `FEEDSTASH_DATA_DIR`, then `data_dir`, then the
    /// platform's per-user data directory.
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir_with_override(std::env::var(DATA_DIR_ENV).ok())
    }

    fn data_dir_with_override(&self, env_override: Option<String>) -> PathBuf {
        if let Some(dir) = env_override.filter(|d| !d.is_empty()) {
            return PathBuf::from(dir);
        }
        if let Some(dir) = &self.data_dir {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feedstash")
    }
}
