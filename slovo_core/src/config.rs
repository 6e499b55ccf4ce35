use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::discovery::{DISCOVERY_PORT, DISCOVERY_TIMEOUT};
use crate::transfer::DEFAULT_CHUNK_SIZE;
use crate::transfer::constants::transfer_port_for;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "slovo";
const APP_NAME: &str = "slovo";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config directory (used by tests and portable installs)
pub const CONFIG_DIR_ENV: &str = "SLOVO_CONFIG_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name announced to peers that probe this host
    pub display_name: String,
    /// Where received files land
    pub download_path: PathBuf,
    /// UDP discovery port; the transfer port is always one above it
    pub discovery_port: u16,
    pub chunk_size: usize,
    pub discovery_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            display_name: get_host_name(),
            download_path: get_download_dir(),
            discovery_port: DISCOVERY_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            discovery_timeout_ms: DISCOVERY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl AppConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`, falling back to defaults when it is missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = Self::get_config_path()
            .ok_or_else(|| anyhow::anyhow!("no config directory available"))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The TCP port one above the discovery port
    pub fn transfer_port(&self) -> anyhow::Result<u16> {
        transfer_port_for(self.discovery_port).ok_or_else(|| {
            anyhow::anyhow!(
                "discovery port {} leaves no room for the transfer port above it",
                self.discovery_port
            )
        })
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Chunk size with a floor of one byte so streaming always advances
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// The user's downloads directory, falling back to ~/Downloads
pub fn get_download_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| {
            dirs.download_dir()
                .map(|d| d.to_path_buf())
                .or_else(|| Some(dirs.home_dir().join("Downloads")))
        })
        .unwrap_or_else(|| PathBuf::from("Downloads"))
}

/// This machine's host name, used as the default display name
pub fn get_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "Unknown-PC".to_string())
}
