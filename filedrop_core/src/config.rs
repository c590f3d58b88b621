use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::{DISCOVERY_INTERVAL_SECS, DISCOVERY_PORT, DiscoveryConfig};
use crate::transfer::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT, TRANSFER_PORT};
use crate::transfer::{AcceptMode, SessionOptions};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "filedrop";
const APP_NAME: &str = "filedrop";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config directory (used by tests and portable setups)
pub const CONFIG_DIR_ENV: &str = "FILEDROP_CONFIG_DIR";

/// How long the coordinator waits for the first discovery reply by default
const DISCOVERY_TIMEOUT_SECS: u64 = 30;

/// Settings of one node. Missing fields in the file fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub transfer_port: u16,
    pub discovery_port: u16,
    /// Local UDP port of the beacon; `None` uses `discovery_port`
    pub discovery_bind_port: Option<u16>,
    pub broadcast_addr: IpAddr,
    pub discovery_interval_ms: u64,
    pub discovery_timeout_ms: u64,
    /// Answer other nodes' probes with PEER_RESPONSE
    pub respond_to_probes: bool,
    /// Where received files are written; "." is the working directory
    pub download_dir: PathBuf,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub accept_mode: AcceptMode,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            transfer_port: TRANSFER_PORT,
            discovery_port: DISCOVERY_PORT,
            discovery_bind_port: None,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_interval_ms: DISCOVERY_INTERVAL_SECS * 1000,
            discovery_timeout_ms: DISCOVERY_TIMEOUT_SECS * 1000,
            respond_to_probes: true,
            download_dir: PathBuf::from("."),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            io_timeout_ms: DEFAULT_IO_TIMEOUT.as_millis() as u64,
            accept_mode: AcceptMode::Once,
        }
    }
}

impl NodeConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from a specific file, falling back to defaults if it is missing or invalid
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().context("No config directory available")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.discovery_bind_port.unwrap_or(self.discovery_port),
            probe_target: SocketAddr::new(self.broadcast_addr, self.discovery_port),
            interval: self.discovery_interval(),
            respond_to_probes: self.respond_to_probes,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }
}
