//! Configuration system for ringmesh.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RINGMESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ringmesh/config.toml
//!   3. ~/.config/ringmesh/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub handshake: HandshakeConfig,
    pub leaf: LeafConfig,
    pub unstructured: UnstructuredConfig,
    pub managed: ManagedConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Namespace shared by all nodes of one overlay.
    pub realm: String,
    /// Seed for a stable ring address. Empty = random address per run.
    pub address_seed: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Endpoints this node listens on, advertised to peers.
    pub local_tas: Vec<String>,
    /// Known bootstrap endpoints.
    pub remote_tas: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_ms: u64,
    /// How long a connect handshake waits for its reply stream to close.
    pub reply_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Structured neighbors returned in a connect response.
    pub nearest_neighbors: usize,
    /// Local transports advertised per message.
    pub max_transports: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafConfig {
    pub desired: usize,
    /// First retry delay; doubles after each attempt.
    pub retry_interval_ms: u64,
    /// Ceiling for the doubled retry delay.
    pub max_retry_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnstructuredConfig {
    pub initial_desired: usize,
    /// Below this many unstructured links, requests go out through a leaf.
    pub bootstrap_threshold: usize,
    pub connect_ttl: u16,
    /// Chance of a second increment when `desired` ratchets up.
    pub extra_growth_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedConfig {
    /// Ring addresses (text form) to keep connected.
    pub pinned: Vec<String>,
    pub check_interval_secs: u64,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// Network interface name. Empty = let the OS pick.
    pub interface: String,
    pub port: u16,
    pub announce_interval_secs: u64,
    /// How long a query collects replies.
    pub reply_window_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            realm: "ringmesh".to_string(),
            address_seed: String::new(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 1_000,
            reply_timeout_ms: 20_000,
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            nearest_neighbors: 4,
            max_transports: 12,
        }
    }
}

impl Default for LeafConfig {
    fn default() -> Self {
        Self {
            desired: 2,
            retry_interval_ms: 10_000,
            max_retry_interval_ms: 60_000,
        }
    }
}

impl Default for UnstructuredConfig {
    fn default() -> Self {
        Self {
            initial_desired: 2,
            bootstrap_threshold: 2,
            connect_ttl: 10,
            extra_growth_probability: 0.5,
        }
    }
}

impl Default for ManagedConfig {
    fn default() -> Self {
        Self {
            pinned: Vec::new(),
            check_interval_secs: 3_600,
            retry_delay_ms: 1_000,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: String::new(),
            port: 7_401,
            announce_interval_secs: 600,
            reply_window_ms: 2_000,
        }
    }
}

// ── Durations ─────────────────────────────────────────────────────────────────

impl TimingConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl LeafConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms.max(self.retry_interval_ms))
    }
}

impl ManagedConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl DiscoveryConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn reply_window(&self) -> Duration {
        Duration::from_millis(self.reply_window_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("ringmesh")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl OverlayConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            OverlayConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RINGMESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&OverlayConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply RINGMESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RINGMESH_NODE__REALM") {
            self.node.realm = v;
        }
        if let Some(v) = lookup("RINGMESH_NODE__ADDRESS_SEED") {
            self.node.address_seed = v;
        }
        if let Some(v) = lookup("RINGMESH_NETWORK__LOCAL_TAS") {
            self.network.local_tas = split_list(&v);
        }
        if let Some(v) = lookup("RINGMESH_NETWORK__REMOTE_TAS") {
            self.network.remote_tas = split_list(&v);
        }
        if let Some(v) = lookup("RINGMESH_DISCOVERY__ENABLED") {
            self.discovery.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("RINGMESH_DISCOVERY__INTERFACE") {
            self.discovery.interface = v;
        }
        if let Some(v) = lookup("RINGMESH_DISCOVERY__PORT") {
            if let Ok(p) = v.parse() {
                self.discovery.port = p;
            }
        }
        if let Some(v) = lookup("RINGMESH_LEAF__DESIRED") {
            if let Ok(n) = v.parse() {
                self.leaf.desired = n;
            }
        }
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
