//! Configuration system for Pingu.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PINGU_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/pingu/config.toml
//!   3. ~/.config/pingu/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{MAX_CONFIGURABLE_PACKET_SIZE, MAX_PACKET_SIZE};

/// Default capacity of each probe's pong hand-off queue.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 256;

/// Default cap on concurrently running datagram dispatch tasks.
pub const DEFAULT_MAX_INFLIGHT_DISPATCH: usize = 1024;

/// Address a node binds when nothing else is configured.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4874";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PinguConfig {
    pub engine: EngineConfig,
    pub node: NodeConfig,
}

/// Options recognized by the liveness engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of a probe's pong hand-off queue. 0 = default.
    pub recv_buffer_size: usize,
    /// Log dropped datagrams, send failures, and loop lifecycle.
    pub verbose: bool,
    /// Largest datagram accepted. Clamped to [MAX_PACKET_SIZE, 257].
    pub max_packet_size: usize,
    /// Concurrent dispatch tasks. 0 = default.
    pub max_inflight_dispatch: usize,
    /// What to do with a pong when the waiting probe's queue is full.
    pub overflow: OverflowPolicy,
}

/// Behaviour of a full hand-off queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for the probe to drain the queue.
    #[default]
    Block,
    /// Discard the pong.
    Drop,
}

/// Daemon wiring: where to bind and whom to watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local UDP endpoint, `ip:port`.
    pub bind_addr: String,
    /// Peers registered for broadcast at startup, `ip:port` each.
    pub peers: Vec<String>,
    /// Interval between broadcast cycles.
    pub broadcast_period_ms: u64,
    /// Per-cycle pong wait. 0 = engine default.
    pub broadcast_timeout_ms: u64,
    /// How often the daemon logs the health table.
    pub report_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            verbose: false,
            max_packet_size: MAX_PACKET_SIZE,
            max_inflight_dispatch: DEFAULT_MAX_INFLIGHT_DISPATCH,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            peers: Vec::new(),
            broadcast_period_ms: 1000,
            broadcast_timeout_ms: 500,
            report_interval_secs: 5,
        }
    }
}

impl EngineConfig {
    /// Coerce out-of-range values into the ranges the engine relies on.
    pub fn normalized(mut self) -> Self {
        if self.recv_buffer_size < 1 {
            self.recv_buffer_size = DEFAULT_RECV_BUFFER_SIZE;
        }
        if self.max_inflight_dispatch < 1 {
            self.max_inflight_dispatch = DEFAULT_MAX_INFLIGHT_DISPATCH;
        }
        self.max_packet_size = self
            .max_packet_size
            .clamp(MAX_PACKET_SIZE, MAX_CONFIGURABLE_PACKET_SIZE);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn recv_buffer_size(mut self, capacity: usize) -> Self {
        self.recv_buffer_size = capacity;
        self
    }
}

impl NodeConfig {
    pub fn broadcast_period(&self) -> Duration {
        Duration::from_millis(self.broadcast_period_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("pingu")
}

fn dirs_or_home() -> PathBuf {
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

impl PinguConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            PinguConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PINGU_CONFIG")
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
            let text = toml::to_string_pretty(&PinguConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PINGU_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PINGU_ENGINE__VERBOSE") {
            self.engine.verbose = v == "true" || v == "1";
        }
        if let Some(v) = lookup("PINGU_ENGINE__RECV_BUFFER_SIZE") {
            if let Ok(n) = v.parse() {
                self.engine.recv_buffer_size = n;
            }
        }
        if let Some(v) = lookup("PINGU_NODE__BIND_ADDR") {
            self.node.bind_addr = v;
        }
        if let Some(v) = lookup("PINGU_NODE__PEERS") {
            self.node.peers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }
}
