//! Configuration system for Ferry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ferry/config.toml
//!   3. ~/.config/ferry/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::integrity::ChecksumAlgorithm;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub network: NetworkConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local UDP address. Port 0 = OS-assigned.
    pub bind_addr: SocketAddr,
    /// Where `ferryd send` delivers blocks.
    pub peer_addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Checksum attached to every block. Both ends must agree.
    pub checksum: ChecksumAlgorithm,
    /// First sequence number a sender assigns, and the base a receiver expects.
    pub initial_sequence: u32,
    /// Retransmission timeout for a block's first resend.
    pub initial_rto_ms: u64,
    /// Ceiling for the doubled timeout after repeated resends.
    pub max_rto_ms: u64,
    /// Resends allowed per block before the connection fails.
    pub max_retries: u32,
    /// How often the retransmission loop scans the in-flight set.
    pub scan_interval_ms: u64,
    /// How far past its base a receiver buffers out-of-order blocks.
    pub receive_window: u32,
    /// A receiver forgets a peer it has not heard from for this long.
    pub peer_idle_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 47_000)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 47_000)),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            checksum: ChecksumAlgorithm::ByteSum,
            initial_sequence: 0,
            initial_rto_ms: 500,
            max_rto_ms: 8_000,
            max_retries: 8,
            scan_interval_ms: 100,
            receive_window: 4_096,
            peer_idle_timeout_ms: 120_000,
        }
    }
}

impl TransportConfig {
    pub fn initial_rto(&self) -> Duration {
        Duration::from_millis(self.initial_rto_ms.max(1))
    }

    pub fn max_rto(&self) -> Duration {
        Duration::from_millis(self.max_rto_ms.max(self.initial_rto_ms).max(1))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }

    pub fn peer_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_idle_timeout_ms.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ferry")
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
    #[error("initial_sequence {0} does not fit the 7-digit sequence space")]
    InitialSequence(u32),
    #[error("transport.{0} must be greater than zero")]
    Zero(&'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FerryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            FerryConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
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
            let text = toml::to_string_pretty(&FerryConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transport;
        crate::seq::Seq::new(t.initial_sequence)
            .map_err(|_| ConfigError::InitialSequence(t.initial_sequence))?;
        if t.initial_rto_ms == 0 {
            return Err(ConfigError::Zero("initial_rto_ms"));
        }
        if t.receive_window == 0 {
            return Err(ConfigError::Zero("receive_window"));
        }
        Ok(())
    }

    /// Apply FERRY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FERRY_NETWORK__BIND_ADDR") {
            if let Ok(addr) = v.parse() {
                self.network.bind_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("FERRY_NETWORK__PEER_ADDR") {
            if let Ok(addr) = v.parse() {
                self.network.peer_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("FERRY_TRANSPORT__CHECKSUM") {
            if let Ok(algorithm) = v.parse() {
                self.transport.checksum = algorithm;
            }
        }
        if let Ok(v) = std::env::var("FERRY_TRANSPORT__MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.transport.max_retries = n;
            }
        }
    }
}
