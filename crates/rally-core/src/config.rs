//! Configuration system for Rally.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RALLY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rally/config.toml
//!   3. ~/.config/rally/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::DEFAULT_CHUNK_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RallyConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub presence: PresenceConfig,
    pub latency: LatencyConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Name announced in the shared game state.
    pub display_name: String,
    /// Fixed peer id. Empty = fresh random id per process.
    pub peer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network interface for the multicast bus. Empty = take it from argv.
    pub interface: String,
    /// UDP port every peer on the link listens on.
    pub port: u16,
    /// Local HTTP API port (127.0.0.1 only).
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub heartbeat_interval_ms: u64,
    /// A peer silent for this long is expired. Sweeps run every ttl/2.
    pub peer_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub probe_interval_ms: u64,
    /// Probes unanswered after this long are forgotten, never retried.
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Outbound chunk size. Clamped down to what the transport can carry.
    pub chunk_size: u32,
    /// Pause between consecutive chunks of one transfer.
    pub chunk_delay_ms: u64,
    /// Inbound transfers with no new chunk for this long are abandoned.
    pub inactivity_timeout_ms: u64,
    /// Largest transfer accepted in either direction.
    pub max_transfer_bytes: u64,
    /// Where completed inbound payloads are written.
    pub storage_path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: std::env::var("USER").unwrap_or_else(|_| "player".to_string()),
            peer_id: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: 9100,
            api_port: 9101,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            peer_ttl_ms: 10_000,
        }
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 2_000,
            probe_timeout_ms: 5_000,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay_ms: 10,
            inactivity_timeout_ms: 30_000,
            max_transfer_bytes: 256 * 1024 * 1024,
            storage_path: data_dir().join("received"),
        }
    }
}

impl PresenceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_millis(self.peer_ttl_ms)
    }
}

impl LatencyConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl TransferConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("rally")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("rally")
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
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, &'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RallyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RallyConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RALLY_CONFIG")
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
            let text = toml::to_string_pretty(&RallyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings that would stall a protocol loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid("transfer.chunk_size", "must be non-zero"));
        }
        if self.presence.peer_ttl_ms == 0 {
            return Err(ConfigError::Invalid("presence.peer_ttl_ms", "must be non-zero"));
        }
        if self.presence.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "presence.heartbeat_interval_ms",
                "must be non-zero",
            ));
        }
        if self.latency.probe_interval_ms == 0 {
            return Err(ConfigError::Invalid("latency.probe_interval_ms", "must be non-zero"));
        }
        Ok(())
    }

    /// Apply RALLY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RALLY_IDENTITY__DISPLAY_NAME") {
            self.identity.display_name = v;
        }
        if let Ok(v) = std::env::var("RALLY_IDENTITY__PEER_ID") {
            self.identity.peer_id = v;
        }
        if let Ok(v) = std::env::var("RALLY_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Ok(v) = std::env::var("RALLY_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("RALLY_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Ok(v) = std::env::var("RALLY_PRESENCE__PEER_TTL_MS") {
            if let Ok(ms) = v.parse() {
                self.presence.peer_ttl_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("RALLY_TRANSFER__CHUNK_SIZE") {
            if let Ok(size) = v.parse() {
                self.transfer.chunk_size = size;
            }
        }
        if let Ok(v) = std::env::var("RALLY_TRANSFER__STORAGE_PATH") {
            self.transfer.storage_path = PathBuf::from(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_protocol_defaults() {
        let config = RallyConfig::default();
        assert_eq!(config.presence.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.presence.peer_ttl(), Duration::from_secs(10));
        assert_eq!(config.transfer.chunk_size, 65_536);
        assert_eq!(config.transfer.chunk_delay(), Duration::from_millis(10));
        assert_eq!(config.transfer.inactivity_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = RallyConfig::from_toml(
            r#"
            [presence]
            peer_ttl_ms = 4000

            [transfer]
            chunk_size = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.presence.peer_ttl_ms, 4000);
        assert_eq!(config.presence.heartbeat_interval_ms, 5000);
        assert_eq!(config.transfer.chunk_size, 1024);
        assert_eq!(config.network.port, 9100);
    }

    #[test]
    fn zero_chunk_size_is_invalid() {
        let mut config = RallyConfig::default();
        config.transfer.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("transfer.chunk_size", _))
        ));
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("rally-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("RALLY_CONFIG", config_path.to_str().unwrap());
        }

        let path = RallyConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = RallyConfig::load().expect("load should succeed");
        assert_eq!(config.presence.peer_ttl_ms, 10_000);
        assert_eq!(config.latency.probe_timeout_ms, 5_000);

        unsafe {
            std::env::remove_var("RALLY_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
