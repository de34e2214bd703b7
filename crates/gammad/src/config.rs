//! Daemon configuration.
//!
//! Read from an optional TOML file (`--config` flag or the `GAMMAD_CONFIG`
//! environment variable); every section falls back to defaults matching the
//! original field deployment: TCP service on port 7000, UDP on 9999, 50 ms
//! session tick, 300 ms position poll.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub detector: DetectorSection,

    #[serde(default)]
    pub position: PositionConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Listening endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Stream (framed TCP) endpoint
    #[serde(default = "default_tcp_listen")]
    pub tcp_listen: String,

    /// Datagram (UDP) endpoint
    #[serde(default = "default_udp_listen")]
    pub udp_listen: String,
}

/// Detector driver selection.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DetectorSection {
    /// Driver registry key (`sim` is the only driver shipped in-tree)
    #[serde(default = "default_detector_kind")]
    pub kind: String,
}

/// Position source selection and polling.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PositionConfig {
    /// Source registry key: `gpsd` or `none`
    #[serde(default = "default_position_source")]
    pub source: String,

    /// gpsd endpoint, used when source is `gpsd`
    #[serde(default = "default_gpsd_addr")]
    pub gpsd_addr: String,

    /// Interval between sample-buffer drains, in milliseconds
    #[serde(default = "default_position_poll_ms")]
    pub poll_interval_ms: u64,
}

/// Session scheduling.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Interval of the acquisition tick, in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,
}

/// Spectrum persistence.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Sink registry key: `jsonl` or `memory`
    #[serde(default = "default_storage_kind")]
    pub kind: String,

    /// Directory for the `jsonl` sink; platform data dir when omitted
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_tcp_listen() -> String {
    "0.0.0.0:7000".to_string()
}

fn default_udp_listen() -> String {
    "0.0.0.0:9999".to_string()
}

fn default_detector_kind() -> String {
    "sim".to_string()
}

fn default_position_source() -> String {
    "gpsd".to_string()
}

fn default_gpsd_addr() -> String {
    "127.0.0.1:2947".to_string()
}

fn default_position_poll_ms() -> u64 {
    300
}

fn default_tick_ms() -> u64 {
    50
}

fn default_storage_kind() -> String {
    "jsonl".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_listen: default_tcp_listen(),
            udp_listen: default_udp_listen(),
        }
    }
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            kind: default_detector_kind(),
        }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            source: default_position_source(),
            gpsd_addr: default_gpsd_addr(),
            poll_interval_ms: default_position_poll_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_kind(),
            dir: None,
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Config {
    /// Loads configuration from an explicit path, from `GAMMAD_CONFIG`,
    /// or falls back to defaults when neither is set.
    ///
    /// An explicitly named file that is missing or malformed is an error;
    /// running with no file at all is not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os("GAMMAD_CONFIG").map(PathBuf::from);
        let path = match (path, env_path.as_deref()) {
            (Some(p), _) => p,
            (None, Some(p)) => p,
            (None, None) => return Ok(Self::default()),
        };

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.tcp_listen, "0.0.0.0:7000");
        assert_eq!(config.network.udp_listen, "0.0.0.0:9999");
        assert_eq!(config.detector.kind, "sim");
        assert_eq!(config.position.source, "gpsd");
        assert_eq!(config.session.tick_interval_ms, 50);
        assert_eq!(config.storage.kind, "jsonl");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [network]
            tcp_listen = "127.0.0.1:7100"

            [position]
            source = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.network.tcp_listen, "127.0.0.1:7100");
        assert_eq!(config.network.udp_listen, "0.0.0.0:9999");
        assert_eq!(config.position.source, "none");
        assert_eq!(config.position.poll_interval_ms, 300);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<Config, _> = toml::from_str("[network]\nbogus = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_explicit_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/gammad.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
