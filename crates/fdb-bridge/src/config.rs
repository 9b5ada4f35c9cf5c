//! Configuration loading
//!
//! One TOML file configures all three layers:
//!
//! ```toml
//! [host]
//! unhandled_rejections = "strict"
//!
//! [bridge]
//! scratch_capacity = 1024
//! ignore_standard_errors = true
//!
//! [network]
//! worker_threads = 2
//! api_version = 710
//! ```

use std::path::{Path, PathBuf};

use fdb_host::HostConfig;
use fdb_native::{codes, ErrorCode, NetworkConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scratch::DEFAULT_SCRATCH_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bridge settings (`[bridge]` section)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Size of the shared key staging buffer.
    pub scratch_capacity: usize,
    /// Default for watches: settle `false` on benign errors instead of rejecting.
    pub ignore_standard_errors: bool,
    /// Error codes a watch treats as benign.
    pub benign_watch_errors: Vec<ErrorCode>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            ignore_standard_errors: true,
            benign_watch_errors: vec![
                codes::OPERATION_CANCELLED,
                codes::TRANSACTION_CANCELLED,
                codes::NOT_COMMITTED,
            ],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: HostConfig,
    pub bridge: BridgeConfig,
    pub network: NetworkConfig,
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Config::from_toml(&source)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdb_host::UnhandledRejections;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bridge.scratch_capacity, 1024);
        assert_eq!(config.bridge.benign_watch_errors, vec![1101, 1025, 1020]);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [host]
            unhandled_rejections = "warn"

            [bridge]
            ignore_standard_errors = false

            [network]
            worker_threads = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.host.unhandled_rejections, UnhandledRejections::Warn);
        assert!(!config.bridge.ignore_standard_errors);
        assert_eq!(config.bridge.scratch_capacity, 1024);
        assert_eq!(config.network.worker_threads, 4);
    }

    #[test]
    fn test_bad_toml_is_a_parse_error() {
        assert!(matches!(
            Config::from_toml("[bridge\nscratch_capacity = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::load(Path::new("/nonexistent/fdbb.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fdbb.toml"));
    }
}
