//! Daemon configuration loaded from `config.json`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Format, Json, Serialized};
use serde::{Deserialize, Serialize};

use crate::data_dir::DataDir;

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read or parsed.
    #[error("failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The configuration file could not be written.
    #[error("failed to write config file: {0}")]
    Write(#[from] std::io::Error),

    /// A configuration value was invalid.
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue {
        /// The configuration key that had an invalid value.
        key: String,
        /// A description of why the value is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Contents of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Listen address for the TCP HTTP transport. A bare `:port` form
    /// means every interface.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Root of the daemon's filesystem state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database path override; defaults to `<data_dir>/bor.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

fn default_listen_addr() -> String {
    ":8042".to_owned()
}

fn default_data_dir() -> PathBuf {
    DataDir::default_root()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            db_path: None,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration: defaults, overlaid with `config.json` when the
    /// file exists.
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        }
        figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".into(),
                reason: e.to_string(),
            })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Resolves the database path.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| DataDir::new(&self.data_dir).db_path())
    }

    /// Parses `listen_addr` into a socket address, accepting the bare
    /// `:port` shorthand for all interfaces.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = if self.listen_addr.starts_with(':') {
            format!("0.0.0.0{}", self.listen_addr)
        } else {
            self.listen_addr.clone()
        };
        addr.parse().map_err(|e| ConfigError::InvalidValue {
            key: "listen_addr".into(),
            reason: format!("{}: {e}", self.listen_addr),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen_addr, ":8042");
        assert_eq!(config.socket_addr().unwrap().port(), 8042);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.listen_addr, ":8042");
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = DaemonConfig::default();
        config.listen_addr = "127.0.0.1:9999".into();
        config.data_dir = dir.path().to_path_buf();
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.listen_addr, "127.0.0.1:9999");
        assert_eq!(loaded.db_path().file_name().unwrap(), "bor.db");
    }

    #[test]
    fn bad_listen_addr_is_invalid_value() {
        let mut config = DaemonConfig::default();
        config.listen_addr = "not-an-addr".into();
        assert!(matches!(
            config.socket_addr().unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }
}
