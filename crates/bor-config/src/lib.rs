//! Daemon configuration and filesystem layout.
//!
//! The daemon keeps its state under one data directory (default
//! `~/.boxofrocks`): the SQLite database, the PID file, the log file, the
//! upstream API token and `config.json` itself.

pub mod config;
pub mod data_dir;
pub mod pidfile;
pub mod token;

pub use config::{ConfigError, DaemonConfig};
pub use data_dir::DataDir;
