//! The daemon's data-directory layout.

use std::path::{Path, PathBuf};

/// Resolves the fixed file names under the daemon's data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Wraps an explicit root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.boxofrocks`, falling back to a relative `.boxofrocks` when no
    /// home directory can be resolved.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".boxofrocks")
    }

    /// Creates the directory if needed.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/bor.db`
    pub fn db_path(&self) -> PathBuf {
        self.root.join("bor.db")
    }

    /// `<root>/daemon.pid`
    pub fn pid_path(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    /// `<root>/daemon.log`
    pub fn log_path(&self) -> PathBuf {
        self.root.join("daemon.log")
    }

    /// `<root>/token`
    pub fn token_path(&self) -> PathBuf {
        self.root.join("token")
    }

    /// `<root>/config.json`
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }
}
