//! Shared state for all transports and handlers.

use std::sync::Arc;
use std::time::Instant;

use bor_storage::SqliteStore;
use bor_sync::SyncManager;

use crate::transports::Transports;

/// Repo id stamped onto requests arriving through a per-worktree
/// transport (Unix socket or file queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketRepo(pub i64);

/// Shared application state behind every handler.
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub sync: Option<Arc<SyncManager>>,
    pub transports: Transports,
    /// Set once the daemon is fully started; drives the health uptime.
    pub started_at: Option<Instant>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(store: Arc<SqliteStore>, sync: Option<Arc<SyncManager>>) -> Self {
        Self {
            store,
            sync,
            transports: Transports::new(),
            started_at: None,
        }
    }

    /// Marks the daemon started.
    pub fn started(mut self) -> Self {
        self.started_at = Some(Instant::now());
        self
    }
}
