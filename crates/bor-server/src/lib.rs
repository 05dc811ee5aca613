//! The boxofrocks daemon: one handler set, three transports.
//!
//! [`Daemon`] binds the TCP listener (before the PID file is written, so
//! a failed bind never leaves a stale PID), assembles the router, starts
//! per-worktree sockets and file queues, and owns graceful shutdown.

pub mod affinity;
pub mod error;
pub mod queue;
pub mod routes;
pub mod socket;
pub mod state;
pub mod transports;
pub mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use bor_config::config::ConfigError;
use bor_config::{DaemonConfig, DataDir, pidfile};
use bor_storage::{SqliteStore, StoreError};
use bor_sync::{SyncError, SyncManager};

pub use error::ApiError;
pub use state::{AppState, SharedState, SocketRepo};

const LOG_TARGET: &str = "bor::daemon";

/// Everything below must finish within this budget on shutdown.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

/// Daemon startup/runtime errors. All of these abort the process with a
/// diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to bind {addr}: {message}")]
    Bind {
        addr: String,
        message: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// The assembled daemon, ready to serve.
pub struct Daemon {
    state: SharedState,
    router: Router,
    listener: TcpListener,
    pid_path: PathBuf,
}

impl Daemon {
    /// Binds the TCP listener and wires up state, router and PID file.
    /// Bind failures are fatal and fast, with a pointed message for the
    /// common address-in-use case.
    pub async fn init(
        config: &DaemonConfig,
        store: Arc<SqliteStore>,
        sync: Option<Arc<SyncManager>>,
    ) -> Result<Self, DaemonError> {
        let addr = config.socket_addr()?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            let message = if e.kind() == std::io::ErrorKind::AddrInUse {
                "address already in use (is another daemon running?)".to_owned()
            } else {
                e.to_string()
            };
            DaemonError::Bind {
                addr: config.listen_addr.clone(),
                message,
            }
        })?;

        let data_dir = DataDir::new(&config.data_dir);
        data_dir.ensure()?;
        let pid_path = data_dir.pid_path();
        pidfile::clean_stale(&pid_path);
        pidfile::write(&pid_path)?;

        let state = Arc::new(AppState::new(store, sync).started());
        let router = routes::router(state.clone());
        state.transports.set_router(router.clone());

        Ok(Self {
            state,
            router,
            listener,
            pid_path,
        })
    }

    /// The bound TCP address (useful when the config asked for port 0).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` resolves, then tears everything down
    /// within the shutdown budget.
    pub async fn run<F>(self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Transports for worktrees registered in earlier runs.
        for worktree in self.state.store.list_all_worktrees()? {
            self.state.transports.start_for_worktree(&worktree);
        }
        if let Some(sync) = &self.state.sync {
            sync.start()?;
        }

        info!(
            target: LOG_TARGET,
            addr = %self.listener.local_addr()?,
            "daemon listening"
        );
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        // Stop order: sync manager first (it writes through the store),
        // then worktree transports, then the PID file. The store closes
        // when its last Arc drops.
        let teardown = async {
            if let Some(sync) = &self.state.sync {
                sync.stop().await;
            }
            self.state.transports.shutdown().await;
        };
        if tokio::time::timeout(SHUTDOWN_BUDGET, teardown).await.is_err() {
            warn!(target: LOG_TARGET, "shutdown budget exceeded, exiting anyway");
        }
        pidfile::remove(&self.pid_path);
        info!(target: LOG_TARGET, "daemon stopped");
        Ok(())
    }
}
