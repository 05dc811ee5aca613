//! Per-worktree transport lifecycle.
//!
//! Each registered worktree can expose a Unix-domain socket and a file
//! queue. Both serve the exact same handler set; a layer stamps the
//! worktree's repo id onto every request so affinity resolution works
//! without headers. Transport failures are warnings, not fatal: the
//! daemon keeps running minus the affected transport.

use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, OnceLock};

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use bor_core::model::Worktree;
use bor_core::paths;

use crate::queue;
use crate::socket;

const LOG_TARGET: &str = "bor::transport";

/// A running transport task and its stop signal.
pub(crate) struct TransportHandle {
    pub(crate) stop_tx: watch::Sender<bool>,
    pub(crate) task: JoinHandle<()>,
}

/// Manages socket listeners and queue pollers, keyed by worktree path.
pub struct Transports {
    /// The dispatcher's router, installed once after construction (the
    /// router itself needs the shared state that owns this struct).
    router: OnceLock<Router>,
    sockets: StdMutex<HashMap<String, TransportHandle>>,
    queues: StdMutex<HashMap<String, TransportHandle>>,
}

impl Default for Transports {
    fn default() -> Self {
        Self::new()
    }
}

impl Transports {
    pub fn new() -> Self {
        Self {
            router: OnceLock::new(),
            sockets: StdMutex::new(HashMap::new()),
            queues: StdMutex::new(HashMap::new()),
        }
    }

    /// Installs the handler set. Must run before any transport starts.
    pub fn set_router(&self, router: Router) {
        let _ = self.router.set(router);
    }

    /// Starts the enabled transports for one worktree. Idempotent:
    /// re-adding a worktree is a no-op for transports already running.
    /// Failures are logged and skipped.
    pub fn start_for_worktree(&self, worktree: &Worktree) {
        let Some(router) = self.router.get() else {
            debug!(target: LOG_TARGET, "no router installed, skipping transports");
            return;
        };

        if worktree.socket_enabled {
            let mut sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
            if !sockets.contains_key(&worktree.local_path) {
                match socket::start(router.clone(), worktree) {
                    Ok(handle) => {
                        sockets.insert(worktree.local_path.clone(), handle);
                    }
                    Err(e) => warn!(
                        target: LOG_TARGET,
                        path = %worktree.local_path,
                        error = %e,
                        "failed to start worktree socket"
                    ),
                }
            }
        }

        if worktree.queue_enabled {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            if !queues.contains_key(&worktree.local_path) {
                match queue::start(router.clone(), worktree) {
                    Ok(handle) => {
                        queues.insert(worktree.local_path.clone(), handle);
                    }
                    Err(e) => warn!(
                        target: LOG_TARGET,
                        path = %worktree.local_path,
                        error = %e,
                        "failed to start worktree queue"
                    ),
                }
            }
        }
    }

    /// Stops both transports for one worktree and removes the socket
    /// file.
    pub async fn stop_for_worktree(&self, local_path: &str) {
        let socket = {
            let mut sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
            sockets.remove(local_path)
        };
        let queue = {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            queues.remove(local_path)
        };

        for handle in [socket, queue].into_iter().flatten() {
            let _ = handle.stop_tx.send(true);
            let _ = handle.task.await;
        }
        remove_socket_file(local_path);
    }

    /// Stops everything. Part of daemon shutdown.
    pub async fn shutdown(&self) {
        let paths: Vec<String> = {
            let sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
            let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            sockets.keys().chain(queues.keys()).cloned().collect()
        };
        for path in paths {
            self.stop_for_worktree(&path).await;
        }
    }
}

fn remove_socket_file(local_path: &str) {
    let sock = paths::socket_path(local_path);
    if let Err(e) = std::fs::remove_file(&sock) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(target: LOG_TARGET, ?sock, error = %e, "failed to remove socket file");
        }
    }
}
