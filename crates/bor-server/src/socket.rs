//! Per-worktree Unix-domain socket transport.
//!
//! Each enabled worktree gets a listener at
//! `<local_path>/.boxofrocks/bor.sock` serving the same handler set as
//! the TCP transport. Accepted requests carry the worktree's repo id as
//! an extension, which the affinity resolver consults.

use std::os::unix::fs::PermissionsExt;

use axum::{Extension, Router};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bor_core::model::Worktree;
use bor_core::paths;

use crate::state::SocketRepo;
use crate::transports::TransportHandle;

const LOG_TARGET: &str = "bor::socket";

/// Binds the worktree socket and spawns its serve task.
pub(crate) fn start(router: Router, worktree: &Worktree) -> std::io::Result<TransportHandle> {
    let dot_dir = paths::dot_dir(&worktree.local_path);
    std::fs::create_dir_all(&dot_dir)?;
    std::fs::set_permissions(&dot_dir, std::fs::Permissions::from_mode(0o700))?;

    // A predecessor that crashed leaves its socket file behind; bind
    // would fail on it.
    let sock_path = paths::socket_path(&worktree.local_path);
    match std::fs::remove_file(&sock_path) {
        Ok(()) => debug!(target: LOG_TARGET, ?sock_path, "removed stale socket file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(&sock_path)?;
    std::fs::set_permissions(&sock_path, std::fs::Permissions::from_mode(0o700))?;

    let app = router.layer(Extension(SocketRepo(worktree.repo_id)));
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop_rx.changed().await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(target: LOG_TARGET, error = %e, "socket serve failed");
        }
    });

    info!(
        target: LOG_TARGET,
        path = %worktree.local_path,
        repo_id = worktree.repo_id,
        "worktree socket listening"
    );
    Ok(TransportHandle { stop_tx, task })
}
