//! Per-worktree file-queue transport.
//!
//! Sandboxed agents that cannot open sockets drop request files into
//! `<local_path>/.boxofrocks/queue/`. A poller scans the directory every
//! 100 ms, dispatches each `<id>.req` through the handler set, writes
//! `<id>.resp.tmp`, renames it to `<id>.resp` and removes the request.
//! Writers must use the same `.tmp` then rename protocol so the daemon
//! never reads a partial request.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, header};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower::util::ServiceExt;
use tracing::{debug, info, warn};

use bor_core::model::Worktree;
use bor_core::paths;

use crate::state::SocketRepo;
use crate::transports::TransportHandle;

const LOG_TARGET: &str = "bor::queue";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A request file: `{"method": "GET", "path": "/health", "body": {...}}`.
#[derive(Deserialize)]
struct QueueRequest {
    method: String,
    path: String,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

/// The paired response file.
#[derive(Serialize)]
struct QueueResponse {
    status: u16,
    body: serde_json::Value,
}

/// Prepares the queue directory and spawns the poller task.
pub(crate) fn start(router: Router, worktree: &Worktree) -> std::io::Result<TransportHandle> {
    let queue_dir = paths::queue_dir(&worktree.local_path);
    std::fs::create_dir_all(&queue_dir)?;
    std::fs::set_permissions(&queue_dir, std::fs::Permissions::from_mode(0o700))?;

    clean_stale_files(&queue_dir);
    write_helper_script(&worktree.local_path)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let repo_id = worktree.repo_id;
    let task = tokio::spawn(poll_loop(router, queue_dir, repo_id, stop_rx));

    info!(
        target: LOG_TARGET,
        path = %worktree.local_path,
        repo_id,
        "worktree file queue polling"
    );
    Ok(TransportHandle { stop_tx, task })
}

/// Removes request/response leftovers from a previous daemon.
fn clean_stale_files(queue_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(queue_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".req") || name.ends_with(".resp") || name.ends_with(".tmp") {
            debug!(target: LOG_TARGET, file = %name, "removing stale queue file");
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

/// Writes (or overwrites) the helper shell script wrapping the queue
/// protocol for shell clients.
fn write_helper_script(local_path: &str) -> std::io::Result<()> {
    let script = paths::api_script_path(local_path);
    std::fs::write(&script, HELPER_SCRIPT)?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
}

const HELPER_SCRIPT: &str = r#"#!/bin/sh
# boxofrocks file-queue client.
# Usage: bor_api.sh METHOD PATH [JSON_BODY]
set -eu

QUEUE_DIR="$(cd "$(dirname "$0")" && pwd)/queue"
ID="$$-$(date +%s%N)"
REQ="$QUEUE_DIR/$ID.req"

if [ $# -ge 3 ] && [ -n "$3" ]; then
    printf '{"method":"%s","path":"%s","body":%s}' "$1" "$2" "$3" > "$REQ.tmp"
else
    printf '{"method":"%s","path":"%s"}' "$1" "$2" > "$REQ.tmp"
fi
mv "$REQ.tmp" "$REQ"

i=0
while [ $i -lt 100 ]; do
    if [ -f "$QUEUE_DIR/$ID.resp" ]; then
        cat "$QUEUE_DIR/$ID.resp"
        rm -f "$QUEUE_DIR/$ID.resp"
        exit 0
    fi
    i=$((i + 1))
    sleep 0.1
done

echo '{"error":"timed out waiting for daemon"}' >&2
exit 1
"#;

/// The poller: one scan per tick until stopped.
async fn poll_loop(
    router: Router,
    queue_dir: PathBuf,
    repo_id: i64,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scan_once(&router, &queue_dir, repo_id).await;
            }
            _ = stop_rx.changed() => {
                debug!(target: LOG_TARGET, ?queue_dir, "queue poller stopping");
                return;
            }
        }
    }
}

/// Processes every complete request file currently in the directory.
/// `.req.tmp` files are in-flight writes and never touched.
async fn scan_once(router: &Router, queue_dir: &Path, repo_id: i64) {
    let entries = match std::fs::read_dir(queue_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(target: LOG_TARGET, error = %e, "failed to scan queue dir");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_request = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(".req"))
            .unwrap_or(false);
        if !is_request {
            continue;
        }
        process_request_file(router, &path, repo_id).await;
    }
}

async fn process_request_file(router: &Router, req_path: &Path, repo_id: i64) {
    let resp_path = req_path.with_extension("resp");

    let response = match read_request(req_path) {
        Ok(request) => dispatch(router, request, repo_id).await,
        Err(message) => QueueResponse {
            status: 400,
            body: serde_json::json!({ "error": message }),
        },
    };

    if let Err(e) = write_response(&resp_path, &response) {
        warn!(target: LOG_TARGET, ?resp_path, error = %e, "failed to write queue response");
        return;
    }
    if let Err(e) = std::fs::remove_file(req_path) {
        warn!(target: LOG_TARGET, ?req_path, error = %e, "failed to remove request file");
    }
}

fn read_request(req_path: &Path) -> Result<QueueRequest, String> {
    let contents =
        std::fs::read_to_string(req_path).map_err(|e| format!("unreadable request: {e}"))?;
    serde_json::from_str(&contents).map_err(|e| format!("invalid request json: {e}"))
}

/// Builds a synthetic request, stamps the worktree's repo id and runs it
/// through the same router as every other transport.
async fn dispatch(router: &Router, request: QueueRequest, repo_id: i64) -> QueueResponse {
    let method = match Method::from_bytes(request.method.to_uppercase().as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            return QueueResponse {
                status: 400,
                body: serde_json::json!({ "error": format!("invalid method: {}", request.method) }),
            };
        }
    };

    let mut builder = Request::builder().method(method).uri(&request.path);
    let body = match &request.body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let mut synthetic = match builder.body(body) {
        Ok(req) => req,
        Err(e) => {
            return QueueResponse {
                status: 400,
                body: serde_json::json!({ "error": format!("invalid request: {e}") }),
            };
        }
    };
    synthetic.extensions_mut().insert(SocketRepo(repo_id));

    let response = match router.clone().oneshot(synthetic).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    QueueResponse { status, body }
}

/// Atomic response write: `.resp.tmp` then rename, so readers never see
/// a partial file.
fn write_response(resp_path: &Path, response: &QueueResponse) -> std::io::Result<()> {
    let tmp_path = resp_path.with_extension("resp.tmp");
    let json = serde_json::to_string(response).map_err(std::io::Error::other)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, resp_path)
}
