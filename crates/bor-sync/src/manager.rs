//! The sync manager: one syncer task per registered repo.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bor_core::model::Repo;
use bor_storage::SqliteStore;

use crate::error::SyncError;
use crate::ratelimit::RateGate;
use crate::syncer::Syncer;
use crate::upstream::Upstream;

const LOG_TARGET: &str = "bor::sync";

/// Floor for the per-repo poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What kind of cycle a force request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceMode {
    /// Incremental push + pull.
    Normal,
    /// Ignore cursors and replay the merged event log per issue.
    Full,
}

/// Per-repo sync status, readable without touching the syncer task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepoSyncStatus {
    pub pending_events: i64,
    pub syncing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct SyncerHandle {
    force_tx: mpsc::Sender<ForceMode>,
    stop_tx: watch::Sender<bool>,
    status: Arc<StdRwLock<RepoSyncStatus>>,
    cycle_rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

/// Owns the `repo id -> syncer` map and the shared rate gate.
pub struct SyncManager {
    store: Arc<SqliteStore>,
    upstream: Arc<dyn Upstream>,
    gate: Arc<RateGate>,
    syncers: StdMutex<HashMap<i64, SyncerHandle>>,
}

/// Effective poll interval for `n` registered repos: the base interval,
/// scaled so a crowded daemon polls each repo proportionally slower.
pub fn effective_interval(base: Duration, n: usize) -> Duration {
    let base = base.max(MIN_POLL_INTERVAL);
    base.max(base * (n as u32) / 2)
}

impl SyncManager {
    pub fn new(store: Arc<SqliteStore>, upstream: Arc<dyn Upstream>, gate: Arc<RateGate>) -> Self {
        Self {
            store,
            upstream,
            gate,
            syncers: StdMutex::new(HashMap::new()),
        }
    }

    /// The shared rate gate, for wiring into upstream clients.
    pub fn gate(&self) -> Arc<RateGate> {
        self.gate.clone()
    }

    /// Starts one syncer per registered repo, staggered across the poll
    /// cycle so their upstream calls do not bunch.
    pub fn start(&self) -> Result<(), SyncError> {
        let repos = self.store.list_repos()?;
        let n = repos.len();
        for (index, repo) in repos.into_iter().enumerate() {
            self.spawn_syncer(&repo, index, n);
        }
        info!(target: LOG_TARGET, count = n, "sync manager started");
        Ok(())
    }

    /// Registers a syncer for a newly added repo.
    pub fn add_repo(&self, repo: &Repo) {
        let n = {
            let syncers = self.syncers.lock().unwrap_or_else(|e| e.into_inner());
            if syncers.contains_key(&repo.id) {
                debug!(target: LOG_TARGET, repo_id = repo.id, "syncer already running");
                return;
            }
            syncers.len() + 1
        };
        self.spawn_syncer(repo, n - 1, n);
    }

    fn spawn_syncer(&self, repo: &Repo, index: usize, n: usize) {
        let base = Duration::from_millis(repo.poll_interval_ms.max(0) as u64);
        let interval = effective_interval(base, n);
        let start_delay = if n == 0 {
            Duration::ZERO
        } else {
            interval * (index as u32) / (n as u32)
        };

        let status = Arc::new(StdRwLock::new(RepoSyncStatus::default()));
        let (force_tx, force_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (cycle_tx, cycle_rx) = watch::channel(0u64);

        let syncer = Syncer::new(
            self.store.clone(),
            self.upstream.clone(),
            self.gate.clone(),
            repo.id,
            interval,
            start_delay,
            status.clone(),
            force_rx,
            stop_rx,
            cycle_tx,
        );
        let task = tokio::spawn(syncer.run());

        debug!(
            target: LOG_TARGET,
            repo = %repo.full_name(),
            ?interval,
            ?start_delay,
            "syncer spawned"
        );

        let mut syncers = self.syncers.lock().unwrap_or_else(|e| e.into_inner());
        syncers.insert(
            repo.id,
            SyncerHandle {
                force_tx,
                stop_tx,
                status,
                cycle_rx,
                task,
            },
        );
    }

    /// Triggers an immediate cycle and waits for one cycle to complete.
    /// Force requests coalesce: a second request while one is queued is
    /// dropped. The completed cycle's error, if any, is returned.
    pub async fn force_sync(&self, repo_id: i64, full: bool) -> Result<(), SyncError> {
        let (mut cycle_rx, force_tx, status) = {
            let syncers = self.syncers.lock().unwrap_or_else(|e| e.into_inner());
            let handle = syncers
                .get(&repo_id)
                .ok_or(SyncError::UnknownRepo(repo_id))?;
            (
                handle.cycle_rx.clone(),
                handle.force_tx.clone(),
                handle.status.clone(),
            )
        };

        let target = *cycle_rx.borrow() + 1;
        let mode = if full { ForceMode::Full } else { ForceMode::Normal };
        match force_tx.try_send(mode) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(target: LOG_TARGET, repo_id, "force request coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Err(SyncError::UnknownRepo(repo_id));
            }
        }

        while *cycle_rx.borrow_and_update() < target {
            if cycle_rx.changed().await.is_err() {
                break;
            }
        }

        let last_error = status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last_error
            .clone();
        match last_error {
            Some(message) => Err(SyncError::Cycle(message)),
            None => Ok(()),
        }
    }

    /// Snapshot of every repo's sync status, keyed by `owner/name`.
    /// Pending-event counts are read live from the store.
    pub fn status(&self) -> HashMap<String, RepoSyncStatus> {
        let repos = match self.store.list_repos() {
            Ok(repos) => repos,
            Err(e) => {
                warn!(target: LOG_TARGET, error = %e, "failed to list repos for status");
                return HashMap::new();
            }
        };

        let syncers = self.syncers.lock().unwrap_or_else(|e| e.into_inner());
        repos
            .into_iter()
            .filter_map(|repo| {
                let handle = syncers.get(&repo.id)?;
                let mut status = handle
                    .status
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                status.pending_events = self
                    .store
                    .count_pending_events(repo.id)
                    .unwrap_or(status.pending_events);
                if status.last_sync.is_none() {
                    status.last_sync = repo.last_sync_at;
                }
                Some((repo.full_name(), status))
            })
            .collect()
    }

    /// Stops every syncer and waits for the tasks to finish their current
    /// cycle and exit.
    pub async fn stop(&self) {
        let handles: Vec<(i64, SyncerHandle)> = {
            let mut syncers = self.syncers.lock().unwrap_or_else(|e| e.into_inner());
            syncers.drain().collect()
        };

        for (repo_id, handle) in handles {
            let _ = handle.stop_tx.send(true);
            if let Err(e) = handle.task.await {
                warn!(target: LOG_TARGET, repo_id, error = %e, "syncer task panicked");
            }
        }
        info!(target: LOG_TARGET, "sync manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn effective_interval_scales_with_repo_count() {
        let base = Duration::from_secs(5);
        assert_eq!(effective_interval(base, 0), base);
        assert_eq!(effective_interval(base, 1), base);
        assert_eq!(effective_interval(base, 2), base);
        assert_eq!(effective_interval(base, 3), Duration::from_millis(7500));
        assert_eq!(effective_interval(base, 4), Duration::from_secs(10));
    }

    #[test]
    fn effective_interval_enforces_floor() {
        assert_eq!(
            effective_interval(Duration::from_millis(100), 1),
            MIN_POLL_INTERVAL
        );
    }
}
