//! The per-repo syncer task.
//!
//! One long-lived task per registered repo. The scheduler is a periodic
//! tick plus a single-slot force mailbox; each wake-up runs one cycle:
//! push pending events upstream, then pull new upstream comments.

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use bor_core::enums::EventAction;
use bor_core::model::Repo;
use bor_core::wire::{self, IssueMeta};
use bor_core::TRACKER_LABEL;
use bor_storage::SqliteStore;

use crate::error::SyncError;
use crate::manager::{ForceMode, RepoSyncStatus};
use crate::ratelimit::RateGate;
use crate::reconcile;
use crate::upstream::{Upstream, Visibility};

const LOG_TARGET: &str = "bor::syncer";

pub(crate) struct Syncer {
    pub(crate) store: Arc<SqliteStore>,
    pub(crate) upstream: Arc<dyn Upstream>,
    pub(crate) gate: Arc<RateGate>,
    pub(crate) repo_id: i64,
    pub(crate) interval: Duration,
    pub(crate) start_delay: Duration,
    pub(crate) status: Arc<StdRwLock<RepoSyncStatus>>,
    pub(crate) force_rx: mpsc::Receiver<ForceMode>,
    pub(crate) stop_rx: watch::Receiver<bool>,
    pub(crate) cycle_tx: watch::Sender<u64>,
    /// Whether the one-time repo visibility probe has run.
    visibility_checked: bool,
}

impl Syncer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<SqliteStore>,
        upstream: Arc<dyn Upstream>,
        gate: Arc<RateGate>,
        repo_id: i64,
        interval: Duration,
        start_delay: Duration,
        status: Arc<StdRwLock<RepoSyncStatus>>,
        force_rx: mpsc::Receiver<ForceMode>,
        stop_rx: watch::Receiver<bool>,
        cycle_tx: watch::Sender<u64>,
    ) -> Self {
        Self {
            store,
            upstream,
            gate,
            repo_id,
            interval,
            start_delay,
            status,
            force_rx,
            stop_rx,
            cycle_tx,
            visibility_checked: false,
        }
    }

    /// Runs until the stop channel fires. The first cycle runs right
    /// after the start delay; later cycles run on the tick or on a force
    /// request. A cycle in flight always completes before the task exits.
    #[instrument(name = "syncer", skip(self), fields(repo_id = self.repo_id))]
    pub(crate) async fn run(mut self) {
        let mut stop_rx = self.stop_rx.clone();

        tokio::select! {
            _ = tokio::time::sleep(self.start_delay) => {}
            _ = stop_rx.changed() => {
                debug!(target: LOG_TARGET, "stopped during start delay");
                return;
            }
        }

        self.cycle(ForceMode::Normal).await;

        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle(ForceMode::Normal).await;
                }
                mode = self.force_rx.recv() => {
                    match mode {
                        Some(mode) => self.cycle(mode).await,
                        None => break,
                    }
                }
                _ = stop_rx.changed() => {
                    debug!(target: LOG_TARGET, "stop requested");
                    break;
                }
            }
        }
    }

    /// Runs one cycle and records the outcome in the status struct.
    async fn cycle(&mut self, mode: ForceMode) {
        {
            let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
            status.syncing = true;
        }

        let result = self.cycle_inner(mode).await;

        let pending = self
            .store
            .count_pending_events(self.repo_id)
            .unwrap_or_default();
        let last_sync = self
            .store
            .get_repo(self.repo_id)
            .ok()
            .and_then(|r| r.last_sync_at);
        {
            let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
            status.syncing = false;
            status.pending_events = pending;
            status.last_sync = last_sync;
            status.last_error = result.as_ref().err().map(ToString::to_string);
        }
        if let Err(e) = &result {
            warn!(target: LOG_TARGET, error = %e, "sync cycle failed");
        }

        self.cycle_tx.send_modify(|count| *count += 1);
    }

    /// The cycle algorithm. Push precedes pull; `last_sync_at` advances
    /// once push succeeded, even when the subsequent pull fails.
    async fn cycle_inner(&mut self, mode: ForceMode) -> Result<(), SyncError> {
        let mut repo = self.store.get_repo(self.repo_id)?;

        self.check_visibility(&mut repo).await;

        self.push_outbound(&repo).await?;

        repo.last_sync_at = Some(Utc::now());
        self.store.update_repo(&repo)?;

        self.pull_inbound(&mut repo, mode).await?;

        repo.last_sync_at = Some(Utc::now());
        self.store.update_repo(&repo)?;
        Ok(())
    }

    /// One-time probe: a public repo gets `trusted_authors_only` switched
    /// on, so events from drive-by commenters are not applied. Probe
    /// failures are logged and retried next cycle.
    async fn check_visibility(&mut self, repo: &mut Repo) {
        if self.visibility_checked || repo.trusted_authors_only {
            self.visibility_checked = true;
            return;
        }
        self.gate.wait_if_low().await;
        match self.upstream.repo_visibility(repo).await {
            Ok(Visibility::Public) => {
                info!(
                    target: LOG_TARGET,
                    repo = %repo.full_name(),
                    "public upstream repo, enabling trusted-authors-only"
                );
                repo.trusted_authors_only = true;
                if let Err(e) = self.store.update_repo(repo) {
                    warn!(target: LOG_TARGET, error = %e, "failed to persist trusted-authors flag");
                }
                self.visibility_checked = true;
            }
            Ok(Visibility::Private) => {
                self.visibility_checked = true;
            }
            Err(e) => {
                warn!(target: LOG_TARGET, error = %e, "visibility probe failed");
            }
        }
    }

    /// Pushes pending events, oldest first. Create events for issues that
    /// never reached upstream open the upstream issue first; other events
    /// on such issues are skipped until the create goes through.
    async fn push_outbound(&self, repo: &Repo) -> Result<(), SyncError> {
        let pending = self.store.pending_events(repo.id)?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(target: LOG_TARGET, count = pending.len(), "pushing pending events");

        for event in pending {
            self.gate.wait_if_low().await;

            let mut issue = self.store.get_issue(event.issue_id)?;
            if event.action == EventAction::Create && issue.upstream_number.is_none() {
                let mut labels = issue.labels.clone();
                if !labels.contains(&TRACKER_LABEL.to_owned()) {
                    labels.push(TRACKER_LABEL.to_owned());
                }
                let meta = IssueMeta {
                    status: issue.status.clone(),
                    priority: issue.priority,
                    issue_type: issue.issue_type.clone(),
                    owner: issue.owner.clone(),
                    labels: issue.labels.clone(),
                    comments: None,
                };
                let body = wire::render_body(&issue.description, &meta)?;

                let created = self
                    .upstream
                    .create_issue(repo, &issue.title, &body, &labels)
                    .await?;
                issue.upstream_number = Some(created.number);
                self.store.update_issue(&issue)?;

                // The create event becomes the first comment on the new
                // upstream issue so other syncers can replay it.
                self.gate.wait_if_low().await;
                let comment_body = wire::format_event_comment(&event)?;
                let posted = self
                    .upstream
                    .create_comment(repo, created.number, &comment_body)
                    .await?;
                self.store.mark_event_synced(event.id, posted.id)?;
            } else if let Some(number) = issue.upstream_number {
                let comment_body = wire::format_event_comment(&event)?;
                let posted = self
                    .upstream
                    .create_comment(repo, number, &comment_body)
                    .await?;
                self.store.mark_event_synced(event.id, posted.id)?;
            } else {
                debug!(
                    target: LOG_TARGET,
                    event_id = event.id,
                    "issue not yet upstream, deferring event"
                );
            }
        }
        Ok(())
    }

    /// Pulls upstream issues and their new comments. Incremental mode
    /// ingests comments past the cursor; full mode ignores the cursor and
    /// replays the merged log.
    async fn pull_inbound(&self, repo: &mut Repo, mode: ForceMode) -> Result<(), SyncError> {
        self.gate.wait_if_low().await;

        let etag = if repo.issues_etag.is_empty() {
            None
        } else {
            Some(repo.issues_etag.as_str())
        };
        let page = self.upstream.list_issues(repo, TRACKER_LABEL, etag).await?;
        if let Some(etag) = &page.etag {
            repo.issues_etag = etag.clone();
        }
        if page.not_modified {
            debug!(target: LOG_TARGET, "issue listing unchanged");
            return Ok(());
        }

        for up in &page.issues {
            let issue = match self.store.find_issue_by_upstream(repo.id, up.number)? {
                Some(existing) => existing,
                None => {
                    reconcile::synthesize_issue(&self.store, self.upstream.as_ref(), repo, up)
                        .await?
                }
            };

            let cursor = self.store.get_cursor(repo.id, up.number)?;
            let since = match mode {
                ForceMode::Normal => cursor.last_comment_at,
                ForceMode::Full => None,
            };

            self.gate.wait_if_low().await;
            let comments = self.upstream.list_comments(repo, up.number, since).await?;

            match mode {
                ForceMode::Normal => {
                    let mut advanced = cursor;
                    let mut current = issue;
                    for comment in &comments {
                        if comment.id <= cursor.last_comment_id {
                            continue;
                        }
                        if let Some(updated) =
                            reconcile::ingest_comment(&self.store, repo, &current, comment)?
                        {
                            current = updated;
                        }
                        if comment.id > advanced.last_comment_id {
                            advanced.last_comment_id = comment.id;
                            advanced.last_comment_at = Some(comment.created_at);
                        }
                    }
                    if advanced != cursor {
                        self.store.set_cursor(repo.id, up.number, advanced)?;
                    }
                }
                ForceMode::Full => {
                    reconcile::replay_issue(&self.store, repo, &issue, &comments)?;
                    let mut advanced = cursor;
                    for comment in &comments {
                        if comment.id > advanced.last_comment_id {
                            advanced.last_comment_id = comment.id;
                            advanced.last_comment_at = Some(comment.created_at);
                        }
                    }
                    self.store.set_cursor(repo.id, up.number, advanced)?;
                }
            }
        }

        Ok(())
    }
}
