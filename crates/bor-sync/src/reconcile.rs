//! Reconciliation: turning upstream comments into local state.
//!
//! Three paths: incremental ingestion of one comment, full replay of an
//! issue merged with newly pulled comments, and synthetic creation of a
//! local mirror for an upstream-born issue.

use chrono::Utc;
use tracing::{debug, warn};

use bor_core::engine;
use bor_core::enums::{EventAction, Status};
use bor_core::event::{Event, EventPayload};
use bor_core::model::{Issue, Repo};
use bor_core::wire::{self, WireError};
use bor_core::TRACKER_LABEL;
use bor_storage::{SqliteStore, SyncCursor};

use crate::error::SyncError;
use crate::upstream::{Upstream, UpstreamComment, UpstreamIssue};
use crate::SYNC_AGENT;

const LOG_TARGET: &str = "bor::reconcile";

/// Decodes the event carried by an upstream comment, if any.
///
/// Plain human comments and malformed markers yield `None` (the latter
/// with a warning); a schema version newer than this binary is an error
/// so operators notice they must upgrade.
fn decode_comment(comment: &UpstreamComment) -> Result<Option<wire::WireEvent>, SyncError> {
    match wire::parse_event_comment(&comment.body) {
        Ok(decoded) => Ok(decoded),
        Err(e @ WireError::UnsupportedSchemaVersion { .. }) => Err(e.into()),
        Err(e) => {
            warn!(
                target: LOG_TARGET,
                comment_id = comment.id,
                error = %e,
                "skipping undecodable event comment"
            );
            Ok(None)
        }
    }
}

/// Applies one upstream comment to `issue`. Returns the updated issue
/// when an event was ingested, `None` when the comment was skipped
/// (not an event, already known, or untrusted author).
pub fn ingest_comment(
    store: &SqliteStore,
    repo: &Repo,
    issue: &Issue,
    comment: &UpstreamComment,
) -> Result<Option<Issue>, SyncError> {
    if store.has_upstream_comment(repo.id, comment.id)? {
        debug!(target: LOG_TARGET, comment_id = comment.id, "comment already ingested");
        return Ok(None);
    }
    if repo.trusted_authors_only && !comment.author_trusted {
        debug!(
            target: LOG_TARGET,
            comment_id = comment.id,
            author = %comment.author,
            "skipping event from untrusted author"
        );
        return Ok(None);
    }
    let Some(decoded) = decode_comment(comment)? else {
        return Ok(None);
    };

    let event = Event {
        id: 0,
        repo_id: repo.id,
        issue_id: issue.id,
        upstream_comment_id: Some(comment.id),
        upstream_issue_number: issue.upstream_number,
        timestamp: decoded.timestamp,
        action: decoded.action,
        payload: decoded.payload,
        agent: decoded.agent,
        synced: true,
    };

    let updated = engine::apply(issue.clone(), &event)?;
    store.append_event(&event)?;
    store.update_issue(&updated)?;
    Ok(Some(updated))
}

/// Full-replay path: merges `comments` into the issue's event log
/// (skipping known comment ids), replays everything in id order and
/// overwrites the stored issue with the result, preserving the local id,
/// repo and upstream number.
pub fn replay_issue(
    store: &SqliteStore,
    repo: &Repo,
    issue: &Issue,
    comments: &[UpstreamComment],
) -> Result<Issue, SyncError> {
    for comment in comments {
        if store.has_upstream_comment(repo.id, comment.id)? {
            continue;
        }
        if repo.trusted_authors_only && !comment.author_trusted {
            continue;
        }
        let Some(decoded) = decode_comment(comment)? else {
            continue;
        };
        store.append_event(&Event {
            id: 0,
            repo_id: repo.id,
            issue_id: issue.id,
            upstream_comment_id: Some(comment.id),
            upstream_issue_number: issue.upstream_number,
            timestamp: decoded.timestamp,
            action: decoded.action,
            payload: decoded.payload,
            agent: decoded.agent,
            synced: true,
        })?;
    }

    let events = store.list_events(issue.id)?;
    let mut replayed = engine::replay(&events)?
        .remove(&issue.id)
        .unwrap_or_else(|| issue.clone());
    replayed.id = issue.id;
    replayed.repo_id = issue.repo_id;
    replayed.upstream_number = issue.upstream_number;

    store.update_issue(&replayed)?;
    Ok(replayed)
}

/// Synthesizes a local mirror for an upstream-born issue: creates the
/// row (from the metadata block when present, otherwise from the raw
/// upstream fields), appends a synthetic `create` event, posts that event
/// upstream so other syncers see the creation, and advances the cursor
/// past the posted comment.
pub async fn synthesize_issue(
    store: &SqliteStore,
    upstream: &dyn Upstream,
    repo: &Repo,
    up: &UpstreamIssue,
) -> Result<Issue, SyncError> {
    let (meta, human_text) = wire::parse_metadata(&up.body);

    let mut issue = Issue {
        repo_id: repo.id,
        upstream_number: Some(up.number),
        title: up.title.clone(),
        description: human_text,
        created_at: up.created_at,
        updated_at: up.created_at,
        ..Issue::default()
    };

    match meta {
        Some(meta) => {
            issue.status = meta.status;
            issue.priority = meta.priority;
            issue.issue_type = meta.issue_type;
            issue.owner = meta.owner;
            issue.set_labels(meta.labels);
            issue.comments = meta.comments.unwrap_or_default();
        }
        None => {
            // Inherit upstream labels minus the tracker marker.
            issue.set_labels(
                up.labels
                    .iter()
                    .filter(|l| l.as_str() != TRACKER_LABEL)
                    .cloned(),
            );
        }
    }
    if issue.status == Status::Closed {
        issue.closed_at = Some(up.updated_at);
    }

    let issue = store.create_issue(&issue)?;
    debug!(
        target: LOG_TARGET,
        issue_id = issue.id,
        upstream_number = up.number,
        "synthesized local issue for upstream-born issue"
    );

    let payload = EventPayload {
        title: Some(issue.title.clone()),
        description: Some(issue.description.clone()),
        priority: Some(issue.priority),
        issue_type: Some(issue.issue_type.clone()),
        labels: Some(issue.labels.clone()),
        owner: if issue.owner.is_empty() {
            None
        } else {
            Some(issue.owner.clone())
        },
        status: Some(issue.status.clone()),
        ..Default::default()
    };
    let mut event = Event::new(
        repo.id,
        issue.id,
        EventAction::Create,
        &payload,
        SYNC_AGENT,
        up.created_at.with_timezone(&Utc),
    )?;
    event.upstream_issue_number = Some(up.number);
    let event = store.append_event(&event)?;

    let body = wire::format_event_comment(&event)?;
    let posted = upstream.create_comment(repo, up.number, &body).await?;
    store.mark_event_synced(event.id, posted.id)?;
    store.set_cursor(
        repo.id,
        up.number,
        SyncCursor {
            last_comment_id: posted.id,
            last_comment_at: Some(posted.created_at),
        },
    )?;

    Ok(issue)
}
