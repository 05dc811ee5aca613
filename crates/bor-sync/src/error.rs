//! Sync error type.

use bor_core::engine::EngineError;
use bor_core::wire::WireError;
use bor_storage::StoreError;

use crate::upstream::UpstreamError;

/// Errors from a sync cycle or reconciliation step. Cycles never abort
/// the syncer; the error is recorded in the repo's status and the next
/// tick retries.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("payload encoding: {0}")]
    Encode(#[from] serde_json::Error),

    /// Force-sync was requested for a repo without a running syncer.
    #[error("no syncer running for repo {0}")]
    UnknownRepo(i64),

    /// A forced cycle completed with an error; the message is the
    /// syncer's recorded `last_error`.
    #[error("sync cycle failed: {0}")]
    Cycle(String),
}

impl SyncError {
    /// Returns `true` for upstream authentication failures; these are
    /// reported to force-sync callers rather than retried silently.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Upstream(UpstreamError::Unauthorized))
    }
}
