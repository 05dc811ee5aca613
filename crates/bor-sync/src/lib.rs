//! Bidirectional per-repository synchronization.
//!
//! The sync manager owns one long-lived task per registered repo. Each
//! cycle pushes pending local events upstream as comments, then pulls new
//! upstream comments, parses the events they carry and applies them
//! locally. A shared rate gate coordinates all syncers against the
//! upstream quota.

pub mod error;
pub mod github;
pub mod manager;
pub mod ratelimit;
pub mod reconcile;
pub mod syncer;
pub mod upstream;

pub use error::SyncError;
pub use manager::{ForceMode, RepoSyncStatus, SyncManager};
pub use ratelimit::RateGate;
pub use upstream::{
    IssuePage, RateLimit, Upstream, UpstreamComment, UpstreamError, UpstreamIssue, Visibility,
};

/// Agent string recorded on events synthesized by the sync layer.
pub const SYNC_AGENT: &str = "github-sync";
