//! The upstream client contract consumed by the sync manager.
//!
//! The concrete GitHub client lives in [`crate::github`]; tests substitute
//! a mock. Every implementation is expected to feed rate-limit headers
//! into the shared [`RateGate`](crate::ratelimit::RateGate) on each
//! response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bor_core::model::Repo;

/// An issue as the upstream host reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamIssue {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A comment as the upstream host reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamComment {
    pub id: i64,
    pub body: String,
    pub author: String,
    /// Whether the author has a collaborator-grade association with the
    /// repo. Consulted when the repo enforces trusted authors only.
    pub author_trusted: bool,
    pub created_at: DateTime<Utc>,
}

/// One page of upstream issues, with the caching hints that came along.
#[derive(Debug, Clone, Default)]
pub struct IssuePage {
    pub issues: Vec<UpstreamIssue>,
    /// ETag to send back on the next listing.
    pub etag: Option<String>,
    /// True when the upstream answered "not modified"; `issues` is empty.
    pub not_modified: bool,
}

/// The most recent rate-limit observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Requests remaining in the current window.
    pub remaining: i64,
    /// When the window resets.
    pub reset: DateTime<Utc>,
}

/// Upstream repository visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// Errors from upstream calls.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Credentials were rejected. The syncer logs and continues, but
    /// force-sync surfaces this to the caller.
    #[error("upstream authentication failed (401)")]
    Unauthorized,

    /// A non-2xx status other than 401.
    #[error("upstream returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
    },

    /// Network-level failure.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The response body did not have the expected shape.
    #[error("upstream response decode error: {0}")]
    Decode(String),
}

/// Operations the sync manager needs from the upstream host.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Lists issues carrying `label`, newest state included. `etag` turns
    /// unchanged listings into a `not_modified` page.
    async fn list_issues(
        &self,
        repo: &Repo,
        label: &str,
        etag: Option<&str>,
    ) -> Result<IssuePage, UpstreamError>;

    /// Lists comments on one issue, oldest first, optionally restricted
    /// to those created at or after `since`.
    async fn list_comments(
        &self,
        repo: &Repo,
        number: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpstreamComment>, UpstreamError>;

    /// Creates an issue and returns it (with its assigned number).
    async fn create_issue(
        &self,
        repo: &Repo,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<UpstreamIssue, UpstreamError>;

    /// Posts a comment and returns it (with its assigned id).
    async fn create_comment(
        &self,
        repo: &Repo,
        number: i64,
        body: &str,
    ) -> Result<UpstreamComment, UpstreamError>;

    /// Fetches the current rate-limit state.
    async fn rate_limit(&self) -> Result<RateLimit, UpstreamError>;

    /// Reports whether the repo is public or private.
    async fn repo_visibility(&self, repo: &Repo) -> Result<Visibility, UpstreamError>;
}
