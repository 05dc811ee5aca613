//! Domain entities: repos, worktrees, issues and their embedded comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{IssueType, Status};

/// Default poll interval for a freshly registered repo, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: i64 = 5000;

/// Default priority for new issues. Lower is more urgent.
pub const DEFAULT_PRIORITY: i32 = 2;

/// Helper for `skip_serializing_if` on `Vec` fields.
fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

// ===========================================================================
// Repo
// ===========================================================================

/// A mirrored upstream repository, identified by `(owner, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    #[serde(default)]
    pub id: i64,

    pub owner: String,

    pub name: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,

    /// ETag from the last upstream issue listing; sent back as
    /// `If-None-Match` to turn unchanged listings into cheap 304s.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issues_etag: String,

    /// High-water mark for "issues updated since" queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues_since: Option<DateTime<Utc>>,

    /// Auto-set on first sight of a public upstream repo. When set, pulled
    /// event comments from untrusted authors are skipped.
    #[serde(default)]
    pub trusted_authors_only: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_poll_interval() -> i64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Repo {
    /// Creates a repo row ready for insertion (id assigned by the store).
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            owner: owner.into(),
            name: name.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            last_sync_at: None,
            issues_etag: String::new(),
            issues_since: None,
            trusted_authors_only: false,
            created_at: Utc::now(),
        }
    }

    /// Returns `owner/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Splits `owner/name` into its parts. Returns `None` when the string
    /// is not exactly two non-empty slash-separated segments.
    pub fn parse_full_name(s: &str) -> Option<(&str, &str)> {
        let (owner, name) = s.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }
}

// ===========================================================================
// Worktree
// ===========================================================================

/// One filesystem checkout of a repo registered with the daemon. Each
/// worktree can independently expose a Unix-domain socket and a file queue
/// under `<local_path>/.boxofrocks/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worktree {
    #[serde(default)]
    pub id: i64,

    pub repo_id: i64,

    pub local_path: String,

    #[serde(default)]
    pub socket_enabled: bool,

    #[serde(default)]
    pub queue_enabled: bool,
}

// ===========================================================================
// Comment
// ===========================================================================

/// A comment embedded in an issue. Authorship is carried verbatim through
/// event replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,

    pub timestamp: DateTime<Utc>,
}

// ===========================================================================
// Issue
// ===========================================================================

/// A trackable work item. Canonical state is derived from the event log;
/// the stored row is the folded result of all events applied in id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub repo_id: i64,

    /// Issue number on the upstream host; `None` until the first push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_number: Option<i64>,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Status::is_default")]
    pub status: Status,

    /// Lower is more urgent.
    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "IssueType::is_default")]
    pub issue_type: IssueType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Free-form assignee string; `""` means unassigned.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    /// Ordered, set-semantics label list.
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub comments: Vec<Comment>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Set iff `status == Closed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl Default for Issue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            repo_id: 0,
            upstream_number: None,
            title: String::new(),
            status: Status::Open,
            priority: DEFAULT_PRIORITY,
            issue_type: IssueType::Task,
            description: String::new(),
            owner: String::new(),
            labels: Vec::new(),
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }
}

impl Issue {
    /// Adds a label unless already present, preserving insertion order.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Replaces the label set, deduplicating while preserving order.
    pub fn set_labels(&mut self, labels: impl IntoIterator<Item = String>) {
        self.labels.clear();
        for label in labels {
            self.add_label(label);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_issue() {
        let issue = Issue::default();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.issue_type, IssueType::Task);
        assert_eq!(issue.priority, DEFAULT_PRIORITY);
        assert!(issue.closed_at.is_none());
    }

    #[test]
    fn repo_full_name_roundtrip() {
        let repo = Repo::new("octo", "rocks");
        assert_eq!(repo.full_name(), "octo/rocks");
        assert_eq!(Repo::parse_full_name("octo/rocks"), Some(("octo", "rocks")));
    }

    #[test]
    fn parse_full_name_rejects_bad_shapes() {
        assert_eq!(Repo::parse_full_name("octo"), None);
        assert_eq!(Repo::parse_full_name("octo/"), None);
        assert_eq!(Repo::parse_full_name("/rocks"), None);
        assert_eq!(Repo::parse_full_name("a/b/c"), None);
    }

    #[test]
    fn issue_serde_roundtrip() {
        let mut issue = Issue::default();
        issue.id = 7;
        issue.repo_id = 1;
        issue.title = "Fix the flaky test".into();
        issue.priority = 1;
        issue.labels = vec!["ci".into()];

        let json = serde_json::to_string(&issue).unwrap();
        let back: Issue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.title, "Fix the flaky test");
        assert_eq!(back.priority, 1);
        assert_eq!(back.labels, vec!["ci".to_string()]);
    }

    #[test]
    fn add_label_is_set_semantics() {
        let mut issue = Issue::default();
        issue.add_label("a");
        issue.add_label("b");
        issue.add_label("a");
        assert_eq!(issue.labels, vec!["a".to_string(), "b".to_string()]);
    }
}
