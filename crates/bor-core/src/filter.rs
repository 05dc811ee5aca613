//! Filter types for issue queries.

use crate::enums::{IssueType, Status};

/// Filter for issue listings. Results are ordered by
/// `priority ASC, created_at ASC`.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub repo_id: Option<i64>,
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    /// Exact match; `Some("")` selects unassigned issues.
    pub owner: Option<String>,
    /// Soft-deleted issues are excluded unless this is set.
    pub include_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_defaults() {
        let f = IssueFilter::default();
        assert!(f.repo_id.is_none());
        assert!(f.status.is_none());
        assert!(!f.include_deleted);
    }
}
