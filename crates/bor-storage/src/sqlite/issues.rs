//! Issue CRUD operations for [`SqliteStore`].

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params};

use bor_core::enums::Status;
use bor_core::filter::IssueFilter;
use bor_core::model::{Comment, Issue};

use crate::error::{Result, StoreError};
use crate::sqlite::store::SqliteStore;
use crate::sqlite::{opt_ts_from_sql, opt_ts_to_sql, ts_from_sql, ts_to_sql};

/// All issue columns in a deterministic order for SELECT queries.
const ISSUE_COLUMNS: &str = "id, repo_id, upstream_number, title, status, priority, \
     issue_type, description, owner, labels, comments, created_at, updated_at, closed_at";

/// Deserialises a row into an [`Issue`]. Labels and comments are JSON
/// TEXT columns.
fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let labels_str: String = row.get("labels")?;
    let comments_str: String = row.get("comments")?;

    let labels: Vec<String> = serde_json::from_str(&labels_str).unwrap_or_default();
    let comments: Vec<Comment> = serde_json::from_str(&comments_str).unwrap_or_default();

    Ok(Issue {
        id: row.get("id")?,
        repo_id: row.get("repo_id")?,
        upstream_number: row.get("upstream_number")?,
        title: row.get("title")?,
        status: Status::from(row.get::<_, String>("status")?),
        priority: row.get("priority")?,
        issue_type: row.get::<_, String>("issue_type")?.into(),
        description: row.get("description")?,
        owner: row.get("owner")?,
        labels,
        comments,
        created_at: ts_from_sql(&row.get::<_, String>("created_at")?),
        updated_at: ts_from_sql(&row.get::<_, String>("updated_at")?),
        closed_at: opt_ts_from_sql(row.get("closed_at")?),
    })
}

impl SqliteStore {
    /// Inserts a new issue and returns it with the assigned id.
    pub fn create_issue(&self, issue: &Issue) -> Result<Issue> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO issues (repo_id, upstream_number, title, status, priority, issue_type, \
             description, owner, labels, comments, created_at, updated_at, closed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                issue.repo_id,
                issue.upstream_number,
                issue.title,
                issue.status.as_str(),
                issue.priority,
                issue.issue_type.as_str(),
                issue.description,
                issue.owner,
                serde_json::to_string(&issue.labels)?,
                serde_json::to_string(&issue.comments)?,
                ts_to_sql(issue.created_at),
                ts_to_sql(issue.updated_at),
                opt_ts_to_sql(issue.closed_at),
            ],
        )?;

        let mut inserted = issue.clone();
        inserted.id = conn.last_insert_rowid();
        Ok(inserted)
    }

    /// Retrieves an issue by id.
    pub fn get_issue(&self, id: i64) -> Result<Issue> {
        let conn = self.lock_conn()?;
        conn.query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
            params![id],
            scan_issue,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("issue", id))
    }

    /// Retrieves the local mirror of an upstream issue, if any.
    pub fn find_issue_by_upstream(&self, repo_id: i64, number: i64) -> Result<Option<Issue>> {
        let conn = self.lock_conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {ISSUE_COLUMNS} FROM issues \
                     WHERE repo_id = ?1 AND upstream_number = ?2"
                ),
                params![repo_id, number],
                scan_issue,
            )
            .optional()?)
    }

    /// Lists issues matching `filter`, ordered by `priority ASC,
    /// created_at ASC`. Soft-deleted issues are excluded unless the filter
    /// asks for them.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut args: Vec<Value> = Vec::new();

        if let Some(repo_id) = filter.repo_id {
            sql.push_str(" AND repo_id = ?");
            args.push(Value::Integer(repo_id));
        }
        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            args.push(Value::Text(status.as_str().to_owned()));
        } else if !filter.include_deleted {
            sql.push_str(" AND status != ?");
            args.push(Value::Text(Status::Deleted.as_str().to_owned()));
        }
        if let Some(priority) = filter.priority {
            sql.push_str(" AND priority = ?");
            args.push(Value::Integer(priority as i64));
        }
        if let Some(issue_type) = &filter.issue_type {
            sql.push_str(" AND issue_type = ?");
            args.push(Value::Text(issue_type.as_str().to_owned()));
        }
        if let Some(owner) = &filter.owner {
            sql.push_str(" AND owner = ?");
            args.push(Value::Text(owner.clone()));
        }
        sql.push_str(" ORDER BY priority ASC, created_at ASC");

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), scan_issue)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Whole-row rewrite of the mutable issue columns. The caller supplies
    /// `updated_at` (handlers derive it from the event's timestamp so the
    /// stored row matches replay output).
    pub fn update_issue(&self, issue: &Issue) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE issues SET upstream_number = ?2, title = ?3, status = ?4, priority = ?5, \
             issue_type = ?6, description = ?7, owner = ?8, labels = ?9, comments = ?10, \
             updated_at = ?11, closed_at = ?12 WHERE id = ?1",
            params![
                issue.id,
                issue.upstream_number,
                issue.title,
                issue.status.as_str(),
                issue.priority,
                issue.issue_type.as_str(),
                issue.description,
                issue.owner,
                serde_json::to_string(&issue.labels)?,
                serde_json::to_string(&issue.comments)?,
                ts_to_sql(issue.updated_at),
                opt_ts_to_sql(issue.closed_at),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("issue", issue.id));
        }
        Ok(())
    }

    /// Soft delete: marks the issue deleted and bumps `updated_at`.
    pub fn soft_delete_issue(&self, id: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE issues SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, Status::Deleted.as_str(), ts_to_sql(Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("issue", id));
        }
        Ok(())
    }

    /// Next actionable issue: lowest priority value, then earliest
    /// creation, among open unassigned issues of the repo.
    pub fn next_issue(&self, repo_id: i64) -> Result<Option<Issue>> {
        let conn = self.lock_conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {ISSUE_COLUMNS} FROM issues \
                     WHERE repo_id = ?1 AND status = 'open' AND owner = '' \
                     ORDER BY priority ASC, created_at ASC LIMIT 1"
                ),
                params![repo_id],
                scan_issue,
            )
            .optional()?)
    }
}
