//! Per-issue sync cursor operations for [`SqliteStore`].
//!
//! A cursor marks the highest upstream comment already ingested for one
//! `(repo, upstream issue)` pair, plus the timestamp used for the next
//! "comments since" query.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::error::Result;
use crate::sqlite::store::SqliteStore;
use crate::sqlite::{opt_ts_from_sql, opt_ts_to_sql};

/// The ingestion mark for one upstream issue.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SyncCursor {
    /// Highest upstream comment id ingested; 0 when nothing was.
    pub last_comment_id: i64,
    /// Timestamp of that comment, for incremental "since" queries.
    pub last_comment_at: Option<DateTime<Utc>>,
}

impl SqliteStore {
    /// Reads the cursor; absent cursors read as `(0, None)`.
    pub fn get_cursor(&self, repo_id: i64, upstream_issue_number: i64) -> Result<SyncCursor> {
        let conn = self.lock_conn()?;
        Ok(conn
            .query_row(
                "SELECT last_comment_id, last_comment_at FROM sync_cursors \
                 WHERE repo_id = ?1 AND upstream_issue_number = ?2",
                params![repo_id, upstream_issue_number],
                |row| {
                    Ok(SyncCursor {
                        last_comment_id: row.get(0)?,
                        last_comment_at: opt_ts_from_sql(row.get(1)?),
                    })
                },
            )
            .optional()?
            .unwrap_or_default())
    }

    /// Upserts the cursor.
    pub fn set_cursor(
        &self,
        repo_id: i64,
        upstream_issue_number: i64,
        cursor: SyncCursor,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_cursors (repo_id, upstream_issue_number, last_comment_id, last_comment_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (repo_id, upstream_issue_number) DO UPDATE SET \
               last_comment_id = excluded.last_comment_id, \
               last_comment_at = excluded.last_comment_at",
            params![
                repo_id,
                upstream_issue_number,
                cursor.last_comment_id,
                opt_ts_to_sql(cursor.last_comment_at),
            ],
        )?;
        Ok(())
    }
}
