//! Repo CRUD operations for [`SqliteStore`].

use rusqlite::{OptionalExtension, Row, params};

use bor_core::model::Repo;

use crate::error::{Result, StoreError, is_unique_violation};
use crate::sqlite::store::SqliteStore;
use crate::sqlite::{opt_ts_from_sql, opt_ts_to_sql, ts_from_sql, ts_to_sql};

/// All repo columns in a deterministic order for SELECT queries.
const REPO_COLUMNS: &str = "id, owner, name, poll_interval_ms, last_sync_at, \
     issues_etag, issues_since, trusted_authors_only, created_at";

fn scan_repo(row: &Row<'_>) -> rusqlite::Result<Repo> {
    Ok(Repo {
        id: row.get("id")?,
        owner: row.get("owner")?,
        name: row.get("name")?,
        poll_interval_ms: row.get("poll_interval_ms")?,
        last_sync_at: opt_ts_from_sql(row.get("last_sync_at")?),
        issues_etag: row.get("issues_etag")?,
        issues_since: opt_ts_from_sql(row.get("issues_since")?),
        trusted_authors_only: row.get::<_, i32>("trusted_authors_only")? != 0,
        created_at: ts_from_sql(&row.get::<_, String>("created_at")?),
    })
}

impl SqliteStore {
    /// Inserts a new repo. Fails with [`StoreError::AlreadyExists`] on a
    /// duplicate `(owner, name)`.
    pub fn add_repo(&self, repo: &Repo) -> Result<Repo> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO repos (owner, name, poll_interval_ms, last_sync_at, issues_etag, \
             issues_since, trusted_authors_only, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                repo.owner,
                repo.name,
                repo.poll_interval_ms,
                opt_ts_to_sql(repo.last_sync_at),
                repo.issues_etag,
                opt_ts_to_sql(repo.issues_since),
                repo.trusted_authors_only as i32,
                ts_to_sql(repo.created_at),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::already_exists("repo", repo.full_name())
            } else {
                e.into()
            }
        })?;

        let mut inserted = repo.clone();
        inserted.id = conn.last_insert_rowid();
        Ok(inserted)
    }

    /// Retrieves a repo by id.
    pub fn get_repo(&self, id: i64) -> Result<Repo> {
        let conn = self.lock_conn()?;
        conn.query_row(
            &format!("SELECT {REPO_COLUMNS} FROM repos WHERE id = ?1"),
            params![id],
            scan_repo,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("repo", id))
    }

    /// Retrieves a repo by `(owner, name)`, if present.
    pub fn find_repo(&self, owner: &str, name: &str) -> Result<Option<Repo>> {
        let conn = self.lock_conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repos WHERE owner = ?1 AND name = ?2"),
                params![owner, name],
                scan_repo,
            )
            .optional()?)
    }

    /// Lists all repos ordered by id.
    pub fn list_repos(&self) -> Result<Vec<Repo>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {REPO_COLUMNS} FROM repos ORDER BY id"))?;
        let rows = stmt.query_map([], scan_repo)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Rewrites every mutable repo column.
    pub fn update_repo(&self, repo: &Repo) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE repos SET poll_interval_ms = ?2, last_sync_at = ?3, issues_etag = ?4, \
             issues_since = ?5, trusted_authors_only = ?6 WHERE id = ?1",
            params![
                repo.id,
                repo.poll_interval_ms,
                opt_ts_to_sql(repo.last_sync_at),
                repo.issues_etag,
                opt_ts_to_sql(repo.issues_since),
                repo.trusted_authors_only as i32,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("repo", repo.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn add_and_get_repo() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.add_repo(&Repo::new("octo", "rocks")).unwrap();
        assert!(repo.id > 0);

        let fetched = store.get_repo(repo.id).unwrap();
        assert_eq!(fetched.full_name(), "octo/rocks");
        assert_eq!(fetched.poll_interval_ms, 5000);
        assert!(!fetched.trusted_authors_only);
    }

    #[test]
    fn duplicate_repo_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_repo(&Repo::new("octo", "rocks")).unwrap();
        let err = store.add_repo(&Repo::new("octo", "rocks")).unwrap_err();
        assert!(err.is_conflict(), "{err}");
    }

    #[test]
    fn list_is_ordered_by_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_repo(&Repo::new("a", "one")).unwrap();
        store.add_repo(&Repo::new("b", "two")).unwrap();
        let repos = store.list_repos().unwrap();
        assert_eq!(repos.len(), 2);
        assert!(repos[0].id < repos[1].id);
    }

    #[test]
    fn update_roundtrips_sync_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut repo = store.add_repo(&Repo::new("octo", "rocks")).unwrap();

        repo.issues_etag = "W/\"abc\"".into();
        repo.trusted_authors_only = true;
        repo.last_sync_at = Some(chrono::Utc::now());
        store.update_repo(&repo).unwrap();

        let fetched = store.get_repo(repo.id).unwrap();
        assert_eq!(fetched.issues_etag, "W/\"abc\"");
        assert!(fetched.trusted_authors_only);
        assert!(fetched.last_sync_at.is_some());
    }

    #[test]
    fn missing_repo_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_repo(99).unwrap_err().is_not_found());
        assert_eq!(store.find_repo("no", "body").unwrap(), None);
    }
}
