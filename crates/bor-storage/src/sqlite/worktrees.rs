//! Worktree operations for [`SqliteStore`].

use rusqlite::{Row, params};

use bor_core::model::Worktree;

use crate::error::{Result, StoreError};
use crate::sqlite::store::SqliteStore;

const WORKTREE_COLUMNS: &str = "id, repo_id, local_path, socket_enabled, queue_enabled";

fn scan_worktree(row: &Row<'_>) -> rusqlite::Result<Worktree> {
    Ok(Worktree {
        id: row.get("id")?,
        repo_id: row.get("repo_id")?,
        local_path: row.get("local_path")?,
        socket_enabled: row.get::<_, i32>("socket_enabled")? != 0,
        queue_enabled: row.get::<_, i32>("queue_enabled")? != 0,
    })
}

impl SqliteStore {
    /// Upserts a worktree on `(repo_id, local_path)`. Re-adding merges the
    /// socket/queue flags with OR semantics, so an enabled transport is
    /// never turned off by a second registration.
    pub fn add_worktree(
        &self,
        repo_id: i64,
        local_path: &str,
        socket_enabled: bool,
        queue_enabled: bool,
    ) -> Result<Worktree> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO worktrees (repo_id, local_path, socket_enabled, queue_enabled) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (repo_id, local_path) DO UPDATE SET \
               socket_enabled = max(worktrees.socket_enabled, excluded.socket_enabled), \
               queue_enabled = max(worktrees.queue_enabled, excluded.queue_enabled)",
            params![repo_id, local_path, socket_enabled as i32, queue_enabled as i32],
        )?;

        conn.query_row(
            &format!(
                "SELECT {WORKTREE_COLUMNS} FROM worktrees WHERE repo_id = ?1 AND local_path = ?2"
            ),
            params![repo_id, local_path],
            scan_worktree,
        )
        .map_err(Into::into)
    }

    /// Removes a worktree registration.
    pub fn remove_worktree(&self, repo_id: i64, local_path: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "DELETE FROM worktrees WHERE repo_id = ?1 AND local_path = ?2",
            params![repo_id, local_path],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("worktree", local_path));
        }
        Ok(())
    }

    /// Lists worktrees for one repo, ordered by id.
    pub fn list_worktrees(&self, repo_id: i64) -> Result<Vec<Worktree>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORKTREE_COLUMNS} FROM worktrees WHERE repo_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![repo_id], scan_worktree)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Lists every registered worktree. Used for repo-affinity resolution
    /// and transport startup.
    pub fn list_all_worktrees(&self) -> Result<Vec<Worktree>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {WORKTREE_COLUMNS} FROM worktrees ORDER BY id"))?;
        let rows = stmt.query_map([], scan_worktree)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use bor_core::model::Repo;

    use super::*;

    fn store_with_repo() -> (SqliteStore, i64) {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.add_repo(&Repo::new("octo", "rocks")).unwrap();
        (store, repo.id)
    }

    #[test]
    fn add_is_idempotent_and_merges_flags() {
        let (store, repo_id) = store_with_repo();

        let wt = store.add_worktree(repo_id, "/tmp/w1", true, false).unwrap();
        assert!(wt.socket_enabled);
        assert!(!wt.queue_enabled);

        // Re-add with only the queue flag: socket stays on.
        let wt = store.add_worktree(repo_id, "/tmp/w1", false, true).unwrap();
        assert!(wt.socket_enabled);
        assert!(wt.queue_enabled);

        assert_eq!(store.list_worktrees(repo_id).unwrap().len(), 1);
    }

    #[test]
    fn local_path_unique_per_repo() {
        let (store, repo_id) = store_with_repo();
        store.add_worktree(repo_id, "/tmp/w1", false, false).unwrap();
        store.add_worktree(repo_id, "/tmp/w2", false, false).unwrap();
        assert_eq!(store.list_worktrees(repo_id).unwrap().len(), 2);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let (store, repo_id) = store_with_repo();
        let err = store.remove_worktree(repo_id, "/tmp/nope").unwrap_err();
        assert!(err.is_not_found());
    }
}
