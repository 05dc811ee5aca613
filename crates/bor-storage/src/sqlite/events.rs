//! Event log operations for [`SqliteStore`].
//!
//! The log is append-only: rows are never mutated after insertion except
//! to flip `synced` and record the upstream comment id, exactly once.

use chrono::Utc;
use rusqlite::{Row, params};

use bor_core::event::Event;

use crate::error::{Result, StoreError};
use crate::sqlite::store::SqliteStore;
use crate::sqlite::{ts_from_sql, ts_to_sql};

const EVENT_COLUMNS: &str = "id, repo_id, issue_id, upstream_comment_id, \
     upstream_issue_number, timestamp, action, payload, agent, synced";

fn scan_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get("id")?,
        repo_id: row.get("repo_id")?,
        issue_id: row.get("issue_id")?,
        upstream_comment_id: row.get("upstream_comment_id")?,
        upstream_issue_number: row.get("upstream_issue_number")?,
        timestamp: ts_from_sql(&row.get::<_, String>("timestamp")?),
        action: row.get::<_, String>("action")?.into(),
        payload: row.get("payload")?,
        agent: row.get("agent")?,
        synced: row.get::<_, i32>("synced")? != 0,
    })
}

impl SqliteStore {
    /// Appends an event, assigning its id. A zero timestamp defaults to
    /// now.
    pub fn append_event(&self, event: &Event) -> Result<Event> {
        let mut event = event.clone();
        if event.timestamp.timestamp() == 0 {
            event.timestamp = Utc::now();
        }

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO events (repo_id, issue_id, upstream_comment_id, upstream_issue_number, \
             timestamp, action, payload, agent, synced) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.repo_id,
                event.issue_id,
                event.upstream_comment_id,
                event.upstream_issue_number,
                ts_to_sql(event.timestamp),
                event.action.as_str(),
                event.payload,
                event.agent,
                event.synced as i32,
            ],
        )?;

        event.id = conn.last_insert_rowid();
        Ok(event)
    }

    /// Lists all events for one issue, ordered by id.
    pub fn list_events(&self, issue_id: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE issue_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![issue_id], scan_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Lists unsynced events for one repo, ordered by id. This is the
    /// outbound push queue.
    pub fn pending_events(&self, repo_id: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE repo_id = ?1 AND synced = 0 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![repo_id], scan_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Counts unsynced events for one repo.
    pub fn count_pending_events(&self, repo_id: i64) -> Result<i64> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM events WHERE repo_id = ?1 AND synced = 0",
            params![repo_id],
            |row| row.get(0),
        )?)
    }

    /// Flips `synced` and records the upstream comment id.
    pub fn mark_event_synced(&self, event_id: i64, upstream_comment_id: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE events SET synced = 1, upstream_comment_id = ?2 WHERE id = ?1",
            params![event_id, upstream_comment_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("event", event_id));
        }
        Ok(())
    }

    /// Returns `true` when an upstream comment id is already present in
    /// the repo's event log. This is the pull-side dedup check.
    pub fn has_upstream_comment(&self, repo_id: i64, upstream_comment_id: i64) -> Result<bool> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE repo_id = ?1 AND upstream_comment_id = ?2",
            params![repo_id, upstream_comment_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use bor_core::enums::EventAction;
    use bor_core::event::EventPayload;
    use bor_core::model::{Issue, Repo};

    use super::*;

    fn fixture() -> (SqliteStore, i64, i64) {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store.add_repo(&Repo::new("octo", "rocks")).unwrap();
        let issue = store
            .create_issue(&Issue {
                repo_id: repo.id,
                title: "subject".into(),
                ..Issue::default()
            })
            .unwrap();
        (store, repo.id, issue.id)
    }

    fn event(repo_id: i64, issue_id: i64, action: EventAction) -> Event {
        Event::new(
            repo_id,
            issue_id,
            action,
            &EventPayload::default(),
            "tester",
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn append_assigns_ids_in_order() {
        let (store, repo_id, issue_id) = fixture();
        let first = store
            .append_event(&event(repo_id, issue_id, EventAction::Create))
            .unwrap();
        let second = store
            .append_event(&event(repo_id, issue_id, EventAction::Close))
            .unwrap();
        assert!(first.id < second.id);
        assert!(!first.synced);

        let events = store.list_events(issue_id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, EventAction::Create);
    }

    #[test]
    fn zero_timestamp_defaults_to_now() {
        let (store, repo_id, issue_id) = fixture();
        let mut e = event(repo_id, issue_id, EventAction::Create);
        e.timestamp = chrono::DateTime::UNIX_EPOCH;
        let stored = store.append_event(&e).unwrap();
        assert!(stored.timestamp.timestamp() > 0);
    }

    #[test]
    fn mark_synced_drains_pending() {
        let (store, repo_id, issue_id) = fixture();
        let e = store
            .append_event(&event(repo_id, issue_id, EventAction::Create))
            .unwrap();

        assert_eq!(store.pending_events(repo_id).unwrap().len(), 1);
        assert_eq!(store.count_pending_events(repo_id).unwrap(), 1);

        store.mark_event_synced(e.id, 9001).unwrap();
        assert!(store.pending_events(repo_id).unwrap().is_empty());

        let events = store.list_events(issue_id).unwrap();
        assert!(events[0].synced);
        assert_eq!(events[0].upstream_comment_id, Some(9001));
        assert!(store.has_upstream_comment(repo_id, 9001).unwrap());
        assert!(!store.has_upstream_comment(repo_id, 9002).unwrap());
    }

    #[test]
    fn duplicate_upstream_comment_id_rejected() {
        let (store, repo_id, issue_id) = fixture();
        let a = store
            .append_event(&event(repo_id, issue_id, EventAction::Create))
            .unwrap();
        let b = store
            .append_event(&event(repo_id, issue_id, EventAction::Close))
            .unwrap();

        store.mark_event_synced(a.id, 500).unwrap();
        let err = store.mark_event_synced(b.id, 500).unwrap_err();
        assert!(matches!(err, StoreError::Query(_)), "{err}");
    }
}
