//! DDL statements, migrations and reverse (downgrade) steps.
//!
//! Timestamps are TEXT in ISO 8601, booleans INTEGER (0/1), label and
//! comment lists JSON TEXT columns. The schema version is a single integer
//! in the `meta` table; forward migrations are additive-only and
//! idempotent (`IF NOT EXISTS` / duplicate-column swallowing), reverse
//! steps exist only for the versions that need them.

/// Current schema version. Bumped whenever DDL or migrations change.
pub const DB_SCHEMA_VERSION: i32 = 3;

/// Key under which the schema version lives in the `meta` table.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Core DDL executed on every open. All statements are idempotent.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Meta table ----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Repos table ---------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS repos (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        owner            TEXT NOT NULL,
        name             TEXT NOT NULL,
        poll_interval_ms INTEGER NOT NULL DEFAULT 5000,
        last_sync_at     TEXT,
        issues_etag      TEXT NOT NULL DEFAULT '',
        created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        UNIQUE (owner, name)
    )
    "#,
    // -- Worktrees table -----------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS worktrees (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id        INTEGER NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
        local_path     TEXT NOT NULL,
        socket_enabled INTEGER NOT NULL DEFAULT 0,
        queue_enabled  INTEGER NOT NULL DEFAULT 0,
        UNIQUE (repo_id, local_path)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_worktrees_repo ON worktrees(repo_id)",
    // -- Issues table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id         INTEGER NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
        upstream_number INTEGER,
        title           TEXT NOT NULL,
        status          TEXT NOT NULL DEFAULT 'open',
        priority        INTEGER NOT NULL DEFAULT 2,
        issue_type      TEXT NOT NULL DEFAULT 'task',
        description     TEXT NOT NULL DEFAULT '',
        owner           TEXT NOT NULL DEFAULT '',
        labels          TEXT NOT NULL DEFAULT '[]',
        comments        TEXT NOT NULL DEFAULT '[]',
        created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        closed_at       TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_issues_repo ON issues(repo_id)",
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_issues_upstream
        ON issues(repo_id, upstream_number)
        WHERE upstream_number IS NOT NULL
    "#,
    // -- Events table (append-only log) --------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id                    INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id               INTEGER NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
        issue_id              INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
        upstream_comment_id   INTEGER,
        upstream_issue_number INTEGER,
        timestamp             TEXT NOT NULL,
        action                TEXT NOT NULL,
        payload               TEXT NOT NULL DEFAULT '',
        agent                 TEXT NOT NULL DEFAULT '',
        synced                INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_pending ON events(repo_id, synced)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_events_upstream_comment
        ON events(repo_id, upstream_comment_id)
        WHERE upstream_comment_id IS NOT NULL
    "#,
    // -- Sync cursors table --------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS sync_cursors (
        repo_id               INTEGER NOT NULL,
        upstream_issue_number INTEGER NOT NULL,
        last_comment_id       INTEGER NOT NULL DEFAULT 0,
        last_comment_at       TEXT,
        PRIMARY KEY (repo_id, upstream_issue_number)
    )
    "#,
];

/// Forward migrations, ordered by target version. Each entry is applied
/// when the stored version is below the target. All steps are additive;
/// `ALTER TABLE ... ADD COLUMN` failures on an existing column are
/// swallowed so re-running is harmless.
pub const MIGRATIONS: &[(i32, &[&str])] = &[
    (
        2,
        &["ALTER TABLE repos ADD COLUMN trusted_authors_only INTEGER NOT NULL DEFAULT 0"],
    ),
    (
        3,
        &["ALTER TABLE repos ADD COLUMN issues_since TEXT"],
    ),
];

/// Reverse steps for offline downgrade, keyed by the version they undo.
/// Versions without an entry were additive-only and need no reverse SQL;
/// downgrading past them still resets the version integer.
pub const REVERSE_MIGRATIONS: &[(i32, &[&str])] = &[
    (2, &["ALTER TABLE repos DROP COLUMN trusted_authors_only"]),
    (3, &["ALTER TABLE repos DROP COLUMN issues_since"]),
];

/// Looks up the reverse statements for a version, if any are registered.
pub fn reverse_steps(version: i32) -> Option<&'static [&'static str]> {
    REVERSE_MIGRATIONS
        .iter()
        .find(|(v, _)| *v == version)
        .map(|(_, stmts)| *stmts)
}
