//! Durable storage for the boxofrocks daemon.
//!
//! One SQLite database holds repos, worktrees, issues, the append-only
//! event log and per-issue sync cursors. The write path is serialized
//! through a connection mutex; readers share the same connection.

pub mod error;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use sqlite::cursors::SyncCursor;
pub use sqlite::schema::DB_SCHEMA_VERSION;
pub use sqlite::store::{SqliteStore, peek_schema_version};
