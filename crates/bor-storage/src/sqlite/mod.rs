//! SQLite-backed storage implementation.

pub mod cursors;
pub mod events;
pub mod issues;
pub mod repos;
pub mod schema;
pub mod store;
pub mod worktrees;

use chrono::{DateTime, Utc};

/// Timestamps are stored as TEXT in ISO 8601 with millisecond precision
/// (SQLite has no native datetime type).
pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parses a stored timestamp, tolerating any RFC 3339 precision.
pub(crate) fn ts_from_sql(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

pub(crate) fn opt_ts_to_sql(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(ts_to_sql)
}

pub(crate) fn opt_ts_from_sql(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(ts_from_sql)
}
