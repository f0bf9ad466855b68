//! Schema DDL, connection factory, and small internal helpers.
//!
//! Nothing here is part of the public API; [`GraphStore`](super::GraphStore)
//! is the only consumer.
//!
//! ## What lives here
//! - **Schema constants** — `SCHEMA_VERSION`, `init_schema`.
//! - **Connection factory** — `open_conn` (WAL + foreign-keys + busy timeout).
//! - **Utilities** — `now_iso8601`, `escape_match_query`.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::AppError;

/// Schema version stored in `PRAGMA user_version`.
/// Increment when the DDL changes; add a migration path in `initialize`.
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Execute the v1 schema DDL on a freshly-opened SQLite connection.
///
/// Creates four objects:
/// - `nodes` — one row per entity; `name` is the normalized unique key.
/// - `edges` — directed relationships; the `(source_id, target_id, relation)`
///   triple is unique and both endpoints cascade-delete with their node.
/// - `observations` — append-only provenance log; empty `entities_json`
///   means pending extraction.
/// - `node_index` — FTS5 mirror of `nodes(name, summary, type)`; `node_id`
///   is `UNINDEXED` (stored but not tokenized).
///
/// Sets `PRAGMA user_version = 1` so `initialize` can skip the DDL on re-open.
pub(crate) fn init_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            target_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            relation TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            context TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(source_id, target_id, relation)
        );

        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            entities_json TEXT NOT NULL DEFAULT '',
            session_key TEXT NOT NULL DEFAULT '',
            processed_at TEXT
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS node_index USING fts5(
            node_id UNINDEXED,
            name,
            summary,
            type
        );

        PRAGMA user_version = 1;
        ",
    )
    .map_err(|e| AppError::Storage(format!("graph: initialize schema: {e}")))
}

/// Open a SQLite connection to `db_path` and apply recommended pragmas.
///
/// Pragmas applied:
/// - `journal_mode = WAL` — allows concurrent readers alongside a writer.
/// - `foreign_keys = ON` — required for edge cascade-delete.
/// - `busy_timeout = 5000` — wait up to 5 s before returning `SQLITE_BUSY`.
pub(crate) fn open_conn(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Storage(format!("graph: open {}: {e}", db_path.display())))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Storage(format!("graph: set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Storage(format!("graph: set foreign_keys ON: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Storage(format!("graph: set busy_timeout: {e}")))?;

    Ok(conn)
}

/// Return the current UTC time as an RFC 3339 string with second precision,
/// e.g. `"2025-04-01T12:00:00Z"`. Used for all row timestamps.
pub(crate) fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Escape a user-supplied string for use in an FTS5 `MATCH` query.
///
/// FTS5 parses the argument to `MATCH` with its own mini-language, so tokens
/// like `AND`, `OR`, `*`, and unbalanced quotes are significant. Parameter
/// binding does **not** quote the content; binding only protects against SQL
/// injection, not FTS syntax errors. Every whitespace-separated token is
/// wrapped in double-quotes (internal quotes doubled) so it is matched as a
/// literal phrase, and tokens are joined with `OR`.
///
/// Returns an empty string when the query has no tokens; callers treat that
/// as zero matches.
pub(crate) fn escape_match_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_quotes_every_token() {
        assert_eq!(escape_match_query("alice"), "\"alice\"");
        assert_eq!(escape_match_query("alice bob"), "\"alice\" OR \"bob\"");
    }

    #[test]
    fn escape_neutralises_operators() {
        assert_eq!(escape_match_query("AND"), "\"AND\"");
        assert_eq!(escape_match_query("a*"), "\"a*\"");
        assert_eq!(escape_match_query("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn escape_empty_is_empty() {
        assert_eq!(escape_match_query(""), "");
        assert_eq!(escape_match_query("   "), "");
    }

    #[test]
    fn timestamp_is_rfc3339_seconds() {
        let ts = now_iso8601();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2025-04-01T12:00:00Z".len());
    }
}
