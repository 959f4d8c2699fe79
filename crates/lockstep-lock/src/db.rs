use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::{LockError, Result};

/// Initialise the lock schema in `conn`. Safe to call on every startup.
///
/// Timestamps are fixed-width RFC 3339 UTC strings with millisecond precision
/// (`2026-01-01T00:00:00.000Z`), so plain string comparison in SQL is
/// chronological.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS locks (
            name        TEXT NOT NULL PRIMARY KEY,
            locked_by   TEXT NOT NULL,
            locked_at   TEXT NOT NULL,
            lock_until  TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LockError::Corrupt {
            name: name.to_string(),
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}
