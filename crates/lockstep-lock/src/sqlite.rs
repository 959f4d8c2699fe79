use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SubsecRound, Utc};
use lockstep_core::{Clock, SystemClock};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::db::{format_ts, init_db, parse_ts};
use crate::error::{LockError, Result};
use crate::store::{LockRecord, LockStore};

/// [`LockStore`] over the SQLite `locks` table.
///
/// Each node opens its own connection to the shared database file; the
/// conditional INSERT/UPDATE statements are atomic under SQLite's write lock.
/// SQLite has no server clock, so the store reads time from the injected
/// [`Clock`] (the process clock by default). Nodes with skewed clocks must pick
/// `lock_at_most_for` generously relative to the expected skew.
pub struct SqliteLockStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteLockStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        Self::with_clock(conn, Arc::new(SystemClock))
    }

    pub fn with_clock(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(
        path: impl AsRef<Path>,
        busy_timeout: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_clock(conn, clock)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LockError::StorageUnavailable("connection mutex poisoned".to_string()))
    }

    fn stamp(&self) -> DateTime<Utc> {
        // Stored precision; keeps in-memory handles equal to what is persisted.
        self.clock.now().trunc_subsecs(3)
    }
}

impl LockStore for SqliteLockStore {
    fn now(&self) -> Result<DateTime<Utc>> {
        Ok(self.stamp())
    }

    #[instrument(skip(self), fields(lock = %name))]
    fn try_insert(&self, name: &str, owner: &str, lock_until: DateTime<Utc>) -> Result<bool> {
        let now = format_ts(self.stamp());
        let conn = self.conn()?;
        let n = conn.execute(
            "INSERT INTO locks (name, locked_by, locked_at, lock_until)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO NOTHING",
            rusqlite::params![name, owner, now, format_ts(lock_until)],
        )?;
        debug!(inserted = n == 1, "try_insert");
        Ok(n == 1)
    }

    #[instrument(skip(self), fields(lock = %name))]
    fn try_update(
        &self,
        name: &str,
        owner: &str,
        new_lock_until: DateTime<Utc>,
        expected_owner: Option<&str>,
    ) -> Result<bool> {
        let now = format_ts(self.stamp());
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE locks SET locked_by = ?2, locked_at = ?3, lock_until = ?4
             WHERE name = ?1
               AND (lock_until <= ?3
                    OR (?5 IS NOT NULL AND locked_by = ?5 AND lock_until > ?3))",
            rusqlite::params![name, owner, now, format_ts(new_lock_until), expected_owner],
        )?;
        debug!(updated = n == 1, "try_update");
        Ok(n == 1)
    }

    #[instrument(skip(self), fields(lock = %name))]
    fn try_update_owned(
        &self,
        name: &str,
        owner: &str,
        new_lock_until: DateTime<Utc>,
    ) -> Result<bool> {
        let now = format_ts(self.stamp());
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE locks SET lock_until = ?3
             WHERE name = ?1 AND locked_by = ?2 AND lock_until > ?4",
            rusqlite::params![name, owner, format_ts(new_lock_until), now],
        )?;
        debug!(updated = n == 1, "try_update_owned");
        Ok(n == 1)
    }

    fn find(&self, name: &str) -> Result<Option<LockRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT name, locked_by, locked_at, lock_until FROM locks WHERE name = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(name, locked_by, locked_at, lock_until)| {
            to_record(name, locked_by, &locked_at, &lock_until)
        })
        .transpose()
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, locked_by, locked_at, lock_until FROM locks ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?, // name
                    row.get::<_, String>(1)?, // locked_by
                    row.get::<_, String>(2)?, // locked_at
                    row.get::<_, String>(3)?, // lock_until
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, locked_by, locked_at, lock_until)| {
                to_record(name, locked_by, &locked_at, &lock_until)
            })
            .collect()
    }
}

fn to_record(
    name: String,
    locked_by: String,
    locked_at: &str,
    lock_until: &str,
) -> Result<LockRecord> {
    let locked_at = parse_ts(&name, locked_at)?;
    let lock_until = parse_ts(&name, lock_until)?;
    Ok(LockRecord {
        name,
        locked_by,
        locked_at,
        lock_until,
    })
}
