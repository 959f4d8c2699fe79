use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lockstep_core::{Clock, SystemClock};

use crate::error::{LockError, Result};
use crate::store::{LockRecord, LockStore};

/// Process-local [`LockStore`].
///
/// Gives the same row semantics as the SQLite store but is only shared by the
/// managers holding this instance. Useful when every "node" lives in one
/// process, as in tests.
pub struct InMemoryLockStore {
    rows: Mutex<BTreeMap<String, LockRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    fn rows(&self) -> Result<MutexGuard<'_, BTreeMap<String, LockRecord>>> {
        self.rows
            .lock()
            .map_err(|_| LockError::StorageUnavailable("lock table mutex poisoned".to_string()))
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LockStore for InMemoryLockStore {
    fn now(&self) -> Result<DateTime<Utc>> {
        Ok(self.clock.now())
    }

    fn try_insert(&self, name: &str, owner: &str, lock_until: DateTime<Utc>) -> Result<bool> {
        let now = self.clock.now();
        let mut rows = self.rows()?;
        if rows.contains_key(name) {
            return Ok(false);
        }
        rows.insert(
            name.to_string(),
            LockRecord {
                name: name.to_string(),
                locked_by: owner.to_string(),
                locked_at: now,
                lock_until,
            },
        );
        Ok(true)
    }

    fn try_update(
        &self,
        name: &str,
        owner: &str,
        new_lock_until: DateTime<Utc>,
        expected_owner: Option<&str>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut rows = self.rows()?;
        let Some(row) = rows.get_mut(name) else {
            return Ok(false);
        };

        let expired = row.lock_until <= now;
        let renewing = expected_owner.is_some_and(|o| row.locked_by == o) && row.lock_until > now;
        if !(expired || renewing) {
            return Ok(false);
        }

        row.locked_by = owner.to_string();
        row.locked_at = now;
        row.lock_until = new_lock_until;
        Ok(true)
    }

    fn try_update_owned(
        &self,
        name: &str,
        owner: &str,
        new_lock_until: DateTime<Utc>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut rows = self.rows()?;
        match rows.get_mut(name) {
            Some(row) if row.locked_by == owner && row.lock_until > now => {
                row.lock_until = new_lock_until;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn find(&self, name: &str) -> Result<Option<LockRecord>> {
        Ok(self.rows()?.get(name).cloned())
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        Ok(self.rows()?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lockstep_core::ManualClock;

    fn store() -> (InMemoryLockStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        (InMemoryLockStore::with_clock(clock.clone()), clock)
    }

    #[test]
    fn matches_sqlite_row_semantics() {
        let (store, clock) = store();
        let t0 = clock.now();

        assert!(store.try_insert("job", "a", t0 + Duration::seconds(10)).unwrap());
        assert!(!store.try_insert("job", "b", t0 + Duration::seconds(10)).unwrap());
        assert!(!store
            .try_update("job", "b", t0 + Duration::seconds(10), None)
            .unwrap());
        assert!(store
            .try_update("job", "a", t0 + Duration::seconds(20), Some("a"))
            .unwrap());

        clock.advance(Duration::seconds(20));
        assert!(!store
            .try_update_owned("job", "a", clock.now() + Duration::seconds(1))
            .unwrap());
        assert!(store
            .try_update("job", "b", clock.now() + Duration::seconds(10), None)
            .unwrap());
        assert_eq!(store.find("job").unwrap().unwrap().locked_by, "b");
    }

    #[test]
    fn update_of_unknown_name_is_refused() {
        let (store, clock) = store();
        assert!(!store.try_update("nope", "a", clock.now(), None).unwrap());
        assert!(store.list().unwrap().is_empty());
    }
}
