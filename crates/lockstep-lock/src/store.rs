use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// One row of the lock table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRecord {
    pub name: String,
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    pub lock_until: DateTime<Utc>,
}

impl LockRecord {
    /// A lease is held iff `now < lock_until`.
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        now < self.lock_until
    }
}

/// Atomic operations over the shared lock table.
///
/// Every write is a single conditional statement at the storage layer so two
/// nodes can never both observe success for the same live lease. Any I/O
/// failure is `LockError::StorageUnavailable` and must be read as "state
/// unknown", never as success.
pub trait LockStore: Send + Sync {
    /// The clock all lock comparisons are made against.
    fn now(&self) -> Result<DateTime<Utc>>;

    /// Insert a row for `name` iff none exists. Returns whether it was inserted.
    fn try_insert(&self, name: &str, owner: &str, lock_until: DateTime<Utc>) -> Result<bool>;

    /// Set `locked_by = owner` and `lock_until = new_lock_until` iff the
    /// stored lease has expired (takeover), or `expected_owner` is given and
    /// still holds a live lease.
    fn try_update(
        &self,
        name: &str,
        owner: &str,
        new_lock_until: DateTime<Utc>,
        expected_owner: Option<&str>,
    ) -> Result<bool>;

    /// Move `lock_until` iff `owner` holds a live lease on `name`.
    ///
    /// Never takes over an expired row; used for renewal and release.
    fn try_update_owned(
        &self,
        name: &str,
        owner: &str,
        new_lock_until: DateTime<Utc>,
    ) -> Result<bool>;

    fn find(&self, name: &str) -> Result<Option<LockRecord>>;

    /// All rows ordered by name.
    fn list(&self) -> Result<Vec<LockRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn held_strictly_before_lock_until() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let record = LockRecord {
            name: "job".into(),
            locked_by: "a".into(),
            locked_at: t0,
            lock_until: t0 + Duration::seconds(10),
        };
        assert!(record.is_held(t0));
        assert!(record.is_held(t0 + Duration::milliseconds(9_999)));
        assert!(!record.is_held(t0 + Duration::seconds(10)));
    }
}
