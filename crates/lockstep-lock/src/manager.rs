use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lockstep_core::NodeId;
use tracing::{debug, info, instrument, warn};

use crate::error::{LockError, Result};
use crate::store::{LockRecord, LockStore};

/// The right to run one invocation under a named lock.
///
/// Owned by whoever acquired it; not `Clone`, so a lease cannot be handed to
/// two runners.
#[derive(Debug)]
pub struct LeaseHandle {
    name: String,
    owner: NodeId,
    acquired_at: DateTime<Utc>,
    min_release_at: DateTime<Utc>,
    lock_until: DateTime<Utc>,
}

impl LeaseHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Earliest instant the lock may become free again (`lock_at_least_for`).
    pub fn min_release_at(&self) -> DateTime<Utc> {
        self.min_release_at
    }

    /// Instant the lease lapses if never released (`lock_at_most_for`).
    pub fn lock_until(&self) -> DateTime<Utc> {
        self.lock_until
    }
}

/// Result of [`LockManager::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease now ends at `max(now, min_release_at)`.
    Released { lock_until: DateTime<Utc> },
    /// This node no longer held the lease: it expired and may have been taken
    /// over, or it was already released.
    LeaseLost,
}

/// Lease API over a [`LockStore`].
///
/// Every timestamp comes from `LockStore::now`, so all nodes compare against
/// the store's notion of time rather than each doing its own arithmetic.
pub struct LockManager {
    store: Arc<dyn LockStore>,
    owner: NodeId,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, owner: NodeId) -> Self {
        Self { store, owner }
    }

    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    /// The store's current time.
    pub fn now(&self) -> Result<DateTime<Utc>> {
        self.store.now()
    }

    /// Try to take the lease on `name` for up to `at_most_for`.
    ///
    /// Returns `Ok(None)` when another holder has a live lease. A live lease
    /// held by this same node is also refused, so two runs on one node never
    /// overlap either.
    #[instrument(skip(self), fields(lock = %name, owner = %self.owner))]
    pub fn acquire(
        &self,
        name: &str,
        at_least_for: Duration,
        at_most_for: Duration,
    ) -> Result<Option<LeaseHandle>> {
        validate_policy(name, at_least_for, at_most_for)?;

        let now = self.store.now()?;
        let lock_until = offset(name, now, at_most_for)?;
        let min_release_at = offset(name, now, at_least_for)?;
        let owner = self.owner.as_str();

        let acquired = self.store.try_insert(name, owner, lock_until)?
            || self.store.try_update(name, owner, lock_until, None)?;

        if !acquired {
            debug!("lock held elsewhere");
            return Ok(None);
        }

        debug!(%lock_until, "lock acquired");
        Ok(Some(LeaseHandle {
            name: name.to_string(),
            owner: self.owner.clone(),
            acquired_at: now,
            min_release_at,
            lock_until,
        }))
    }

    /// Give the lease back.
    ///
    /// The lock is never freed before `min_release_at`: released early, the
    /// row keeps `lock_until = min_release_at`; released later, it ends now.
    /// Losing the lease in between is reported, not raised, because expiry
    /// already ended this node's ownership.
    #[instrument(skip(self, handle), fields(lock = %handle.name, owner = %handle.owner))]
    pub fn release(&self, handle: &LeaseHandle) -> Result<ReleaseOutcome> {
        let now = self.store.now()?;
        let lock_until = now.max(handle.min_release_at);

        if self
            .store
            .try_update_owned(&handle.name, handle.owner.as_str(), lock_until)?
        {
            debug!(%lock_until, "lock released");
            Ok(ReleaseOutcome::Released { lock_until })
        } else {
            warn!("lease lost before release (expired or taken over)");
            Ok(ReleaseOutcome::LeaseLost)
        }
    }

    /// Renew a live lease: `lock_until = now + at_most_for`.
    ///
    /// The minimum hold only ever grows. Returns `false` when the lease was
    /// already lost; an expired lease is never revived.
    #[instrument(skip(self, handle), fields(lock = %handle.name, owner = %handle.owner))]
    pub fn extend(
        &self,
        handle: &mut LeaseHandle,
        at_least_for: Duration,
        at_most_for: Duration,
    ) -> Result<bool> {
        validate_policy(&handle.name, at_least_for, at_most_for)?;

        let now = self.store.now()?;
        let lock_until = offset(&handle.name, now, at_most_for)?;
        let min_release_at = offset(&handle.name, now, at_least_for)?;
        if !self
            .store
            .try_update_owned(&handle.name, handle.owner.as_str(), lock_until)?
        {
            info!("lease could not be extended; no longer held");
            return Ok(false);
        }

        handle.lock_until = lock_until;
        handle.min_release_at = handle.min_release_at.max(min_release_at);
        debug!(%lock_until, "lease extended");
        Ok(true)
    }

    /// Whether `handle` still names a live lease held by its owner.
    pub fn assert_locked(&self, handle: &LeaseHandle) -> Result<bool> {
        let now = self.store.now()?;
        Ok(self
            .store
            .find(&handle.name)?
            .is_some_and(|r| r.locked_by == handle.owner.as_str() && r.is_held(now)))
    }

    /// Every lock row, for auditing the last holder of each lock.
    pub fn records(&self) -> Result<Vec<LockRecord>> {
        self.store.list()
    }
}

/// Longest lease any policy may ask for.
pub fn max_lock_for() -> Duration {
    Duration::days(MAX_LOCK_DAYS)
}

const MAX_LOCK_DAYS: i64 = 36_500;

/// Check that `at_most_for` lies within `(0, max_lock_for()]` and
/// `at_least_for` within `[0, at_most_for]`.
pub fn validate_policy(name: &str, at_least_for: Duration, at_most_for: Duration) -> Result<()> {
    let reason = if at_most_for <= Duration::zero() {
        "lock_at_most_for must be positive"
    } else if at_most_for > max_lock_for() {
        "lock_at_most_for must not exceed 100 years"
    } else if at_least_for < Duration::zero() {
        "lock_at_least_for must not be negative"
    } else if at_least_for > at_most_for {
        "lock_at_least_for must not exceed lock_at_most_for"
    } else {
        return Ok(());
    };
    Err(LockError::InvalidPolicy {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// `now + by`, or `InvalidPolicy` if the instant is not representable.
fn offset(name: &str, now: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(by)
        .ok_or_else(|| LockError::InvalidPolicy {
            name: name.to_string(),
            reason: "lease end is out of range".to_string(),
        })
}
