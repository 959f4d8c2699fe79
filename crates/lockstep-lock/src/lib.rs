//! `lockstep-lock` — named, time-bounded leases stored in a shared table.
//!
//! # Overview
//!
//! Every lease is one row of the `locks` table:
//!
//! | Column       | Meaning                                         |
//! |--------------|-------------------------------------------------|
//! | `name`       | primary key, one row per lock, never deleted    |
//! | `locked_by`  | node id of the last holder                      |
//! | `locked_at`  | when the last holder acquired it                |
//! | `lock_until` | the lease is held while `now < lock_until`      |
//!
//! A [`store::LockStore`] exposes the atomic row operations; the
//! [`manager::LockManager`] turns them into acquire / extend / release with
//! `lock_at_least_for` and `lock_at_most_for` semantics.

pub mod db;
pub mod error;
pub mod manager;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{LockError, Result};
pub use manager::{max_lock_for, validate_policy, LeaseHandle, LockManager, ReleaseOutcome};
pub use memory::InMemoryLockStore;
pub use sqlite::SqliteLockStore;
pub use store::{LockRecord, LockStore};
