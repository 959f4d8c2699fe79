use thiserror::Error;

/// Errors raised by lock storage and the lease manager.
///
/// Contention is not an error: a lease held elsewhere is `Ok(None)` from
/// `acquire`, and a lease lost before release is `ReleaseOutcome::LeaseLost`.
#[derive(Debug, Error)]
pub enum LockError {
    /// The shared table could not be read or written. Lock state is unknown.
    #[error("lock storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored row could not be decoded.
    #[error("corrupt lock record '{name}': {reason}")]
    Corrupt { name: String, reason: String },

    /// `lock_at_least_for` / `lock_at_most_for` do not describe a usable lease.
    #[error("invalid lock policy for '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },
}

impl From<rusqlite::Error> for LockError {
    fn from(e: rusqlite::Error) -> Self {
        LockError::StorageUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
