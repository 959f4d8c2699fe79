use lockstep_lock::LockError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job with this name is already registered. Programmer error.
    #[error("Duplicate job name: {name}")]
    DuplicateJobName { name: String },

    /// The trigger definition is invalid or unsupported.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Lock storage or lock policy error.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A job body returned an error. Contained to that one invocation.
    #[error("Job {name} failed: {cause}")]
    JobFailed { name: String, cause: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
