use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use lockstep_lock::{LeaseHandle, LockManager, ReleaseOutcome};
use tracing::{error, info, warn};

use crate::error::SchedulerError;
use crate::types::{JobDefinition, RunOutcome};

/// Outcome of one guarded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardReport {
    pub outcome: RunOutcome,
    /// `None` when the run was abandoned or the release could not reach storage.
    pub release: Option<ReleaseOutcome>,
}

/// Runs one invocation of a job while holding its lease.
///
/// The job body runs on its own task with a budget of `lock_at_most_for`.
/// Past that the run is abandoned: the task keeps going, but the lease is left
/// to expire so another node may take over. Otherwise the lease is released
/// through [`LockManager::release`], which keeps the `lock_at_least_for` floor.
pub struct ExecutionGuard {
    locks: Arc<LockManager>,
    job: Arc<JobDefinition>,
    lease: LeaseHandle,
}

impl ExecutionGuard {
    pub fn new(locks: Arc<LockManager>, job: Arc<JobDefinition>, lease: LeaseHandle) -> Self {
        Self { locks, job, lease }
    }

    /// Run the job to completion, failure, panic or timeout. Never returns an
    /// error: every failure is contained to this run and logged.
    pub async fn run(self) -> GuardReport {
        let name = self.job.name.clone();
        let budget = self.job.lock.at_most_for.to_std().unwrap_or_default();
        let action = Arc::clone(&self.job.action);
        let started = Instant::now();

        let task = tokio::spawn(async move { action.run().await });

        let outcome = match tokio::time::timeout(budget, task).await {
            Ok(Ok(Ok(()))) => RunOutcome::Completed,
            Ok(Ok(Err(cause))) => {
                let err = SchedulerError::JobFailed {
                    name: name.clone(),
                    cause: format!("{cause:#}"),
                };
                warn!(job = %name, error = %err, "job failed");
                RunOutcome::Failed {
                    reason: format!("{cause:#}"),
                }
            }
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "job task cancelled".to_string()
                };
                error!(job = %name, %reason, "job crashed");
                RunOutcome::Crashed { reason }
            }
            Err(_) => {
                // Dropping the JoinHandle detaches the task; it is not cancelled.
                warn!(
                    job = %name,
                    budget_ms = millis(budget),
                    lock_until = %self.lease.lock_until(),
                    "job exceeded lock_at_most_for; abandoning run and letting the lease expire"
                );
                return GuardReport {
                    outcome: RunOutcome::TimedOut,
                    release: None,
                };
            }
        };

        let elapsed_ms = millis(started.elapsed());
        let release = match self.locks.release(&self.lease) {
            Ok(release) => Some(release),
            Err(e) => {
                error!(job = %name, error = %e, "lease release failed; it will expire at lock_until");
                None
            }
        };

        info!(job = %name, %outcome, duration_ms = elapsed_ms, "job finished");
        GuardReport { outcome, release }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
