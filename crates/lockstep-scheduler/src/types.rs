use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lockstep_lock::ReleaseOutcome;

use crate::trigger::Trigger;

/// The body of a job. Opaque to the scheduler.
#[async_trait]
pub trait JobAction: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> JobAction for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`JobAction`].
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn JobAction>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// Lease bounds for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Minimum time the lease is held even if the job finishes sooner.
    pub at_least_for: Duration,
    /// Maximum time the lease is honoured; also the run's time budget.
    pub at_most_for: Duration,
}

impl LockPolicy {
    pub fn new(at_least_for: Duration, at_most_for: Duration) -> Self {
        Self {
            at_least_for,
            at_most_for,
        }
    }

    /// Hold for at most `at_most_for`, no minimum.
    pub fn at_most(at_most_for: Duration) -> Self {
        Self::new(Duration::zero(), at_most_for)
    }
}

/// A schedulable job. Immutable once registered.
pub struct JobDefinition {
    /// Unique job name, also the lock name.
    pub name: String,
    pub trigger: Trigger,
    pub lock: LockPolicy,
    /// Wrapped in Arc so each run's task can hold the action independently.
    pub action: Arc<dyn JobAction>,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        lock: LockPolicy,
        action: Arc<dyn JobAction>,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            lock,
            action,
        }
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

/// Where a job slot currently is in its evaluate/run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    /// Lease acquisition in progress for this tick.
    Evaluating,
    /// An acquired run is executing on this node.
    Running,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotState::Idle => "idle",
            SlotState::Evaluating => "evaluating",
            SlotState::Running => "running",
        };
        write!(f, "{s}")
    }
}

/// How a slot's last evaluation or run ended. Every outcome returns the slot
/// to [`SlotState::Idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Lease held by another node for this tick.
    Skipped,
    /// Lock state could not be determined; retried on the next due tick.
    EvalFailed { reason: String },
    Completed,
    /// The job body returned an error.
    Failed { reason: String },
    /// The run outlived `lock_at_most_for` and was abandoned.
    TimedOut,
    /// The job body panicked.
    Crashed { reason: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Skipped => write!(f, "skipped"),
            RunOutcome::EvalFailed { reason } => write!(f, "eval_failed: {reason}"),
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            RunOutcome::TimedOut => write!(f, "timed_out"),
            RunOutcome::Crashed { reason } => write!(f, "crashed: {reason}"),
        }
    }
}

/// Per-job bookkeeping on this node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSlot {
    pub state: SlotState,
    pub last_outcome: Option<RunOutcome>,
    /// Runs started on this node.
    pub runs: u64,
    /// Due ticks lost to another node's lease.
    pub skips: u64,
}

/// Observable scheduler activity, delivered best-effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Dispatched {
        job: String,
        lock_until: DateTime<Utc>,
    },
    Skipped {
        job: String,
    },
    EvalFailed {
        job: String,
        reason: String,
    },
    Finished {
        job: String,
        outcome: RunOutcome,
        /// `None` when the run timed out or the release itself failed.
        release: Option<ReleaseOutcome>,
    },
}

impl SchedulerEvent {
    pub fn job(&self) -> &str {
        match self {
            SchedulerEvent::Dispatched { job, .. }
            | SchedulerEvent::Skipped { job }
            | SchedulerEvent::EvalFailed { job, .. }
            | SchedulerEvent::Finished { job, .. } => job,
        }
    }
}

/// What one tick did, in registration order within each list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}
