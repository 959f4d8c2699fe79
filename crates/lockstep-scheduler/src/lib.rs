//! `lockstep-scheduler` — cluster-safe periodic jobs on top of `lockstep-lock`.
//!
//! # Overview
//!
//! Jobs are registered programmatically into a [`registry::JobRegistry`]. The
//! [`engine::Scheduler`] wakes on a fixed tick, asks the registry which jobs
//! are due, and tries to take each job's lease. A job whose lease is held by
//! another node is skipped for that tick; an acquired lease is handed to an
//! [`guard::ExecutionGuard`] that runs the job on its own task and releases the
//! lease afterwards.
//!
//! # Triggers
//!
//! | Variant     | Behaviour                                              |
//! |-------------|--------------------------------------------------------|
//! | `Cron`      | 5-, 6- (with seconds) or 7-field cron expression, UTC  |
//! | `FixedRate` | Every N, aligned to the Unix epoch so nodes agree      |
//!
//! # Guarantees
//!
//! For one job name at most one node runs it per lease window. A run that
//! outlives `lock_at_most_for` is abandoned, not cancelled: its lease expires
//! and another node may start the job while the old run is still finishing.

pub mod engine;
pub mod error;
pub mod guard;
pub mod registry;
pub mod trigger;
pub mod types;

pub use engine::{Scheduler, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use guard::{ExecutionGuard, GuardReport};
pub use registry::JobRegistry;
pub use trigger::Trigger;
pub use types::{
    action_fn, JobAction, JobDefinition, JobSlot, LockPolicy, RunOutcome, SchedulerEvent,
    SlotState, TickReport,
};
