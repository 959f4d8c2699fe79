use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use lockstep_lock::LockManager;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::guard::ExecutionGuard;
use crate::registry::JobRegistry;
use crate::types::{JobSlot, RunOutcome, SchedulerEvent, SlotState, TickReport};

/// Drives due jobs through their leases at ±1 tick precision.
///
/// The loop only evaluates and dispatches; every acquired run executes on its
/// own task, so a slow job never delays the next tick for other jobs.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    locks: Arc<LockManager>,
    slots: Arc<DashMap<String, JobSlot>>,
    /// If set, scheduler activity is sent here for observers.
    events: Option<mpsc::Sender<SchedulerEvent>>,
    tracker: TaskTracker,
    tick_interval: Duration,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(registry: Arc<JobRegistry>, locks: Arc<LockManager>) -> Self {
        Self {
            registry,
            locks,
            slots: Arc::new(DashMap::new()),
            events: None,
            tracker: TaskTracker::new(),
            tick_interval: Duration::seconds(1),
            shutdown_grace: Duration::seconds(10),
        }
    }

    /// Receive a copy of every [`SchedulerEvent`]. The sender is non-blocking
    /// (`try_send`), so a slow observer loses events instead of stalling ticks.
    pub fn with_events(mut self, events: mpsc::Sender<SchedulerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Snapshot of a job's slot on this node.
    pub fn slot(&self, name: &str) -> Option<JobSlot> {
        self.slots.get(name).map(|s| s.clone())
    }

    /// Number of guarded runs still executing (abandoned runs excluded).
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Evaluate one logical instant: acquire the lease of every due job and
    /// dispatch the winners. Must be called from within a Tokio runtime.
    ///
    /// Due instants are looked for over at least one tick interval, so a
    /// registry built with a shorter lookback still sees every instant.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let lookback = self.tick_interval.max(self.registry.lookback());

        for job in self.registry.due_jobs_within(now, lookback) {
            let name = job.name.clone();

            if let Some(mut slot) = self.slots.get_mut(&name) {
                if slot.state == SlotState::Running {
                    slot.skips += 1;
                    drop(slot);
                    info!(job = %name, "skipping job: previous run still in progress on this node");
                    emit(&self.events, SchedulerEvent::Skipped { job: name.clone() });
                    report.skipped.push(name);
                    continue;
                }
            }
            set_state(&self.slots, &name, SlotState::Evaluating);

            match self
                .locks
                .acquire(&name, job.lock.at_least_for, job.lock.at_most_for)
            {
                Ok(Some(lease)) => {
                    info!(job = %name, lock_until = %lease.lock_until(), "dispatching job");
                    {
                        let mut slot = self.slots.entry(name.clone()).or_default();
                        slot.state = SlotState::Running;
                        slot.runs += 1;
                    }
                    emit(
                        &self.events,
                        SchedulerEvent::Dispatched {
                            job: name.clone(),
                            lock_until: lease.lock_until(),
                        },
                    );

                    let guard = ExecutionGuard::new(Arc::clone(&self.locks), job, lease);
                    let slots = Arc::clone(&self.slots);
                    let events = self.events.clone();
                    let job_name = name.clone();
                    self.tracker.spawn(async move {
                        let report = guard.run().await;
                        finish(&slots, &job_name, report.outcome.clone());
                        emit(
                            &events,
                            SchedulerEvent::Finished {
                                job: job_name,
                                outcome: report.outcome,
                                release: report.release,
                            },
                        );
                    });
                    report.dispatched.push(name);
                }
                Ok(None) => {
                    info!(job = %name, "skipping job: lock still held");
                    if let Some(mut slot) = self.slots.get_mut(&name) {
                        slot.skips += 1;
                    }
                    finish(&self.slots, &name, RunOutcome::Skipped);
                    emit(&self.events, SchedulerEvent::Skipped { job: name.clone() });
                    report.skipped.push(name);
                }
                Err(e) => {
                    error!(job = %name, error = %e, "lock evaluation failed; retrying next due tick");
                    let reason = e.to_string();
                    finish(
                        &self.slots,
                        &name,
                        RunOutcome::EvalFailed {
                            reason: reason.clone(),
                        },
                    );
                    emit(
                        &self.events,
                        SchedulerEvent::EvalFailed {
                            job: name.clone(),
                            reason,
                        },
                    );
                    report.failed.push(name);
                }
            }
        }

        report
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true` (or its sender
    /// is dropped). Tick instants come from the lock store's clock.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            jobs = self.registry.len(),
            owner = %self.locks.owner(),
            "scheduler started"
        );

        let period = self
            .tick_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.locks.now() {
                        Ok(now) => {
                            let report = self.tick(now);
                            if !report.is_empty() {
                                debug!(?report, "tick complete");
                            }
                        }
                        Err(e) => error!(error = %e, "scheduler tick skipped: lock store clock unavailable"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn [`Scheduler::run`] and return a handle that stops it.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&self).run(shutdown_rx));
        SchedulerHandle {
            scheduler: self,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Wait up to the shutdown grace for dispatched runs to finish.
    /// Returns `false` if some were still running when the grace ran out.
    pub async fn drain(&self) -> bool {
        self.tracker.close();
        let grace = self.shutdown_grace.to_std().unwrap_or_default();
        let drained = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                in_flight = self.tracker.len(),
                "shutdown grace elapsed with jobs still running; their leases will expire"
            );
        }
        self.tracker.reopen();
        drained
    }
}

/// Owner-side handle for a started scheduler.
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Stop ticking, then drain in-flight runs. Returns whether all drained.
    pub async fn stop(self) -> bool {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler loop ended abnormally");
        }
        self.scheduler.drain().await
    }
}

fn set_state(slots: &DashMap<String, JobSlot>, name: &str, state: SlotState) {
    slots.entry(name.to_string()).or_default().state = state;
}

/// Record a terminal outcome and return the slot to idle.
fn finish(slots: &DashMap<String, JobSlot>, name: &str, outcome: RunOutcome) {
    let mut slot = slots.entry(name.to_string()).or_default();
    slot.state = SlotState::Idle;
    slot.last_outcome = Some(outcome);
}

fn emit(events: &Option<mpsc::Sender<SchedulerEvent>>, event: SchedulerEvent) {
    if let Some(tx) = events {
        // try_send never blocks the tick loop; log a warning if the channel is full.
        if tx.try_send(event).is_err() {
            warn!("scheduler event channel full or closed, event dropped");
        }
    }
}
