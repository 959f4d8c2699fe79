use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use lockstep_lock::validate_policy;
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};
use crate::types::JobDefinition;

/// Registry of schedulable jobs, in registration order.
///
/// Shared between the caller that registers jobs and the scheduler loop
/// (pass as `Arc<JobRegistry>`).
pub struct JobRegistry {
    jobs: RwLock<Vec<Arc<JobDefinition>>>,
    /// Instant of the previous `due_jobs` evaluation.
    cursor: Mutex<Option<DateTime<Utc>>>,
    /// How far back the first (or a late) evaluation looks for fire instants.
    lookback: Duration,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_lookback(Duration::seconds(1))
    }

    /// `lookback` should equal the scheduler's tick interval so consecutive
    /// ticks cover time without gaps.
    pub fn with_lookback(lookback: Duration) -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
            cursor: Mutex::new(None),
            lookback,
        }
    }

    /// Register a job. Names are unique; the lock policy is checked up front
    /// so a bad policy fails here rather than on every tick.
    pub fn register(&self, job: JobDefinition) -> Result<()> {
        validate_policy(&job.name, job.lock.at_least_for, job.lock.at_most_for)?;

        let mut jobs = self.jobs.write().expect("job registry poisoned");
        if jobs.iter().any(|j| j.name == job.name) {
            return Err(SchedulerError::DuplicateJobName { name: job.name });
        }
        info!(job = %job.name, trigger = %job.trigger, "job registered");
        jobs.push(Arc::new(job));
        Ok(())
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Jobs with a fire instant in `(previous evaluation, now]`, looking back
    /// at most the registry's own lookback.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<Arc<JobDefinition>> {
        self.due_jobs_within(now, self.lookback)
    }

    /// Jobs with a fire instant in `(previous evaluation, now]`.
    ///
    /// Fire-on-tick, no catch-up: the window never starts earlier than
    /// `now - lookback`, so instants missed while the process was stalled or
    /// down are not replayed. A clock that moved backwards yields nothing until
    /// it passes the previous evaluation again.
    pub fn due_jobs_within(
        &self,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Vec<Arc<JobDefinition>> {
        let from = {
            let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
            let floor = now
                .checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let from = cursor.map_or(floor, |c| c.max(floor));
            if now <= from {
                return Vec::new();
            }
            *cursor = Some(now);
            from
        };

        let jobs = self.jobs.read().expect("job registry poisoned");
        let due: Vec<_> = jobs
            .iter()
            .filter(|j| j.trigger.fires_within(from, now))
            .cloned()
            .collect();
        if !due.is_empty() {
            debug!(count = due.len(), %from, %now, "jobs due");
        }
        due
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDefinition>> {
        let jobs = self.jobs.read().expect("job registry poisoned");
        jobs.iter().find(|j| j.name == name).cloned()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        let jobs = self.jobs.read().expect("job registry poisoned");
        jobs.iter().map(|j| j.name.clone()).collect()
    }

    pub fn jobs(&self) -> Vec<Arc<JobDefinition>> {
        self.jobs.read().expect("job registry poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("job registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::Trigger;
    use crate::types::{action_fn, LockPolicy};
    use chrono::TimeZone;

    fn job(name: &str, cron: &str) -> JobDefinition {
        JobDefinition::new(
            name,
            Trigger::cron(cron).unwrap(),
            LockPolicy::at_most(Duration::seconds(60)),
            action_fn(|| async { anyhow::Ok(()) }),
        )
    }

    fn at(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, s).unwrap()
    }

    fn names(jobs: &[Arc<JobDefinition>]) -> Vec<&str> {
        jobs.iter().map(|j| j.name.as_str()).collect()
    }

    #[test]
    fn duplicate_names_rejected() {
        let registry = JobRegistry::new();
        registry.register(job("Job1", "* * * * * *")).unwrap();
        let err = registry.register(job("Job1", "*/5 * * * * *")).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJobName { ref name } if name == "Job1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_policy_rejected_at_registration() {
        let registry = JobRegistry::new();
        let bad = JobDefinition::new(
            "bad",
            Trigger::cron("* * * * * *").unwrap(),
            LockPolicy::new(Duration::seconds(90), Duration::seconds(60)),
            action_fn(|| async { anyhow::Ok(()) }),
        );
        assert!(matches!(registry.register(bad), Err(SchedulerError::Lock(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn due_jobs_in_registration_order() {
        let registry = JobRegistry::new();
        registry.register(job("b", "*/10 * * * * *")).unwrap();
        registry.register(job("a", "* * * * * *")).unwrap();
        registry.register(job("c", "*/7 * * * * *")).unwrap();

        assert_eq!(names(&registry.due_jobs(at(10))), vec!["b", "a"]);
        assert_eq!(names(&registry.due_jobs(at(11))), vec!["a"]);
    }

    #[test]
    fn each_instant_fires_once() {
        let registry = JobRegistry::new();
        registry.register(job("Job1", "*/10 * * * * *")).unwrap();

        assert_eq!(registry.due_jobs(at(10)).len(), 1);
        // same instant evaluated again
        assert!(registry.due_jobs(at(10)).is_empty());
        assert!(registry.due_jobs(at(11)).is_empty());
    }

    #[test]
    fn missed_instants_are_not_replayed() {
        let registry = JobRegistry::new();
        registry.register(job("Job1", "*/10 * * * * *")).unwrap();

        assert!(registry.due_jobs(at(1)).is_empty());
        // stalled from :01 to :25, so the :10 and :20 instants are gone
        assert!(registry.due_jobs(at(25)).is_empty());
        assert_eq!(registry.due_jobs(at(30)).len(), 1);
        // clock stepped backwards: nothing until it passes :30 again
        assert!(registry.due_jobs(at(29)).is_empty());
    }

    #[test]
    fn lookback_bridges_consecutive_ticks() {
        let registry = JobRegistry::with_lookback(Duration::seconds(5));
        registry.register(job("Job1", "*/10 * * * * *")).unwrap();

        assert!(registry.due_jobs(at(7)).is_empty());
        assert_eq!(registry.due_jobs(at(12)).len(), 1);
    }

    #[test]
    fn explicit_lookback_covers_wider_ticks() {
        let registry = JobRegistry::new();
        registry.register(job("Job1", "*/10 * * * * *")).unwrap();

        let half = Duration::milliseconds(500);
        let mut fired = 0;
        for s in [7, 12, 17, 22, 27, 32] {
            fired += registry
                .due_jobs_within(at(s) + half, Duration::seconds(5))
                .len();
        }
        // :10, :20, :30
        assert_eq!(fired, 3);
    }

    #[test]
    fn oversized_lookback_is_clamped() {
        let registry = JobRegistry::new();
        registry
            .register(JobDefinition::new(
                "sweep",
                Trigger::fixed_rate(Duration::seconds(10)).unwrap(),
                LockPolicy::at_most(Duration::seconds(60)),
                action_fn(|| async { anyhow::Ok(()) }),
            ))
            .unwrap();
        assert_eq!(registry.due_jobs_within(at(10), Duration::MAX).len(), 1);
    }

    #[test]
    fn get_finds_by_name() {
        let registry = JobRegistry::new();
        registry.register(job("Job1", "* * * * * *")).unwrap();
        assert_eq!(registry.get("Job1").unwrap().name, "Job1");
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.jobs().len(), 1);
        assert_eq!(registry.names(), vec!["Job1"]);
    }
}
