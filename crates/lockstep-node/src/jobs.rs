use std::sync::Arc;

use anyhow::{bail, Context};
use lockstep_core::config::{JobConfig, LockstepConfig, SchedulerConfig};
use lockstep_scheduler::{action_fn, JobAction, JobDefinition, JobRegistry, LockPolicy, Trigger};
use tracing::info;

/// Build the registry for every `[[jobs]]` entry. Fails on the first bad entry.
pub fn build_registry(config: &LockstepConfig) -> anyhow::Result<JobRegistry> {
    let registry = JobRegistry::with_lookback(config.scheduler.tick_interval);
    for job in &config.jobs {
        let definition = build_job(&config.scheduler, job)?;
        registry
            .register(definition)
            .with_context(|| format!("registering job '{}'", job.name))?;
    }
    Ok(registry)
}

pub fn build_job(defaults: &SchedulerConfig, job: &JobConfig) -> anyhow::Result<JobDefinition> {
    let trigger = match (&job.cron, job.every) {
        (Some(expr), None) => Trigger::cron(expr)?,
        (None, Some(every)) => Trigger::fixed_rate(every)?,
        (Some(_), Some(_)) => bail!("job '{}' sets both cron and every", job.name),
        (None, None) => bail!("job '{}' needs either cron or every", job.name),
    };
    let durations = defaults.lock_durations_for(job);
    let policy = LockPolicy::new(durations.at_least_for, durations.at_most_for);
    Ok(JobDefinition::new(
        job.name.clone(),
        trigger,
        policy,
        log_message(&job.name, &job.message),
    ))
}

/// Built-in job body: log the configured line.
fn log_message(name: &str, message: &str) -> Arc<dyn JobAction> {
    let name: Arc<str> = Arc::from(name);
    let message: Arc<str> = Arc::from(message);
    action_fn(move || {
        let name = name.clone();
        let message = message.clone();
        async move {
            info!(job = %name, "{message}");
            anyhow::Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config(toml: &str) -> LockstepConfig {
        LockstepConfig::from_toml_str(toml).unwrap()
    }

    #[test]
    fn example_job_gets_its_own_lock_bounds() {
        let cfg = config(
            r#"
            [scheduler]
            default_lock_at_most_for = "PT30S"

            [[jobs]]
            name = "MyTaskScheduler"
            cron = "*/10 * * * * *"
            lock_at_least_for = "PT30S"
            lock_at_most_for = "PT1M"
            message = "My Scheduled Task"
            "#,
        );
        let job = build_job(&cfg.scheduler, &cfg.jobs[0]).unwrap();
        assert_eq!(job.name, "MyTaskScheduler");
        assert_eq!(job.lock.at_least_for, Duration::seconds(30));
        assert_eq!(job.lock.at_most_for, Duration::minutes(1));
        assert_eq!(job.trigger.to_string(), "cron(*/10 * * * * *)");
    }

    #[test]
    fn fixed_rate_job_uses_process_defaults() {
        let cfg = config(
            r#"
            [[jobs]]
            name = "sweep"
            every = "15s"
            "#,
        );
        let job = build_job(&cfg.scheduler, &cfg.jobs[0]).unwrap();
        assert_eq!(job.lock.at_least_for, Duration::zero());
        assert_eq!(job.lock.at_most_for, Duration::seconds(30));
        assert_eq!(job.trigger.to_string(), "every(15s)");
    }

    #[test]
    fn trigger_must_be_exactly_one_of_cron_or_every() {
        let cfg = config(
            r#"
            [[jobs]]
            name = "both"
            cron = "* * * * *"
            every = "1m"

            [[jobs]]
            name = "neither"
            "#,
        );
        assert!(build_job(&cfg.scheduler, &cfg.jobs[0]).is_err());
        assert!(build_job(&cfg.scheduler, &cfg.jobs[1]).is_err());
    }

    #[test]
    fn registry_rejects_duplicates_and_bad_policies() {
        let dup = config(
            r#"
            [[jobs]]
            name = "a"
            every = "1m"

            [[jobs]]
            name = "a"
            every = "2m"
            "#,
        );
        assert!(build_registry(&dup).is_err());

        let bad = config(
            r#"
            [[jobs]]
            name = "a"
            every = "1m"
            lock_at_least_for = "2m"
            lock_at_most_for = "1m"
            "#,
        );
        assert!(build_registry(&bad).is_err());
    }

    #[tokio::test]
    async fn built_in_action_succeeds() {
        let action = log_message("report", "scheduled task ran");
        assert!(action.run().await.is_ok());
    }
}
