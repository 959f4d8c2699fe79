use chrono::Duration;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::duration::{serde_duration, serde_opt_duration};
use crate::error::{CoreError, Result};

pub const DEFAULT_TICK_INTERVAL_MS: i64 = 1_000;
/// Process-wide ceiling for a lease when a job does not name its own.
pub const DEFAULT_LOCK_AT_MOST_FOR_SECS: i64 = 30;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: i64 = 10;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Top-level config (lockstep.toml + LOCKSTEP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockstepConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Value written to `locks.locked_by`. Generated per process when unset.
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// SQLite busy timeout; contending nodes wait this long for the write lock.
    #[serde(default = "default_busy_timeout", with = "serde_duration")]
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval", with = "serde_duration")]
    pub tick_interval: Duration,
    #[serde(default, with = "serde_duration")]
    pub default_lock_at_least_for: Duration,
    #[serde(default = "default_lock_at_most_for", with = "serde_duration")]
    pub default_lock_at_most_for: Duration,
    /// How long `stop` waits for in-flight jobs before giving up on them.
    #[serde(default = "default_shutdown_grace", with = "serde_duration")]
    pub shutdown_grace: Duration,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            default_lock_at_least_for: Duration::zero(),
            default_lock_at_most_for: default_lock_at_most_for(),
            shutdown_grace: default_shutdown_grace(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Lease bounds after applying process defaults to a job entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDurations {
    pub at_least_for: Duration,
    pub at_most_for: Duration,
}

impl SchedulerConfig {
    /// A job's own value always wins over the process default.
    pub fn lock_durations_for(&self, job: &JobConfig) -> LockDurations {
        LockDurations {
            at_least_for: job
                .lock_at_least_for
                .unwrap_or(self.default_lock_at_least_for),
            at_most_for: job.lock_at_most_for.unwrap_or(self.default_lock_at_most_for),
        }
    }
}

/// One `[[jobs]]` entry. Exactly one of `cron` / `every` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default, with = "serde_opt_duration")]
    pub every: Option<Duration>,
    #[serde(default, with = "serde_opt_duration")]
    pub lock_at_least_for: Option<Duration>,
    #[serde(default, with = "serde_opt_duration")]
    pub lock_at_most_for: Option<Duration>,
    /// Line logged by the built-in action each time the job runs.
    #[serde(default = "default_message")]
    pub message: String,
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lockstep/lockstep.db", home)
}
fn default_busy_timeout() -> Duration {
    Duration::seconds(5)
}
fn default_tick_interval() -> Duration {
    Duration::milliseconds(DEFAULT_TICK_INTERVAL_MS)
}
fn default_lock_at_most_for() -> Duration {
    Duration::seconds(DEFAULT_LOCK_AT_MOST_FOR_SECS)
}
fn default_shutdown_grace() -> Duration {
    Duration::seconds(DEFAULT_SHUTDOWN_GRACE_SECS)
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}
fn default_message() -> String {
    "scheduled task ran".to_string()
}

impl LockstepConfig {
    /// Load config from a TOML file with LOCKSTEP_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `LOCKSTEP_SCHEDULER__TICK_INTERVAL=2s`. A missing file is not an error;
    /// every section has defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LOCKSTEP_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lockstep/lockstep.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = LockstepConfig::from_toml_str("").unwrap();
        assert!(cfg.node.id.is_none());
        assert!(cfg.jobs.is_empty());
        assert_eq!(cfg.scheduler.tick_interval, Duration::seconds(1));
        assert_eq!(cfg.scheduler.default_lock_at_most_for, Duration::seconds(30));
        assert_eq!(cfg.scheduler.default_lock_at_least_for, Duration::zero());
        assert_eq!(cfg.database.busy_timeout, Duration::seconds(5));
    }

    #[test]
    fn job_override_wins_over_process_default() {
        let cfg = LockstepConfig::from_toml_str(
            r#"
            [scheduler]
            default_lock_at_most_for = "PT30S"

            [[jobs]]
            name = "MyTaskScheduler"
            cron = "*/10 * * * * *"
            lock_at_least_for = "PT30S"
            lock_at_most_for = "PT1M"
            "#,
        )
        .unwrap();

        let job = &cfg.jobs[0];
        let durations = cfg.scheduler.lock_durations_for(job);
        assert_eq!(durations.at_least_for, Duration::seconds(30));
        assert_eq!(durations.at_most_for, Duration::minutes(1));
    }

    #[test]
    fn job_without_override_inherits_defaults() {
        let cfg = LockstepConfig::from_toml_str(
            r#"
            [scheduler]
            default_lock_at_most_for = 45

            [[jobs]]
            name = "report"
            every = "5m"
            "#,
        )
        .unwrap();

        let durations = cfg.scheduler.lock_durations_for(&cfg.jobs[0]);
        assert_eq!(durations.at_most_for, Duration::seconds(45));
        assert_eq!(durations.at_least_for, Duration::zero());
        assert_eq!(cfg.jobs[0].every, Some(Duration::minutes(5)));
        assert_eq!(cfg.jobs[0].message, "scheduled task ran");
    }

    #[test]
    fn bad_duration_is_config_error() {
        let err = LockstepConfig::from_toml_str(
            r#"
            [scheduler]
            tick_interval = "whenever"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
