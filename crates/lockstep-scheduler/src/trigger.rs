use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};

/// When a job fires.
#[derive(Clone)]
pub enum Trigger {
    /// Cron expression evaluated in UTC.
    Cron {
        expression: String,
        schedule: cron::Schedule,
    },

    /// Every `every`, at instants that are whole multiples of it since the
    /// Unix epoch. Every node computes the same instants without coordination.
    FixedRate { every: Duration },
}

impl Trigger {
    /// Parse a cron expression.
    ///
    /// Standard 5-field Unix expressions run at second 0; 6- and 7-field
    /// expressions carry their own seconds (and year) fields, e.g.
    /// `*/10 * * * * *` fires every ten seconds.
    pub fn cron(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "cron expression '{trimmed}' has {n} fields, expected 5, 6 or 7"
                )))
            }
        };
        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::InvalidTrigger(format!("'{trimmed}': {e}")))?;
        Ok(Trigger::Cron {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn fixed_rate(every: Duration) -> Result<Self> {
        if every < Duration::milliseconds(1) {
            return Err(SchedulerError::InvalidTrigger(
                "fixed rate must be at least 1ms".to_string(),
            ));
        }
        Ok(Trigger::FixedRate { every })
    }

    /// The first fire instant strictly after `after`, if any.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron { schedule, .. } => schedule.after(&after).next(),
            Trigger::FixedRate { every } => {
                let period = every.num_milliseconds();
                let next = after
                    .timestamp_millis()
                    .div_euclid(period)
                    .checked_add(1)?
                    .checked_mul(period)?;
                DateTime::from_timestamp_millis(next)
            }
        }
    }

    /// Whether some fire instant lies in `(after, until]`.
    pub fn fires_within(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.next_after(after).is_some_and(|t| t <= until)
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron { expression, .. } => f.debug_tuple("Cron").field(expression).finish(),
            Trigger::FixedRate { every } => f.debug_tuple("FixedRate").field(every).finish(),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron { expression, .. } => write!(f, "cron({expression})"),
            Trigger::FixedRate { every } => write!(
                f,
                "every({})",
                lockstep_core::duration::format_duration(*every)
            ),
        }
    }
}
