//! Duration parsing for lock policies and config files.
//!
//! Two notations are accepted:
//!
//! | Notation   | Examples                 |
//! |------------|--------------------------|
//! | ISO-8601   | `PT30S`, `PT1M`, `P1DT2H` |
//! | humantime  | `30s`, `1m 30s`, `250ms` |
//!
//! Bare integers in config files are read as whole seconds.

use chrono::Duration;
use serde::{Deserialize, Deserializer, Serializer};

use crate::error::{CoreError, Result};

/// Parse a non-negative duration in ISO-8601 or humantime notation.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid(input, "empty duration"));
    }

    if trimmed.starts_with(['P', 'p']) {
        return parse_iso8601(trimmed).ok_or_else(|| invalid(input, "malformed ISO-8601 duration"));
    }

    let std = humantime::parse_duration(trimmed).map_err(|e| invalid(input, &e.to_string()))?;
    Duration::from_std(std).map_err(|e| invalid(input, &e.to_string()))
}

/// Render a duration in humantime notation (`1m 30s`). Negative values render as `0s`.
pub fn format_duration(duration: Duration) -> String {
    let std = duration.to_std().unwrap_or_default();
    humantime::format_duration(std).to_string()
}

fn invalid(input: &str, reason: &str) -> CoreError {
    CoreError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

/// `P[nW][nD][T[nH][nM][n[.f]S]]`, fractions allowed on any component.
fn parse_iso8601(input: &str) -> Option<Duration> {
    let upper = input.to_ascii_uppercase();
    let rest = upper.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return None;
            }
            (date, Some(time))
        }
        None => (rest, None),
    };

    let mut millis = 0f64;
    let mut components = 0;

    for (value, unit) in components_of(date_part)? {
        millis += value
            * match unit {
                'W' => 7.0 * 86_400_000.0,
                'D' => 86_400_000.0,
                _ => return None,
            };
        components += 1;
    }
    if let Some(time) = time_part {
        for (value, unit) in components_of(time)? {
            millis += value
                * match unit {
                    'H' => 3_600_000.0,
                    'M' => 60_000.0,
                    'S' => 1_000.0,
                    _ => return None,
                };
            components += 1;
        }
    }

    if components == 0 || !millis.is_finite() || millis > i64::MAX as f64 {
        return None;
    }
    Some(Duration::milliseconds(millis.round() as i64))
}

/// Split `1H30M` into `[(1.0, 'H'), (30.0, 'M')]`.
fn components_of(part: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(if c == ',' { '.' } else { c });
        } else {
            if number.is_empty() {
                return None;
            }
            out.push((number.parse::<f64>().ok()?, c));
            number.clear();
        }
    }
    // trailing digits without a unit
    if !number.is_empty() {
        return None;
    }
    Some(out)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration> {
        match self {
            RawDuration::Seconds(secs) => i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .ok_or_else(|| invalid(&secs.to_string(), "out of range")),
            RawDuration::Text(text) => parse_duration(&text),
        }
    }
}

/// `#[serde(with = "lockstep_core::duration::serde_duration")]`
pub mod serde_duration {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        RawDuration::deserialize(d)?
            .into_duration()
            .map_err(serde::de::Error::custom)
    }
}

/// Same as [`serde_duration`] for optional fields.
pub mod serde_opt_duration {
    use super::*;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match duration {
            Some(d) => s.serialize_some(&format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<Duration>, D::Error> {
        Option::<RawDuration>::deserialize(d)?
            .map(RawDuration::into_duration)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
