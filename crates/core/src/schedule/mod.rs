// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schedule expression engine
//!
//! Two expression families share one `next_fire` contract: cron lines with
//! Jenkins-style `H`/`R` tokens, and a subset of the iCalendar recurrence
//! rule grammar. Both are evaluated in the job's configured timezone and
//! yield the smallest instant strictly after a given point, or `None` once
//! the schedule has terminated.

mod cron;
mod hash;
mod rrule;

pub use cron::CronExpr;
pub use hash::{fold, job_hash};
pub use rrule::RruleExpr;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone as _, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing a schedule expression or timezone
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("empty schedule expression")]
    Empty,
    #[error("expected 5 or 6 cron fields, found {0}")]
    FieldCount(usize),
    #[error("invalid token {token:?} in cron {field} field")]
    Token { field: &'static str, token: String },
    #[error("value {value} out of range {lo}-{hi} in cron {field} field")]
    Range {
        field: &'static str,
        value: u32,
        lo: u32,
        hi: u32,
    },
    #[error("invalid recurrence rule part {0:?}")]
    RrulePart(String),
    #[error("COUNT is not supported in recurrence rules")]
    CountUnsupported,
    #[error("invalid UNTIL value {0:?}")]
    Until(String),
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
}

/// The timezone a schedule is evaluated in
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Timezone {
    /// The daemon's local zone
    #[default]
    Local,
    /// A named IANA zone
    Named(chrono_tz::Tz),
}

impl FromStr for Timezone {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        chrono_tz::Tz::from_str(s)
            .map(Timezone::Named)
            .map_err(|_| ScheduleError::UnknownTimezone(s.to_string()))
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timezone::Local => write!(f, "local"),
            Timezone::Named(tz) => write!(f, "{}", tz),
        }
    }
}

impl Timezone {
    /// Project a UTC instant into this zone's wall-clock time.
    pub(crate) fn to_naive(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Timezone::Local => at.with_timezone(&chrono::Local).naive_local(),
            Timezone::Named(tz) => at.with_timezone(tz).naive_local(),
        }
    }

    /// Map a wall-clock time back to a UTC instant.
    ///
    /// Ambiguous times (DST fall-back) take the earlier offset. Nonexistent
    /// times (DST spring-forward) roll forward minute by minute to the first
    /// valid instant.
    pub(crate) fn resolve(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        let mut candidate = naive;
        // DST gaps are at most a few hours
        for _ in 0..240 {
            let result = match self {
                Timezone::Local => match chrono::Local.from_local_datetime(&candidate) {
                    LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
                    LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                    LocalResult::None => None,
                },
                Timezone::Named(tz) => match tz.from_local_datetime(&candidate) {
                    LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
                    LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                    LocalResult::None => None,
                },
            };
            if result.is_some() {
                return result;
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// A parsed schedule expression bound to a job name
#[derive(Clone, Debug)]
pub enum ScheduleExpr {
    Cron(CronExpr),
    Rrule(RruleExpr),
}

impl ScheduleExpr {
    /// Parse a schedule expression.
    ///
    /// Expressions carrying `FREQ=` (optionally behind an `RRULE:` prefix)
    /// parse as recurrence rules; everything else parses as cron. The job
    /// name seeds the deterministic `H` hash.
    pub fn parse(expr: &str, job_name: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::Empty);
        }
        if trimmed.starts_with("RRULE:") || trimmed.contains("FREQ=") {
            Ok(ScheduleExpr::Rrule(RruleExpr::parse(trimmed, job_name)?))
        } else {
            Ok(ScheduleExpr::Cron(CronExpr::parse(trimmed, job_name)?))
        }
    }

    /// The smallest instant strictly after `after` satisfying the schedule,
    /// or `None` if the schedule has terminated.
    pub fn next_fire(&self, after: DateTime<Utc>, tz: &Timezone) -> Option<DateTime<Utc>> {
        match self {
            ScheduleExpr::Cron(cron) => cron.next_fire(after, tz),
            ScheduleExpr::Rrule(rrule) => rrule.next_fire(after, tz),
        }
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        match self {
            ScheduleExpr::Cron(cron) => cron.source(),
            ScheduleExpr::Rrule(rrule) => rrule.source(),
        }
    }
}

impl fmt::Display for ScheduleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
