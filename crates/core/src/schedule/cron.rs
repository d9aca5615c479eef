// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron expressions with Jenkins-style `H` and `R` tokens
//!
//! Five required fields (minute, hour, day-of-month, month, day-of-week)
//! plus an optional sixth second field. An omitted second field defaults to
//! `H` so jobs spread within the minute instead of stampeding at :00.

use super::hash::{fold, job_hash};
use super::{ScheduleError, Timezone};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use rand::Rng;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// (name, parse domain) per field, in source order
const FIELDS: [(&str, u32, u32); 6] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day-of-month", 1, 31),
    ("month", 1, 12),
    ("day-of-week", 0, 7),
    ("second", 0, 59),
];

/// Hash domain per field; day-of-week hashes into 0-6 even though 7 parses.
const HASH_DOMAINS: [(u32, u32); 6] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6), (0, 59)];

const FIELD_MINUTE: usize = 0;
const FIELD_HOUR: usize = 1;
const FIELD_DOM: usize = 2;
const FIELD_MONTH: usize = 3;
const FIELD_DOW: usize = 4;
const FIELD_SECOND: usize = 5;

static HASH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(H|R)(?:\((\d+)-(\d+)\))?(?:/(\d+))?$").expect("static regex")
});
static RANGE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]+)-([A-Za-z0-9]+)(?:/(\d+))?$").expect("static regex")
});
static ALL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*(?:/(\d+))?$").expect("static regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HashKind {
    /// `H`: stable per job name
    Stable,
    /// `R`: redrawn on every evaluation
    Random,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    All { step: u32 },
    Exact(u32),
    Range { lo: u32, hi: u32, step: u32 },
    Hash { kind: HashKind, range: Option<(u32, u32)>, step: Option<u32> },
}

#[derive(Clone, Debug)]
struct Field {
    tokens: Vec<Token>,
    /// False only for a bare `*`; drives the day-of-month/day-of-week
    /// either-matches rule.
    restricted: bool,
}

/// A parsed cron expression bound to a job name
#[derive(Clone, Debug)]
pub struct CronExpr {
    source: String,
    hash: u64,
    fields: [Field; 6],
}

impl CronExpr {
    pub fn parse(expr: &str, job_name: &str) -> Result<Self, ScheduleError> {
        let expanded = expand_alias(expr);
        let mut tokens: Vec<&str> = expanded.split_whitespace().collect();
        match tokens.len() {
            // Omitted second field hashes within the minute
            5 => tokens.push("H"),
            6 => {}
            n => return Err(ScheduleError::FieldCount(n)),
        }

        let mut fields = Vec::with_capacity(6);
        for (idx, token) in tokens.iter().enumerate() {
            fields.push(parse_field(token, idx)?);
        }
        let fields: [Field; 6] = fields.try_into().expect("six fields");

        Ok(Self {
            source: expr.to_string(),
            hash: job_hash(job_name),
            fields,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolve the field at `idx` to a concrete value set.
    ///
    /// `H` tokens are folded deterministically from the job hash; `R`
    /// tokens are redrawn on every call.
    fn resolve_field(&self, idx: usize) -> BTreeSet<u32> {
        let (_, lo, hi) = FIELDS[idx];
        let (hash_lo, hash_hi) = HASH_DOMAINS[idx];
        let mut values = BTreeSet::new();

        for token in &self.fields[idx].tokens {
            match token {
                Token::All { step } => {
                    values.extend((lo..=hi).step_by(*step as usize));
                }
                Token::Exact(v) => {
                    values.insert(*v);
                }
                Token::Range { lo, hi, step } => {
                    values.extend((*lo..=*hi).step_by(*step as usize));
                }
                Token::Hash { kind, range, step } => {
                    let (a, b) = range.unwrap_or((hash_lo, hash_hi));
                    match step {
                        None => {
                            values.insert(self.pick(*kind, idx, a, b));
                        }
                        Some(n) => {
                            let start = self.pick(*kind, idx, a, (a + n - 1).min(b));
                            values.extend((start..=b).step_by(*n as usize));
                        }
                    }
                }
            }
        }

        if idx == FIELD_DOW {
            // Both 0 and 7 denote Sunday
            if values.remove(&7) {
                values.insert(0);
            }
        }
        values
    }

    fn pick(&self, kind: HashKind, idx: usize, lo: u32, hi: u32) -> u32 {
        match kind {
            HashKind::Stable => fold(self.hash, idx, lo, hi),
            HashKind::Random => rand::thread_rng().gen_range(lo..=hi),
        }
    }

    /// The smallest instant strictly after `after` matching this expression
    /// in `tz`, or `None` when no match exists within a four-year horizon.
    pub fn next_fire(&self, after: DateTime<Utc>, tz: &Timezone) -> Option<DateTime<Utc>> {
        let minutes = self.resolve_field(FIELD_MINUTE);
        let hours = self.resolve_field(FIELD_HOUR);
        let doms = self.resolve_field(FIELD_DOM);
        let months = self.resolve_field(FIELD_MONTH);
        let dows = self.resolve_field(FIELD_DOW);
        let seconds = self.resolve_field(FIELD_SECOND);

        let dom_restricted = self.fields[FIELD_DOM].restricted;
        let dow_restricted = self.fields[FIELD_DOW].restricted;

        let mut t = second_after(tz.to_naive(after));
        let horizon = t + Duration::days(4 * 366);

        while t < horizon {
            if !months.contains(&t.month()) {
                t = start_of_next_month(t.date());
                continue;
            }
            if !day_matches(t.date(), &doms, &dows, dom_restricted, dow_restricted) {
                t = t
                    .date()
                    .succ_opt()?
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is valid");
                continue;
            }
            if !hours.contains(&t.hour()) {
                t = truncate_to_hour(t) + Duration::hours(1);
                continue;
            }
            if !minutes.contains(&t.minute()) {
                t = truncate_to_minute(t) + Duration::minutes(1);
                continue;
            }
            match seconds.range(t.second()..).next() {
                Some(&s) => {
                    let candidate = t.with_second(s).expect("second in range");
                    match tz.resolve(candidate) {
                        Some(utc) => return Some(utc),
                        // Candidate sits in a DST gap that resolve() could
                        // not escape; step past it
                        None => t = truncate_to_minute(t) + Duration::minutes(1),
                    }
                }
                None => t = truncate_to_minute(t) + Duration::minutes(1),
            }
        }
        None
    }
}

/// Truncate to whole seconds and advance by one, preserving strictness.
fn second_after(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).expect("zero nanosecond is valid") + Duration::seconds(1)
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .expect("truncation is valid")
}

fn truncate_to_hour(t: NaiveDateTime) -> NaiveDateTime {
    truncate_to_minute(t)
        .with_minute(0)
        .expect("truncation is valid")
}

fn start_of_next_month(date: NaiveDate) -> NaiveDateTime {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("first of month is valid")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
}

/// Day-of-month and day-of-week combine per cron convention: when both are
/// restricted a day matching either satisfies the schedule.
fn day_matches(
    date: NaiveDate,
    doms: &BTreeSet<u32>,
    dows: &BTreeSet<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
) -> bool {
    let dom_ok = doms.contains(&date.day());
    let dow_ok = dows.contains(&date.weekday().num_days_from_sunday());
    match (dom_restricted, dow_restricted) {
        (true, true) => dom_ok || dow_ok,
        (true, false) => dom_ok,
        (false, true) => dow_ok,
        (false, false) => true,
    }
}

/// Named aliases expand to hash-style patterns so every aliased job gets a
/// stable slot instead of firing at the top of the period.
fn expand_alias(expr: &str) -> String {
    match expr.trim() {
        "@hourly" => "H * * * * H",
        "@daily" => "H H * * * H",
        "@midnight" => "H H(0-2) * * * H",
        "@weekly" => "H H * * H H",
        "@monthly" => "H H H * * H",
        "@annually" | "@yearly" => "H H H H * H",
        other => other,
    }
    .to_string()
}

fn parse_field(source: &str, idx: usize) -> Result<Field, ScheduleError> {
    let (name, lo, hi) = FIELDS[idx];
    let mut tokens = Vec::new();
    let mut restricted = true;

    for part in source.split(',') {
        let token = parse_token(part, idx)?;
        if let Token::All { step: 1 } = token {
            restricted = false;
        }
        // Bounds check everything that carries explicit values
        match &token {
            Token::Exact(v) => check_range(name, *v, lo, hi)?,
            Token::Range { lo: a, hi: b, .. } => {
                check_range(name, *a, lo, hi)?;
                check_range(name, *b, lo, hi)?;
                if a > b {
                    return Err(ScheduleError::Token {
                        field: name,
                        token: part.to_string(),
                    });
                }
            }
            Token::Hash {
                range: Some((a, b)), ..
            } => {
                check_range(name, *a, lo, hi)?;
                check_range(name, *b, lo, hi)?;
                if a > b {
                    return Err(ScheduleError::Token {
                        field: name,
                        token: part.to_string(),
                    });
                }
            }
            _ => {}
        }
        tokens.push(token);
    }

    Ok(Field { tokens, restricted })
}

fn parse_token(part: &str, idx: usize) -> Result<Token, ScheduleError> {
    let (name, _, _) = FIELDS[idx];
    let invalid = || ScheduleError::Token {
        field: name,
        token: part.to_string(),
    };

    if let Some(caps) = ALL_TOKEN.captures(part) {
        let step = match caps.get(1) {
            Some(s) => s.as_str().parse::<u32>().map_err(|_| invalid())?,
            None => 1,
        };
        if step == 0 {
            return Err(invalid());
        }
        return Ok(Token::All { step });
    }

    if let Some(caps) = HASH_TOKEN.captures(part) {
        let kind = if caps[1].eq_ignore_ascii_case("H") {
            HashKind::Stable
        } else {
            HashKind::Random
        };
        let range = match (caps.get(2), caps.get(3)) {
            (Some(a), Some(b)) => Some((
                a.as_str().parse().map_err(|_| invalid())?,
                b.as_str().parse().map_err(|_| invalid())?,
            )),
            _ => None,
        };
        let step = match caps.get(4) {
            Some(s) => {
                let n = s.as_str().parse::<u32>().map_err(|_| invalid())?;
                if n == 0 {
                    return Err(invalid());
                }
                Some(n)
            }
            None => None,
        };
        return Ok(Token::Hash { kind, range, step });
    }

    if let Some(caps) = RANGE_TOKEN.captures(part) {
        let lo = parse_value(&caps[1], idx).ok_or_else(invalid)?;
        let hi = parse_value(&caps[2], idx).ok_or_else(invalid)?;
        let step = match caps.get(3) {
            Some(s) => {
                let n = s.as_str().parse::<u32>().map_err(|_| invalid())?;
                if n == 0 {
                    return Err(invalid());
                }
                n
            }
            None => 1,
        };
        return Ok(Token::Range { lo, hi, step });
    }

    parse_value(part, idx).map(Token::Exact).ok_or_else(invalid)
}

/// Numeric values plus month / weekday names.
fn parse_value(s: &str, idx: usize) -> Option<u32> {
    if let Ok(v) = s.parse::<u32>() {
        return Some(v);
    }
    let lower = s.to_ascii_lowercase();
    match idx {
        FIELD_MONTH => match lower.as_str() {
            "jan" => Some(1),
            "feb" => Some(2),
            "mar" => Some(3),
            "apr" => Some(4),
            "may" => Some(5),
            "jun" => Some(6),
            "jul" => Some(7),
            "aug" => Some(8),
            "sep" => Some(9),
            "oct" => Some(10),
            "nov" => Some(11),
            "dec" => Some(12),
            _ => None,
        },
        FIELD_DOW => match lower.as_str() {
            "sun" => Some(0),
            "mon" => Some(1),
            "tue" => Some(2),
            "wed" => Some(3),
            "thu" => Some(4),
            "fri" => Some(5),
            "sat" => Some(6),
            _ => None,
        },
        _ => None,
    }
}

fn check_range(field: &'static str, value: u32, lo: u32, hi: u32) -> Result<(), ScheduleError> {
    if value < lo || value > hi {
        return Err(ScheduleError::Range {
            field,
            value,
            lo,
            hi,
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
