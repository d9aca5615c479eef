// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recurrence-rule schedules (iCalendar RRULE subset)
//!
//! Recognized parts: FREQ, INTERVAL, BYMINUTE, BYHOUR, BYDAY (plain weekday
//! codes), BYMONTH, BYMONTHDAY, BYSETPOS, UNTIL. COUNT is rejected.
//! Positional components finer than the frequency that carry no BY-rule are
//! pinned by the job-name hash, so `FREQ=DAILY` runs at a stable
//! hour:minute:second per job rather than at midnight.

use super::hash::{fold, job_hash};
use super::{ScheduleError, Timezone};
use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday,
};
use std::collections::{BTreeSet, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freq {
    Yearly,
    Monthly,
    Weekly,
    Daily,
    Hourly,
    Minutely,
}

#[derive(Clone, Debug, PartialEq)]
enum Until {
    /// `UNTIL=...Z`: a fixed UTC instant
    Utc(DateTime<Utc>),
    /// Floating time, interpreted in the job's timezone at evaluation
    Floating(NaiveDateTime),
}

/// A parsed recurrence rule bound to a job name
#[derive(Clone, Debug)]
pub struct RruleExpr {
    source: String,
    hash: u64,
    freq: Freq,
    interval: u32,
    by_minute: BTreeSet<u32>,
    by_hour: BTreeSet<u32>,
    by_day: HashSet<Weekday>,
    by_month: BTreeSet<u32>,
    by_month_day: BTreeSet<u32>,
    by_setpos: Vec<i32>,
    until: Option<Until>,
}

impl RruleExpr {
    pub fn parse(expr: &str, job_name: &str) -> Result<Self, ScheduleError> {
        let body = expr.trim().trim_start_matches("RRULE:");

        let mut freq = None;
        let mut interval = 1u32;
        let mut by_minute = BTreeSet::new();
        let mut by_hour = BTreeSet::new();
        let mut by_day = HashSet::new();
        let mut by_month = BTreeSet::new();
        let mut by_month_day = BTreeSet::new();
        let mut by_setpos = Vec::new();
        let mut until = None;

        for part in body.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ScheduleError::RrulePart(part.to_string()))?;
            let invalid = || ScheduleError::RrulePart(part.to_string());

            match key.to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match value.to_ascii_uppercase().as_str() {
                        "YEARLY" => Freq::Yearly,
                        "MONTHLY" => Freq::Monthly,
                        "WEEKLY" => Freq::Weekly,
                        "DAILY" => Freq::Daily,
                        "HOURLY" => Freq::Hourly,
                        "MINUTELY" => Freq::Minutely,
                        _ => return Err(invalid()),
                    });
                }
                "INTERVAL" => {
                    interval = value.parse::<u32>().ok().filter(|n| *n >= 1).ok_or_else(invalid)?;
                }
                "BYMINUTE" => by_minute = parse_numbers(value, 0, 59).ok_or_else(invalid)?,
                "BYHOUR" => by_hour = parse_numbers(value, 0, 23).ok_or_else(invalid)?,
                "BYMONTH" => by_month = parse_numbers(value, 1, 12).ok_or_else(invalid)?,
                "BYMONTHDAY" => by_month_day = parse_numbers(value, 1, 31).ok_or_else(invalid)?,
                "BYDAY" => {
                    for code in value.split(',') {
                        by_day.insert(parse_weekday(code).ok_or_else(invalid)?);
                    }
                }
                "BYSETPOS" => {
                    for n in value.split(',') {
                        let pos = n.parse::<i32>().ok().filter(|p| *p != 0 && p.unsigned_abs() <= 366)
                            .ok_or_else(invalid)?;
                        by_setpos.push(pos);
                    }
                }
                "UNTIL" => until = Some(parse_until(value)?),
                "COUNT" => return Err(ScheduleError::CountUnsupported),
                _ => return Err(invalid()),
            }
        }

        Ok(Self {
            source: expr.to_string(),
            hash: job_hash(job_name),
            freq: freq.ok_or_else(|| ScheduleError::RrulePart("FREQ".to_string()))?,
            interval,
            by_minute,
            by_hour,
            by_day,
            by_month,
            by_month_day,
            by_setpos,
            until,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The smallest instant strictly after `after`, or `None` once the rule
    /// has terminated (past UNTIL) or no candidate exists within a
    /// four-year horizon.
    pub fn next_fire(&self, after: DateTime<Utc>, tz: &Timezone) -> Option<DateTime<Utc>> {
        let n_after = tz.to_naive(after);
        let until = self.until.as_ref().map(|u| match u {
            Until::Utc(instant) => tz.to_naive(*instant),
            Until::Floating(naive) => *naive,
        });

        let horizon = n_after + Duration::days(4 * 366);
        let mut period = self.period_containing(n_after);
        while period <= horizon {
            if let Some(limit) = until {
                if period > limit {
                    return None;
                }
            }

            let mut candidates = self.expand_period(period);
            candidates.sort();
            let candidates = self.apply_setpos(candidates);

            for candidate in candidates {
                if candidate <= n_after {
                    continue;
                }
                if let Some(limit) = until {
                    if candidate > limit {
                        return None;
                    }
                }
                if let Some(utc) = tz.resolve(candidate) {
                    return Some(utc);
                }
            }

            period = self.advance(period);
        }
        None
    }

    /// Start of the period containing `t`, aligned so INTERVAL phases are
    /// stable across evaluations (anchored to the epoch, not to "now").
    fn period_containing(&self, t: NaiveDateTime) -> NaiveDateTime {
        let interval = i64::from(self.interval);
        match self.freq {
            Freq::Minutely => {
                let total = i64::from(t.hour()) * 60 + i64::from(t.minute())
                    + i64::from(t.date().num_days_from_ce()) * 24 * 60;
                truncate_minute(t) - Duration::minutes(total.rem_euclid(interval))
            }
            Freq::Hourly => {
                let total = i64::from(t.hour()) + i64::from(t.date().num_days_from_ce()) * 24;
                truncate_hour(t) - Duration::hours(total.rem_euclid(interval))
            }
            Freq::Daily => {
                let days = i64::from(t.date().num_days_from_ce());
                midnight(t.date()) - Duration::days(days.rem_euclid(interval))
            }
            Freq::Weekly => {
                let monday = t.date()
                    - Duration::days(i64::from(t.date().weekday().num_days_from_monday()));
                let weeks = i64::from(monday.num_days_from_ce()).div_euclid(7);
                midnight(monday) - Duration::weeks(weeks.rem_euclid(interval))
            }
            Freq::Monthly => {
                let months = i64::from(t.date().year()) * 12 + i64::from(t.date().month0());
                let aligned = months - months.rem_euclid(interval);
                midnight(ymd(aligned.div_euclid(12) as i32, (aligned.rem_euclid(12) + 1) as u32, 1))
            }
            Freq::Yearly => {
                let year = i64::from(t.date().year());
                let aligned = year - year.rem_euclid(interval);
                midnight(ymd(aligned as i32, 1, 1))
            }
        }
    }

    fn advance(&self, period: NaiveDateTime) -> NaiveDateTime {
        let interval = i64::from(self.interval);
        match self.freq {
            Freq::Minutely => period + Duration::minutes(interval),
            Freq::Hourly => period + Duration::hours(interval),
            Freq::Daily => period + Duration::days(interval),
            Freq::Weekly => period + Duration::weeks(interval),
            Freq::Monthly => {
                let months =
                    i64::from(period.date().year()) * 12 + i64::from(period.date().month0())
                        + interval;
                midnight(ymd(months.div_euclid(12) as i32, (months.rem_euclid(12) + 1) as u32, 1))
            }
            Freq::Yearly => midnight(ymd(period.date().year() + self.interval as i32, 1, 1)),
        }
    }

    /// All candidate instants inside one period, unordered.
    fn expand_period(&self, period: NaiveDateTime) -> Vec<NaiveDateTime> {
        let second = fold(self.hash, 5, 0, 59);
        let mut out = Vec::new();

        match self.freq {
            Freq::Minutely => {
                // BYHOUR / BYMINUTE limit the period rather than expand it
                if !self.by_hour.is_empty() && !self.by_hour.contains(&period.hour()) {
                    return out;
                }
                if !self.by_minute.is_empty() && !self.by_minute.contains(&period.minute()) {
                    return out;
                }
                if self.date_allowed(period.date()) {
                    out.push(at(period.date(), period.hour(), period.minute(), second));
                }
            }
            Freq::Hourly => {
                if !self.by_hour.is_empty() && !self.by_hour.contains(&period.hour()) {
                    return out;
                }
                if self.date_allowed(period.date()) {
                    for minute in self.minutes() {
                        out.push(at(period.date(), period.hour(), minute, second));
                    }
                }
            }
            Freq::Daily => {
                if self.date_allowed(period.date()) {
                    self.push_times(&mut out, period.date(), second);
                }
            }
            Freq::Weekly => {
                let wanted = self.weekdays_or_hashed();
                for offset in 0..7 {
                    let date = period.date() + Duration::days(offset);
                    if wanted.contains(&date.weekday())
                        && self.month_allowed(date)
                        && self.month_day_allowed(date)
                    {
                        self.push_times(&mut out, date, second);
                    }
                }
            }
            Freq::Monthly => {
                for date in self.days_in_month(period.date().year(), period.date().month()) {
                    self.push_times(&mut out, date, second);
                }
            }
            Freq::Yearly => {
                let months: Vec<u32> = if self.by_month.is_empty() {
                    vec![fold(self.hash, 3, 1, 12)]
                } else {
                    self.by_month.iter().copied().collect()
                };
                for month in months {
                    for date in self.days_in_month(period.date().year(), month) {
                        self.push_times(&mut out, date, second);
                    }
                }
            }
        }
        out
    }

    /// Days of one month passing the BYMONTHDAY / BYDAY filters, with the
    /// hashed fallback when neither is given. Used by MONTHLY and YEARLY.
    fn days_in_month(&self, year: i32, month: u32) -> Vec<NaiveDate> {
        if !self.by_month.is_empty() && !self.by_month.contains(&month) {
            return Vec::new();
        }
        let mut days = Vec::new();
        if self.by_month_day.is_empty() && self.by_day.is_empty() {
            // Hash into 1-28 so the pinned day exists in every month
            let day = fold(self.hash, 2, 1, 28);
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                days.push(date);
            }
            return days;
        }
        for day in 1..=31 {
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                break;
            };
            if !self.by_month_day.is_empty() && !self.by_month_day.contains(&day) {
                continue;
            }
            if !self.by_day.is_empty() && !self.by_day.contains(&date.weekday()) {
                continue;
            }
            days.push(date);
        }
        days
    }

    fn push_times(&self, out: &mut Vec<NaiveDateTime>, date: NaiveDate, second: u32) {
        for hour in self.hours() {
            for minute in self.minutes() {
                out.push(at(date, hour, minute, second));
            }
        }
    }

    fn hours(&self) -> Vec<u32> {
        if self.by_hour.is_empty() {
            vec![fold(self.hash, 1, 0, 23)]
        } else {
            self.by_hour.iter().copied().collect()
        }
    }

    fn minutes(&self) -> Vec<u32> {
        if self.by_minute.is_empty() {
            vec![fold(self.hash, 0, 0, 59)]
        } else {
            self.by_minute.iter().copied().collect()
        }
    }

    fn weekdays_or_hashed(&self) -> HashSet<Weekday> {
        if self.by_day.is_empty() {
            let mut set = HashSet::new();
            set.insert(weekday_from_sunday_index(fold(self.hash, 4, 0, 6)));
            set
        } else {
            self.by_day.clone()
        }
    }

    fn month_allowed(&self, date: NaiveDate) -> bool {
        self.by_month.is_empty() || self.by_month.contains(&date.month())
    }

    fn month_day_allowed(&self, date: NaiveDate) -> bool {
        self.by_month_day.is_empty() || self.by_month_day.contains(&date.day())
    }

    /// Date filters shared by the sub-daily frequencies.
    fn date_allowed(&self, date: NaiveDate) -> bool {
        self.month_allowed(date)
            && self.month_day_allowed(date)
            && (self.by_day.is_empty() || self.by_day.contains(&date.weekday()))
    }

    /// BYSETPOS selects 1-based positions (negative from the end) out of the
    /// period's sorted candidate set.
    fn apply_setpos(&self, candidates: Vec<NaiveDateTime>) -> Vec<NaiveDateTime> {
        if self.by_setpos.is_empty() {
            return candidates;
        }
        let len = candidates.len() as i32;
        let mut selected: Vec<NaiveDateTime> = self
            .by_setpos
            .iter()
            .filter_map(|&pos| {
                let idx = if pos > 0 { pos - 1 } else { len + pos };
                (0..len).contains(&idx).then(|| candidates[idx as usize])
            })
            .collect();
        selected.sort();
        selected.dedup();
        selected
    }
}

fn parse_numbers(value: &str, lo: u32, hi: u32) -> Option<BTreeSet<u32>> {
    let mut out = BTreeSet::new();
    for part in value.split(',') {
        let n = part.parse::<u32>().ok()?;
        if n < lo || n > hi {
            return None;
        }
        out.insert(n);
    }
    Some(out)
}

fn parse_weekday(code: &str) -> Option<Weekday> {
    match code.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_from_sunday_index(idx: u32) -> Weekday {
    match idx {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        _ => Weekday::Sat,
    }
}

fn parse_until(value: &str) -> Result<Until, ScheduleError> {
    let err = || ScheduleError::Until(value.to_string());

    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(Until::Utc(instant.with_timezone(&Utc)));
    }
    if let Some(stripped) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").map_err(|_| err())?;
        return Ok(Until::Utc(naive.and_utc()));
    }
    if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| err())?;
        return Ok(Until::Floating(midnight(date)));
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map(Until::Floating)
        .map_err(|_| err())
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).expect("midnight is valid")
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("calendar date is valid")
}

fn at(date: NaiveDate, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(hour, minute, second).expect("time fields in range"))
}

fn truncate_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .expect("truncation is valid")
}

fn truncate_hour(t: NaiveDateTime) -> NaiveDateTime {
    truncate_minute(t).with_minute(0).expect("truncation is valid")
}

#[cfg(test)]
#[path = "rrule_tests.rs"]
mod tests;
