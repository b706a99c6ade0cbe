//! Cron expression evaluator (5-field: min hour dom month dow, plus macros).
//!
//! Expressions parse into five sorted, de-duplicated value sets. `next_after`
//! finds the first matching minute strictly after a reference time with a
//! field-ordered advance — mismatched months jump to the first of the next
//! month, mismatched days to the next midnight, and so on — so sparse
//! combinations (Feb 29, weekday-constrained dates) resolve without scanning
//! every minute in between.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};

use crate::error::{Error, Result};

/// Search horizon for `next_after`. Rare combinations (a leap day on a
/// specific weekday) can sit years out; anything past this is "never".
const MAX_DAYS_AHEAD: i64 = 4 * 366;

const MACROS: &[(&str, &str)] = &[
    ("@yearly", "0 0 1 1 *"),
    ("@annually", "0 0 1 1 *"),
    ("@monthly", "0 0 1 * *"),
    ("@weekly", "0 0 * * 0"),
    ("@daily", "0 0 * * *"),
    ("@midnight", "0 0 * * *"),
    ("@hourly", "0 * * * *"),
];

/// A parsed 5-field cron expression.
///
/// Day-of-month and day-of-week are AND-combined: a candidate day must
/// satisfy both fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronExpr {
    expr: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
}

impl CronExpr {
    /// Parse an expression: either a macro alias (`@daily`, `@hourly`, …,
    /// case-insensitive) or five whitespace-separated fields where each field
    /// is a comma list of `*`, `*/step`, `value`, `start-end`, or
    /// `start-end/step`.
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let fields: Vec<&str> = expand_macro(trimmed).split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::InvalidExpression(format!(
                "expected 5 fields (minute hour day-of-month month day-of-week), got {}",
                fields.len()
            )));
        }
        Ok(Self {
            expr: trimmed.to_string(),
            minutes: parse_field(fields[0], "minute", 0, 59)?,
            hours: parse_field(fields[1], "hour", 0, 23)?,
            days_of_month: parse_field(fields[2], "day-of-month", 1, 31)?,
            months: parse_field(fields[3], "month", 1, 12)?,
            days_of_week: parse_field(fields[4], "day-of-week", 0, 6)?,
        })
    }

    /// The expression as originally written (for display).
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First matching minute strictly after `after`, in `after`'s calendar.
    /// Seconds and sub-seconds of `after` are discarded; the candidate starts
    /// at the next whole minute. `None` once the search horizon is exhausted.
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = truncate_to_minute(after) + Duration::minutes(1);
        let bound = after + Duration::days(MAX_DAYS_AHEAD);
        while t <= bound {
            if !self.months.contains(&t.month()) {
                t = first_of_next_month(t)?;
            } else if !self.days_of_month.contains(&t.day()) {
                t = midnight_of_next_day(t)?;
            } else if !self.days_of_week.contains(&t.weekday().num_days_from_sunday()) {
                t = midnight_of_next_day(t)?;
            } else if !self.hours.contains(&t.hour()) {
                t = top_of_next_hour(t)?;
            } else if !self.minutes.contains(&t.minute()) {
                t += Duration::minutes(1);
            } else {
                return Some(t);
            }
        }
        None
    }

    /// Whether `t` matches every field, at minute resolution.
    pub fn matches(&self, t: NaiveDateTime) -> bool {
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.days_of_month.contains(&t.day())
            && self.months.contains(&t.month())
            && self.days_of_week.contains(&t.weekday().num_days_from_sunday())
    }

    /// Next occurrence after a UTC instant, evaluated in UTC.
    pub fn next_after_utc(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_after(after.naive_utc())
            .map(|n| Utc.from_utc_datetime(&n))
    }

    /// Up to `n` upcoming occurrences after `after`, evaluated in UTC.
    /// Stops short once the schedule has no further activation.
    pub fn next_occurrences_utc(&self, after: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let mut results = Vec::with_capacity(n);
        let mut cursor = after;
        for _ in 0..n {
            match self.next_after_utc(cursor) {
                Some(next) => {
                    results.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        results
    }

    /// Next occurrence after `after`, evaluated on the wall clock of `tz`.
    /// Returns a UTC instant.
    ///
    /// **DST handling:**
    /// - Spring-forward gaps: local times that don't exist are skipped.
    /// - Fall-back overlaps: the earliest (pre-transition) mapping is chosen.
    pub fn next_after_tz(
        &self,
        after: DateTime<Utc>,
        tz: chrono_tz::Tz,
    ) -> Option<DateTime<Utc>> {
        let mut local = after.with_timezone(&tz).naive_local();
        loop {
            let candidate = self.next_after(local)?;
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                chrono::LocalResult::None => {
                    // DST gap — this local minute doesn't exist. Resume the
                    // search just past it.
                    local = candidate;
                }
            }
        }
    }
}

fn expand_macro(expr: &str) -> &str {
    for (alias, expansion) in MACROS {
        if expr.eq_ignore_ascii_case(alias) {
            return expansion;
        }
    }
    expr
}

fn invalid(field: &str, detail: impl std::fmt::Display) -> Error {
    Error::InvalidExpression(format!("{field}: {detail}"))
}

fn parse_field(field: &str, name: &str, min: u32, max: u32) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        expand_part(part, name, min, max, &mut values)?;
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn expand_part(part: &str, name: &str, min: u32, max: u32, out: &mut Vec<u32>) -> Result<()> {
    if part == "*" {
        out.extend(min..=max);
        return Ok(());
    }
    if let Some(step_s) = part.strip_prefix("*/") {
        let step = parse_step(step_s, name, part)?;
        out.extend((min..=max).step_by(step as usize));
        return Ok(());
    }
    let (range_s, step) = match part.split_once('/') {
        Some((range_s, step_s)) => (range_s, parse_step(step_s, name, part)?),
        None => (part, 1),
    };
    if let Some((start_s, end_s)) = range_s.split_once('-') {
        let start = parse_value(start_s, name, min, max)?;
        let end = parse_value(end_s, name, min, max)?;
        if start > end {
            return Err(invalid(name, format!("range start {start} is after end {end}")));
        }
        out.extend((start..=end).step_by(step as usize));
    } else {
        if step != 1 {
            return Err(invalid(name, format!("step requires a range in '{part}'")));
        }
        out.push(parse_value(range_s, name, min, max)?);
    }
    Ok(())
}

fn parse_step(s: &str, name: &str, part: &str) -> Result<u32> {
    let step: u32 = s
        .parse()
        .map_err(|_| invalid(name, format!("invalid step in '{part}'")))?;
    if step == 0 {
        return Err(invalid(name, format!("step must be at least 1 in '{part}'")));
    }
    Ok(step)
}

fn parse_value(s: &str, name: &str, min: u32, max: u32) -> Result<u32> {
    let value: u32 = s
        .parse()
        .map_err(|_| invalid(name, format!("invalid value '{s}'")))?;
    if value < min || value > max {
        return Err(invalid(name, format!("value {value} out of range {min}..={max}")));
    }
    Ok(value)
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_time(NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(NaiveTime::MIN))
}

fn midnight_of_next_day(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().succ_opt().map(|d| d.and_time(NaiveTime::MIN))
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).map(|d| d.and_time(NaiveTime::MIN))
}

fn top_of_next_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.with_minute(0).map(|t| t + Duration::hours(1))
}
