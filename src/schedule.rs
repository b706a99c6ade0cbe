//! Schedule polymorphism — cron, fixed interval, and one-shot activations
//! behind a single `next(after)` contract.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use crate::cron::CronExpr;
use crate::error::{Error, Result};

/// Something that can say when a job is due next.
///
/// `None` means the schedule is terminal: no further activation, ever.
pub trait Schedule: Send + Sync {
    /// The first activation strictly after `after`.
    fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cron-driven schedule. Evaluates in UTC unless a timezone is attached.
#[derive(Clone, Debug)]
pub struct CronSchedule {
    expr: CronExpr,
    tz: Option<chrono_tz::Tz>,
}

impl CronSchedule {
    /// Parse a cron expression (see [`CronExpr::parse`] for the grammar).
    pub fn parse(expr: &str) -> Result<Self> {
        Ok(Self {
            expr: CronExpr::parse(expr)?,
            tz: None,
        })
    }

    /// Evaluate on the wall clock of `tz` instead of UTC.
    pub fn with_timezone(mut self, tz: chrono_tz::Tz) -> Self {
        self.tz = Some(tz);
        self
    }

    /// The expression as originally written.
    pub fn expression(&self) -> &str {
        self.expr.expression()
    }
}

impl Schedule for CronSchedule {
    fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.tz {
            Some(tz) => self.expr.next_after_tz(after, tz),
            None => self.expr.next_after_utc(after),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fires a fixed duration after the previous activation completes.
#[derive(Clone, Debug)]
pub struct IntervalSchedule {
    every: StdDuration,
}

impl IntervalSchedule {
    /// Fails with [`Error::InvalidInterval`] when `every` is zero.
    pub fn new(every: StdDuration) -> Result<Self> {
        if every.is_zero() {
            return Err(Error::InvalidInterval);
        }
        Ok(Self { every })
    }

    pub fn every(&self) -> StdDuration {
        self.every
    }
}

impl Schedule for IntervalSchedule {
    fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        after.checked_add_signed(Duration::from_std(self.every).ok()?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One-shot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fires exactly once at a target instant, then stays terminal.
#[derive(Clone, Debug)]
pub struct OneShotSchedule {
    at: DateTime<Utc>,
}

impl OneShotSchedule {
    /// Target = now + `delay`. Fails with [`Error::InvalidDelay`] when the
    /// delay is negative.
    pub fn after(delay: Duration) -> Result<Self> {
        if delay < Duration::zero() {
            return Err(Error::InvalidDelay);
        }
        let at = Utc::now().checked_add_signed(delay).ok_or(Error::InvalidDelay)?;
        Ok(Self { at })
    }

    /// Fire at an absolute instant. A target in the past is immediately
    /// terminal.
    pub fn at(at: DateTime<Utc>) -> Self {
        Self { at }
    }

    pub fn target(&self) -> DateTime<Utc> {
        self.at
    }
}

impl Schedule for OneShotSchedule {
    fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (after < self.at).then_some(self.at)
    }
}
