//! Cron expression parser
//!
//! Supports standard 5-field cron syntax:
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12)
//! │ │ │ │ ┌───────────── day of week (0-7, 0 and 7 are both Sunday)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! Special characters:
//! - `*` - any value
//! - `,` - value list separator (e.g., `1,3,5`)
//! - `-` - range (e.g., `1-5`)
//! - `/` - step (e.g., `*/5` or `0-30/5`)
//!
//! Values outside a field's domain are dropped rather than rejected, so
//! `5,70 * * * *` fires at minute 5 only. A field left with no values at all
//! is an error. Weekday `7` folds into `0`. A wildcard weekday covers `0-6`.
//!
//! The macros `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
//! `@midnight` and `@hourly` expand to their 5-field equivalents.
//!
//! Day-of-month and day-of-week must both match (AND), like every other
//! field pair.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{EvaluationError, ParseError};

/// Upper bound on the minute-by-minute search: one leap year.
pub const SEARCH_HORIZON_MINUTES: i64 = 366 * 24 * 60;

/// One of the five positional cron fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronField {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl CronField {
    /// Fields in expression order
    pub const ALL: [CronField; 5] = [
        CronField::Minute,
        CronField::Hour,
        CronField::DayOfMonth,
        CronField::Month,
        CronField::DayOfWeek,
    ];

    /// Inclusive range of values accepted when written explicitly.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            CronField::Minute => (0, 59),
            CronField::Hour => (0, 23),
            CronField::DayOfMonth => (1, 31),
            CronField::Month => (1, 12),
            CronField::DayOfWeek => (0, 7),
        }
    }

    /// Range covered by `*`.
    fn wildcard(self) -> (u32, u32) {
        match self {
            CronField::DayOfWeek => (0, 6),
            other => other.bounds(),
        }
    }

    fn normalize(self, value: u32) -> u32 {
        match (self, value) {
            (CronField::DayOfWeek, 7) => 0,
            _ => value,
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CronField::Minute => "minute",
            CronField::Hour => "hour",
            CronField::DayOfMonth => "day-of-month",
            CronField::Month => "month",
            CronField::DayOfWeek => "day-of-week",
        };
        f.write_str(name)
    }
}

/// A parsed cron expression. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    /// Original expression string
    expression: String,
    /// Allowed minutes (0-59)
    minutes: BTreeSet<u32>,
    /// Allowed hours (0-23)
    hours: BTreeSet<u32>,
    /// Allowed days of month (1-31)
    days: BTreeSet<u32>,
    /// Allowed months (1-12)
    months: BTreeSet<u32>,
    /// Allowed days of week (0-6, 0=Sunday)
    weekdays: BTreeSet<u32>,
}

impl CronExpression {
    /// Parse a cron expression string
    ///
    /// # Examples
    ///
    /// ```
    /// use crondog::CronExpression;
    ///
    /// // Every 15 minutes
    /// let expr = CronExpression::parse("*/15 * * * *").unwrap();
    ///
    /// // Weekdays at 9 AM
    /// let expr = CronExpression::parse("0 9 * * 1-5").unwrap();
    ///
    /// // Out-of-domain values are dropped; an emptied field is an error
    /// assert!(CronExpression::parse("70 * * * *").is_err());
    /// ```
    pub fn parse(expression: &str) -> Result<Self, ParseError> {
        let trimmed = expression.trim();
        let expanded = expand_macro(trimmed)?;
        let parts: Vec<&str> = expanded.split_whitespace().collect();

        if parts.len() != 5 {
            return Err(ParseError::FieldCount(parts.len()));
        }

        Ok(Self {
            expression: trimmed.to_string(),
            minutes: parse_field(parts[0], CronField::Minute)?,
            hours: parse_field(parts[1], CronField::Hour)?,
            days: parse_field(parts[2], CronField::DayOfMonth)?,
            months: parse_field(parts[3], CronField::Month)?,
            weekdays: parse_field(parts[4], CronField::DayOfWeek)?,
        })
    }

    /// The expression as written
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Resolved value set of one field
    pub fn values(&self, field: CronField) -> &BTreeSet<u32> {
        match field {
            CronField::Minute => &self.minutes,
            CronField::Hour => &self.hours,
            CronField::DayOfMonth => &self.days,
            CronField::Month => &self.months,
            CronField::DayOfWeek => &self.weekdays,
        }
    }

    /// Earliest matching minute strictly after `reference`.
    ///
    /// `reference` is truncated to the minute first, and the search steps one
    /// minute at a time for at most [`SEARCH_HORIZON_MINUTES`].
    pub fn next_occurrence(
        &self,
        reference: NaiveDateTime,
    ) -> Result<NaiveDateTime, EvaluationError> {
        let mut current = truncate_to_minute(reference) + Duration::minutes(1);

        for _ in 0..SEARCH_HORIZON_MINUTES {
            if self.matches(&current) {
                return Ok(current);
            }
            current += Duration::minutes(1);
        }

        Err(EvaluationError::NoOccurrenceFound(self.expression.clone()))
    }

    /// Most recent occurrence in `(reference - lookback, reference]`, if any.
    pub fn last_occurrence_at_or_before(
        &self,
        reference: NaiveDateTime,
        lookback: Duration,
    ) -> Option<NaiveDateTime> {
        let mut cursor = reference - lookback;
        let mut last = None;

        // A failed search means nothing matches for a year past `cursor`,
        // which covers the rest of the window.
        while let Ok(next) = self.next_occurrence(cursor) {
            if next > reference {
                break;
            }
            last = Some(next);
            cursor = next;
        }

        last
    }

    /// Check if a timestamp matches this cron expression (seconds ignored)
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.days.contains(&dt.day())
            && self.months.contains(&dt.month())
            && self
                .weekdays
                .contains(&dt.weekday().num_days_from_sunday())
    }

    /// Get a human-readable description of the schedule
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();

        match (self.minutes.len(), self.minutes.first()) {
            (60, _) => parts.push("every minute".to_string()),
            (1, Some(0)) => parts.push("at the start of the hour".to_string()),
            (1, Some(min)) => parts.push(format!("at minute {min}")),
            _ => parts.push(format!("at minutes {:?}", self.minutes)),
        }

        if self.hours.len() < 24 {
            match (self.hours.len(), self.hours.first()) {
                (1, Some(hour)) => parts.push(format!("at {hour}:00")),
                _ => parts.push(format!("during hours {:?}", self.hours)),
            }
        }

        if self.days.len() < 31 {
            parts.push(format!("on days {:?}", self.days));
        }

        if self.months.len() < 12 {
            parts.push(format!("in months {:?}", self.months));
        }

        if self.weekdays.len() < 7 {
            let names: Vec<&str> = self.weekdays.iter().map(|&d| weekday_name(d)).collect();
            parts.push(format!("on {}", names.join(", ")));
        }

        parts.join(", ")
    }
}

impl FromStr for CronExpression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn weekday_name(day: u32) -> &'static str {
    match day {
        0 => "Sun",
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        6 => "Sat",
        _ => "?",
    }
}

fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

fn expand_macro(expression: &str) -> Result<&str, ParseError> {
    if !expression.starts_with('@') {
        return Ok(expression);
    }
    match expression {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        other => Err(ParseError::Malformed {
            field: CronField::Minute,
            token: other.to_string(),
        }),
    }
}

/// Parse a single cron field
fn parse_field(field: &str, kind: CronField) -> Result<BTreeSet<u32>, ParseError> {
    let (min, max) = kind.bounds();
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let part = part.trim();
        let malformed = || ParseError::Malformed {
            field: kind,
            token: if part.is_empty() { field } else { part }.to_string(),
        };
        if part.is_empty() {
            return Err(malformed());
        }

        // Oversized values parse and are then dropped by the domain check
        let number = |s: &str| s.parse::<u64>().map_err(|_| malformed());

        // Handle step values (e.g., */5 or 0-30/5)
        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = number(step)?;
                if step == 0 {
                    return Err(malformed());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            let (lo, hi) = kind.wildcard();
            (u64::from(lo), u64::from(hi))
        } else if let Some((a, b)) = range_part.split_once('-') {
            (number(a)?, number(b)?)
        } else {
            let value = number(range_part)?;
            (value, value)
        };

        let mut value = start;
        while value <= end && value <= u64::from(max) {
            if value >= u64::from(min) {
                // value <= max, which fits in u32
                values.insert(kind.normalize(value as u32));
            }
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
    }

    if values.is_empty() {
        return Err(ParseError::EmptyField(kind));
    }

    Ok(values)
}
