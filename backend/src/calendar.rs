//! School-local calendar arithmetic.
//!
//! Every date and wall-clock value in this service is school-local time at a
//! single fixed UTC offset (see [`Clock`]). Request strings of the form
//! `yyyy-mm-dd` are split into components by hand and never go through a
//! timezone-aware parser, so a date never shifts by a day on the way in.

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// ── CalendarDay ──────────────────────────────────────────────

/// A school-local calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "String", into = "String")]
#[sqlx(transparent)]
pub struct CalendarDay(NaiveDate);

impl CalendarDay {
    /// Parse `yyyy-mm-dd` from its components.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().splitn(3, '-');
        let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
        if y.len() != 4 || m.len() != 2 || d.len() != 2 {
            return None;
        }
        if !(y.chars().chain(m.chars()).chain(d.chars())).all(|c| c.is_ascii_digit()) {
            return None;
        }
        NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?).map(Self)
    }

    /// `None` when the result falls outside the representable calendar.
    pub fn add_days(self, days: i64) -> Option<Self> {
        Duration::try_days(days)
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
    }

    pub fn add_weeks(self, weeks: i64) -> Option<Self> {
        self.add_days(weeks.checked_mul(7)?)
    }

    /// 1 = Mon … 7 = Sun.
    pub fn day_of_week(self) -> u8 {
        self.0.weekday().number_from_monday() as u8
    }

    /// First day on or after `self` that falls on `day_of_week` (1 = Mon … 7 = Sun).
    pub fn next_on_or_after(self, day_of_week: u8) -> Option<Self> {
        let delta = (i64::from(day_of_week) - i64::from(self.day_of_week())).rem_euclid(7);
        self.add_days(delta)
    }

    pub fn at(self, time: NaiveTime) -> NaiveDateTime {
        self.0.and_time(time)
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl TryFrom<String> for CalendarDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid date `{value}`, expected yyyy-mm-dd"))
    }
}

impl From<CalendarDay> for String {
    fn from(day: CalendarDay) -> Self {
        day.to_string()
    }
}

impl From<NaiveDateTime> for CalendarDay {
    fn from(value: NaiveDateTime) -> Self {
        Self(value.date())
    }
}

// ── Session moments ──────────────────────────────────────────

/// A session date as supplied by a caller: always a day, sometimes a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMoment {
    pub day:  CalendarDay,
    pub time: Option<NaiveTime>,
}

impl SessionMoment {
    /// Accepts `yyyy-mm-dd`, `yyyy-mm-ddTHH:MM[:SS[.fff]]` (school-local) or an
    /// RFC 3339 timestamp with an offset, which is converted to school time.
    pub fn parse(raw: &str, offset: FixedOffset) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() == 10 {
            return CalendarDay::parse(raw).map(|day| Self { day, time: None });
        }
        if raw.len() < 16 || !raw.is_char_boundary(10) {
            return None;
        }

        let (date_part, rest) = raw.split_at(10);
        let rest = rest.strip_prefix('T').or_else(|| rest.strip_prefix(' '))?;

        if rest.ends_with('Z') || rest.contains('+') || rest.rfind('-').is_some() {
            let stamp = DateTime::parse_from_rfc3339(raw).ok()?;
            let local = stamp.with_timezone(&offset).naive_local();
            return Some(Self { day: local.into(), time: Some(local.time()) });
        }

        let day = CalendarDay::parse(date_part)?;
        let time = parse_clock_time(rest)?;
        Some(Self { day, time: Some(time) })
    }

    /// Combine with `fallback` when the caller gave no explicit time.
    pub fn resolve(self, fallback: NaiveTime) -> NaiveDateTime {
        self.day.at(self.time.unwrap_or(fallback))
    }
}

/// Parse `HH:MM`, `HH:MM:SS` or `HH:MM:SS.fff`.
pub fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S%.f"))
        .ok()
}

/// `[a_start, a_end)` and `[b_start, b_end)` share at least one instant.
pub fn ranges_overlap(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && b_start < a_end
}

/// Next weekly occurrence starting at or after `after`, skipping `cancelled`
/// days. Gives up after a year of consecutive cancellations.
pub fn next_occurrence(
    after: NaiveDateTime,
    day_of_week: u8,
    start: NaiveTime,
    cancelled: &HashSet<CalendarDay>,
) -> Option<NaiveDateTime> {
    let mut day = CalendarDay::from(after).next_on_or_after(day_of_week)?;
    if day.at(start) < after {
        day = day.add_weeks(1)?;
    }
    for _ in 0..53 {
        if !cancelled.contains(&day) {
            return Some(day.at(start));
        }
        day = day.add_weeks(1)?;
    }
    None
}

// ── Clock ────────────────────────────────────────────────────

/// The single source of "now", expressed in school-local time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: FixedOffset,
    pinned: Option<NaiveDateTime>,
}

impl Clock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset, pinned: None }
    }

    /// A clock frozen at `at` (school-local).
    pub fn pinned(offset: FixedOffset, at: NaiveDateTime) -> Self {
        Self { offset, pinned: Some(at) }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn now(&self) -> NaiveDateTime {
        self.pinned
            .unwrap_or_else(|| Utc::now().with_timezone(&self.offset).naive_local())
    }

    pub fn today(&self) -> CalendarDay {
        self.now().into()
    }
}
