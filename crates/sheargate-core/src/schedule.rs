//! Weekly access schedules for allow-list entries.
//!
//! A schedule holds at most one time window per weekday. A weekday without a
//! window denies access for the whole day; an entry without a schedule is
//! allowed around the clock.

use crate::{Error, Result};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

const TIME_FORMAT: &str = "%H:%M";

/// Daily access window, `start..=end` in local wall-clock time.
///
/// When `end` is earlier than `start` the window wraps past midnight, so
/// `22:00-06:00` allows both `23:30` and `05:59`.
///
/// # Examples
///
/// ```
/// use sheargate_core::TimeWindow;
/// use chrono::NaiveTime;
///
/// let night: TimeWindow = "22:00-06:00".parse().unwrap();
/// assert!(night.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
/// assert!(!night.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Create a window from explicit bounds.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Returns `true` if the window wraps past midnight.
    #[inline]
    pub fn is_overnight(&self) -> bool {
        self.end < self.start
    }

    /// Check whether a time of day falls inside the window (bounds inclusive).
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.is_overnight() {
            time >= self.start || time <= self.end
        } else {
            self.start <= time && time <= self.end
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format(TIME_FORMAT),
            self.end.format(TIME_FORMAT)
        )
    }
}

impl std::str::FromStr for TimeWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidSchedule(format!("expected HH:MM-HH:MM, got '{s}'")))?;

        let parse = |part: &str| {
            NaiveTime::parse_from_str(part.trim(), TIME_FORMAT)
                .map_err(|e| Error::InvalidSchedule(format!("bad time '{}': {e}", part.trim())))
        };

        Ok(Self::new(parse(start)?, parse(end)?))
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeWindow> for String {
    fn from(window: TimeWindow) -> Self {
        window.to_string()
    }
}

/// Per-weekday access windows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklySchedule {
    pub monday: Option<TimeWindow>,
    pub tuesday: Option<TimeWindow>,
    pub wednesday: Option<TimeWindow>,
    pub thursday: Option<TimeWindow>,
    pub friday: Option<TimeWindow>,
    pub saturday: Option<TimeWindow>,
    pub sunday: Option<TimeWindow>,
}

impl WeeklySchedule {
    /// Schedule with the same window on every weekday.
    pub fn every_day(window: TimeWindow) -> Self {
        Self {
            monday: Some(window),
            tuesday: Some(window),
            wednesday: Some(window),
            thursday: Some(window),
            friday: Some(window),
            saturday: Some(window),
            sunday: Some(window),
        }
    }

    /// Window configured for a weekday, if any.
    pub fn window_for(&self, day: Weekday) -> Option<&TimeWindow> {
        match day {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }

    /// Check whether access is allowed at the given instant.
    ///
    /// The weekday and time of day are taken from `at` in its own time
    /// zone. A weekday without a window denies.
    pub fn allows<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.window_for(at.weekday())
            .is_some_and(|window| window.contains(at.time()))
    }
}
