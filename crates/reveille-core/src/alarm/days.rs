//! Repeat days as a 7-bit mask.
//!
//! Bit 0 is Monday, bit 6 is Sunday. A zero mask means the alarm does not
//! repeat: it fires once at its computed time and is then disabled.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const NONE: Self = Self(0);
    pub const WEEKDAYS: Self = Self(0x1F);
    pub const WEEKENDS: Self = Self(0x60);
    pub const EVERY_DAY: Self = Self(0x7F);

    /// Build from a raw mask. Bits above bit 6 are discarded.
    pub const fn new(mask: u8) -> Self {
        Self(mask & 0x7F)
    }

    pub fn from_days(days: &[Weekday]) -> Self {
        days.iter()
            .fold(Self::NONE, |acc, day| acc.with(*day, true))
    }

    pub const fn coded(self) -> u8 {
        self.0
    }

    pub const fn is_repeat_set(self) -> bool {
        self.0 != 0
    }

    pub fn is_set(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn with(self, day: Weekday, set: bool) -> Self {
        let bit = 1 << day.num_days_from_monday();
        if set {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }

    pub fn days(self) -> impl Iterator<Item = Weekday> {
        ALL_DAYS.into_iter().filter(move |d| self.is_set(*d))
    }

    /// Days to add to `today` to reach the next repeat day.
    ///
    /// Returns `0` when today itself is a repeat day and `-1` when the mask
    /// is empty.
    pub fn next_alarm(self, today: Weekday) -> i32 {
        if !self.is_repeat_set() {
            return -1;
        }
        let start = today.num_days_from_monday();
        (0..7u32)
            .find(|offset| self.0 & (1 << ((start + offset) % 7)) != 0)
            .map_or(-1, |offset| offset as i32)
    }

    /// Same as [`next_alarm`](Self::next_alarm) keyed by a calendar date.
    pub fn next_alarm_from(self, date: NaiveDate) -> i32 {
        self.next_alarm(date.weekday())
    }

    /// Sort bucket used when listing alarms: every day first, then weekdays,
    /// then weekends, then everything else.
    pub fn repeat_priority(self) -> u8 {
        match self {
            Self::EVERY_DAY => 0,
            Self::WEEKDAYS => 1,
            Self::WEEKENDS => 2,
            _ => 3,
        }
    }
}

impl From<u8> for DaysOfWeek {
    fn from(mask: u8) -> Self {
        Self::new(mask)
    }
}

impl From<DaysOfWeek> for u8 {
    fn from(days: DaysOfWeek) -> Self {
        days.0
    }
}

fn short_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

impl fmt::Display for DaysOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => f.write_str("never"),
            Self::EVERY_DAY => f.write_str("every day"),
            Self::WEEKDAYS => f.write_str("weekdays"),
            Self::WEEKENDS => f.write_str("weekends"),
            days => {
                let names: Vec<&str> = days.days().map(short_name).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

impl FromStr for DaysOfWeek {
    type Err = ValidationError;

    /// Accepts the [`Display`](fmt::Display) forms plus any comma separated
    /// list of weekday names chrono understands ("mon", "Monday", ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "never" | "once" => return Ok(Self::NONE),
            "every day" | "everyday" | "daily" => return Ok(Self::EVERY_DAY),
            "weekdays" => return Ok(Self::WEEKDAYS),
            "weekends" => return Ok(Self::WEEKENDS),
            _ => {}
        }
        normalized
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::NONE, |acc, part| {
                part.parse::<Weekday>()
                    .map(|day| acc.with(day, true))
                    .map_err(|_| ValidationError::Days(s.to_string()))
            })
    }
}
