//! Wall-clock access.
//!
//! Alarm times are defined in local wall-clock terms (hour, minute, weekday)
//! but ordered and armed as absolute instants. The [`Clock`] trait owns both
//! "what time is it" and the local <-> absolute conversion, so that a time
//! zone or DST change only requires re-resolving local times.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{
    DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDateTime, Offset, TimeZone, Utc,
};

pub trait Clock: Send + Sync + fmt::Debug {
    /// Current absolute instant.
    fn now(&self) -> DateTime<Utc>;

    /// Wall-clock reading of `instant` in the clock's time zone.
    fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime;

    /// Absolute instant for a wall-clock time.
    ///
    /// Ambiguous times (DST fall-back) resolve to the earliest instant,
    /// skipped times (DST spring-forward) are pushed forward past the gap.
    fn resolve(&self, local: NaiveDateTime) -> DateTime<Utc>;

    fn local_now(&self) -> NaiveDateTime {
        self.local(self.now())
    }
}

pub(crate) fn resolve_in<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map_or_else(|| Utc.from_utc_datetime(&local), |t| t.with_timezone(&Utc)),
    }
}

/// The host clock in the host's local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&Local).naive_local()
    }

    fn resolve(&self, local: NaiveDateTime) -> DateTime<Utc> {
        resolve_in(&Local, local)
    }
}

/// A clock that only moves when told to, in a fixed UTC offset.
///
/// Used by tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Clock in UTC reading `local` as its current time.
    pub fn at_local(local: NaiveDateTime) -> Self {
        Self::at_local_with_offset(local, Utc.fix())
    }

    pub fn at_local_with_offset(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let now = resolve_in(&offset, local);
        Self::new(now, offset)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        self.set(resolve_in(&self.offset, local));
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }

    fn resolve(&self, local: NaiveDateTime) -> DateTime<Utc> {
        resolve_in(&self.offset, local)
    }
}
