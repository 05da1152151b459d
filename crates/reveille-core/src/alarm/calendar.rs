//! Next-fire time calculations.
//!
//! All functions take `now` explicitly so a single transition uses one
//! consistent reading of the clock.

use chrono::{DateTime, Days, Duration, NaiveTime, Utc};

use super::days::DaysOfWeek;
use crate::clock::Clock;

/// Next instant at which an alarm set for `time` on `days` rings.
///
/// Today's occurrence is used only if it is strictly after `now`; a time
/// equal to `now` counts as already past.
pub fn next_occurrence(
    clock: &dyn Clock,
    now: DateTime<Utc>,
    time: NaiveTime,
    days: DaysOfWeek,
) -> DateTime<Utc> {
    let mut date = clock.local(now).date();
    if clock.resolve(date.and_time(time)) <= now {
        date = date + Days::new(1);
    }
    let offset = days.next_alarm_from(date);
    if offset > 0 {
        date = date + Days::new(u64::from(offset.unsigned_abs()));
    }
    clock.resolve(date.and_time(time))
}

/// Pre-alarm instant for a main alarm ringing at `main`.
pub fn prealarm_time(main: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    main - offset
}

/// When a snoozed alarm rings again.
///
/// An explicitly picked wall-clock time is honoured when it is still ahead
/// of `now` today; otherwise the regular snooze duration applies.
pub fn snooze_until(
    clock: &dyn Clock,
    now: DateTime<Utc>,
    custom: Option<(u32, u32)>,
    snooze: Duration,
) -> DateTime<Utc> {
    let picked = custom
        .and_then(|(hour, minute)| NaiveTime::from_hms_opt(hour, minute, 0))
        .map(|time| clock.resolve(clock.local(now).date().and_time(time)))
        .filter(|at| *at > now);
    picked.unwrap_or(now + snooze)
}
