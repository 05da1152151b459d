//! Alarms: data model, per-alarm state machine and the registry.

pub mod calendar;
mod days;
mod list;
mod machine;
mod registry;
mod value;

pub use days::DaysOfWeek;
pub use list::{sort_for_display, AlarmList};
pub use machine::{AlarmCore, AlarmEvent, CoreServices};
pub use registry::{Alarms, AlarmsDeps, LoadRetry};
pub use value::{parse_time_of_day, AlarmId, AlarmState, AlarmValue, Alert};
