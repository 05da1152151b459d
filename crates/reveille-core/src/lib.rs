//! # Reveille Core Library
//!
//! This library provides the core logic of the Reveille alarm clock: a
//! per-alarm hierarchical state machine and the shared queue that decides
//! which wake-up the platform timer sleeps until. The `reveille-cli` binary
//! is a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Alarm state machine**: one task per alarm consumes a mailbox of
//!   events and moves the alarm through disabled, set, pre-alarm, ringing,
//!   snoozed and skipping states
//! - **Scheduler**: ordered queue of at most one wake-up per alarm; only the
//!   earliest is armed on the platform timer
//! - **Registry**: owns the alarm tasks and routes commands and wake-ups
//! - **Storage**: SQLite-based alarm storage and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`Alarms`]: the registry
//! - [`AlarmCore`]: one alarm's state machine
//! - [`AlarmsScheduler`]: the wake-up queue
//! - [`SqliteAlarmStore`]: alarm persistence
//! - [`Config`]: application configuration management

pub mod alarm;
pub mod clock;
pub mod error;
pub mod events;
pub mod preferences;
pub mod scheduler;
pub mod storage;
pub mod wakeup;

pub use alarm::{
    AlarmCore, AlarmEvent, AlarmId, AlarmState, AlarmValue, Alarms, AlarmsDeps, Alert, DaysOfWeek,
    LoadRetry,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, StoreError, ValidationError};
pub use events::{AlarmIntent, Broadcast, BroadcastNotifier, Notifier};
pub use preferences::Preferences;
pub use scheduler::{AlarmsScheduler, CalendarType, NextAlarm, ScheduledAlarm};
pub use storage::{AlarmStore, Config, MemoryAlarmStore, SqliteAlarmStore};
pub use wakeup::{wakeup_channel, ManualWakeupTimer, TokioWakeupTimer, Wakeup, WakeupTimer};
