//! Alarm configuration snapshot and persisted state names.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::days::DaysOfWeek;
use crate::error::ValidationError;

/// Stable alarm identifier, assigned by the store and never reused.
pub type AlarmId = i64;

/// What to play when the alarm rings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Alert {
    #[default]
    Default,
    Silent,
    Uri(String),
}

impl Alert {
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Silent)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Silent => f.write_str("silent"),
            Self::Uri(uri) => f.write_str(uri),
        }
    }
}

impl From<String> for Alert {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "default" => Self::Default,
            "silent" => Self::Silent,
            _ => Self::Uri(value),
        }
    }
}

impl From<&str> for Alert {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Alert> for String {
    fn from(alert: Alert) -> Self {
        alert.to_string()
    }
}

/// State machine states that can be persisted.
///
/// `Deleted` is terminal and only ever lives in memory; the two complex
/// transitions have no state of their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Disabled,
    Set,
    PreAlarmSet,
    PreAlarmFired,
    Fired,
    Snoozed,
    PreAlarmSnoozed,
    Skipping,
    Deleted,
}

impl AlarmState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Set => "set",
            Self::PreAlarmSet => "pre_alarm_set",
            Self::PreAlarmFired => "pre_alarm_fired",
            Self::Fired => "fired",
            Self::Snoozed => "snoozed",
            Self::PreAlarmSnoozed => "pre_alarm_snoozed",
            Self::Skipping => "skipping",
            Self::Deleted => "deleted",
        }
    }

    /// Children of the shared `Enabled` parent state.
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled | Self::Deleted)
    }

    /// States that submit a scheduler entry as part of entering.
    pub const fn arms_on_enter(self) -> bool {
        matches!(
            self,
            Self::Set
                | Self::PreAlarmSet
                | Self::PreAlarmFired
                | Self::Snoozed
                | Self::PreAlarmSnoozed
                | Self::Skipping
        )
    }

    pub const fn is_snoozed(self) -> bool {
        matches!(self, Self::Snoozed | Self::PreAlarmSnoozed)
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "disabled" => Self::Disabled,
            "set" => Self::Set,
            "pre_alarm_set" => Self::PreAlarmSet,
            "pre_alarm_fired" => Self::PreAlarmFired,
            "fired" => Self::Fired,
            "snoozed" => Self::Snoozed,
            "pre_alarm_snoozed" => Self::PreAlarmSnoozed,
            "skipping" => Self::Skipping,
            "deleted" => Self::Deleted,
            other => {
                return Err(ValidationError::InvalidValue {
                    field: "state".into(),
                    message: format!("unknown alarm state '{other}'"),
                })
            }
        })
    }
}

/// User-facing alarm configuration plus the bookkeeping needed to resume the
/// state machine after a restart.
///
/// Transitions replace the whole value instead of mutating shared copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmValue {
    pub id: AlarmId,
    pub enabled: bool,
    pub hour: u32,
    pub minutes: u32,
    pub days_of_week: DaysOfWeek,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub prealarm: bool,
    #[serde(default = "default_true")]
    pub vibrate: bool,
    #[serde(default)]
    pub alert: Alert,
    #[serde(default)]
    pub next_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: AlarmState,
}

fn default_true() -> bool {
    true
}

impl AlarmValue {
    /// A disabled, non-repeating alarm at the given time.
    pub fn new(id: AlarmId, hour: u32, minutes: u32) -> Self {
        Self {
            id,
            enabled: false,
            hour,
            minutes,
            days_of_week: DaysOfWeek::NONE,
            label: String::new(),
            prealarm: false,
            vibrate: true,
            alert: Alert::Default,
            next_time: None,
            state: AlarmState::Disabled,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hour > 23 {
            return Err(ValidationError::Hour(self.hour));
        }
        if self.minutes > 59 {
            return Err(ValidationError::Minute(self.minutes));
        }
        Ok(())
    }

    pub fn time_of_day(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minutes, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn with_time(self, hour: u32, minutes: u32) -> Self {
        Self {
            hour,
            minutes,
            ..self
        }
    }

    pub fn with_days(self, days_of_week: DaysOfWeek) -> Self {
        Self {
            days_of_week,
            ..self
        }
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn with_prealarm(self, prealarm: bool) -> Self {
        Self { prealarm, ..self }
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..self
        }
    }

    pub fn with_alert(self, alert: Alert) -> Self {
        Self { alert, ..self }
    }

    pub fn with_vibrate(self, vibrate: bool) -> Self {
        Self { vibrate, ..self }
    }

    pub fn with_next_time(self, next_time: Option<DateTime<Utc>>) -> Self {
        Self { next_time, ..self }
    }

    pub fn with_state(self, state: AlarmState) -> Self {
        Self { state, ..self }
    }

    /// Copy the user-editable fields of `edited`, keeping this alarm's id and
    /// state machine bookkeeping.
    pub fn edited(self, edited: &AlarmValue) -> Self {
        Self {
            enabled: edited.enabled,
            hour: edited.hour,
            minutes: edited.minutes,
            days_of_week: edited.days_of_week,
            label: edited.label.clone(),
            prealarm: edited.prealarm,
            vibrate: edited.vibrate,
            alert: edited.alert.clone(),
            ..self
        }
    }
}

/// Parse `HH:MM` into (hour, minute).
pub fn parse_time_of_day(s: &str) -> Result<(u32, u32), ValidationError> {
    let time = NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ValidationError::TimeOfDay(s.to_string()))?;
    Ok((time.hour(), time.minute()))
}
