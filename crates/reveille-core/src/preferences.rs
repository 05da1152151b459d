//! Live alarm preferences.
//!
//! Each value is a `tokio::sync::watch` channel so that the registry can
//! react when the pre-alarm duration changes while alarms are armed.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::watch;

use crate::storage::AlarmConfig;

#[derive(Debug)]
struct Inner {
    prealarm_minutes: watch::Sender<i32>,
    snooze_minutes: watch::Sender<i32>,
    auto_silence_minutes: watch::Sender<i32>,
}

/// Cheaply cloneable handle; all clones observe the same values.
#[derive(Debug, Clone)]
pub struct Preferences {
    inner: Arc<Inner>,
}

fn positive_minutes(minutes: i32) -> Option<Duration> {
    (minutes > 0).then(|| Duration::minutes(i64::from(minutes)))
}

impl Preferences {
    /// Durations in minutes. A pre-alarm or auto-silence value of zero or
    /// less disables the feature.
    pub fn new(prealarm_minutes: i32, snooze_minutes: i32, auto_silence_minutes: i32) -> Self {
        Self {
            inner: Arc::new(Inner {
                prealarm_minutes: watch::channel(prealarm_minutes).0,
                snooze_minutes: watch::channel(snooze_minutes).0,
                auto_silence_minutes: watch::channel(auto_silence_minutes).0,
            }),
        }
    }

    pub fn from_config(config: &AlarmConfig) -> Self {
        Self::new(
            config.prealarm_duration,
            config.snooze_duration,
            config.auto_silence,
        )
    }

    pub fn prealarm_minutes(&self) -> i32 {
        *self.inner.prealarm_minutes.borrow()
    }

    pub fn snooze_minutes(&self) -> i32 {
        *self.inner.snooze_minutes.borrow()
    }

    pub fn auto_silence_minutes(&self) -> i32 {
        *self.inner.auto_silence_minutes.borrow()
    }

    pub fn prealarm_duration(&self) -> Option<Duration> {
        positive_minutes(self.prealarm_minutes())
    }

    /// Never shorter than one minute.
    pub fn snooze_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.snooze_minutes().max(1)))
    }

    pub fn auto_silence_duration(&self) -> Option<Duration> {
        positive_minutes(self.auto_silence_minutes())
    }

    pub fn set_prealarm_minutes(&self, minutes: i32) {
        self.inner.prealarm_minutes.send_if_modified(|current| {
            let changed = *current != minutes;
            *current = minutes;
            changed
        });
    }

    pub fn set_snooze_minutes(&self, minutes: i32) {
        self.inner.snooze_minutes.send_replace(minutes);
    }

    pub fn set_auto_silence_minutes(&self, minutes: i32) {
        self.inner.auto_silence_minutes.send_replace(minutes);
    }

    pub fn subscribe_prealarm(&self) -> watch::Receiver<i32> {
        self.inner.prealarm_minutes.subscribe()
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::from_config(&AlarmConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_durations_disable_features() {
        let prefs = Preferences::new(-1, 10, 0);
        assert!(prefs.prealarm_duration().is_none());
        assert!(prefs.auto_silence_duration().is_none());
        assert_eq!(prefs.snooze_duration(), Duration::minutes(10));
    }

    #[test]
    fn built_from_alarm_config() {
        let config = AlarmConfig {
            prealarm_duration: 20,
            snooze_duration: 5,
            auto_silence: 0,
            ..AlarmConfig::default()
        };
        let prefs = Preferences::from_config(&config);
        assert_eq!(prefs.prealarm_minutes(), 20);
        assert_eq!(prefs.snooze_minutes(), 5);
        assert!(prefs.auto_silence_duration().is_none());
        assert_eq!(Preferences::default().prealarm_minutes(), 30);
    }

    #[test]
    fn snooze_has_a_floor() {
        let prefs = Preferences::new(-1, 0, -1);
        assert_eq!(prefs.snooze_duration(), Duration::minutes(1));
    }

    #[test]
    fn clones_share_values() {
        let prefs = Preferences::new(30, 10, 10);
        let other = prefs.clone();
        other.set_prealarm_minutes(15);
        assert_eq!(prefs.prealarm_duration(), Some(Duration::minutes(15)));
    }

    #[test]
    fn prealarm_subscribers_only_see_real_changes() {
        let prefs = Preferences::new(30, 10, 10);
        let mut rx = prefs.subscribe_prealarm();
        prefs.set_prealarm_minutes(30);
        assert!(!rx.has_changed().unwrap());
        prefs.set_prealarm_minutes(20);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 20);
    }
}
