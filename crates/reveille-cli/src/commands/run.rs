//! Daemon mode: keeps the registry alive and prints broadcasts and
//! next-alarm changes as JSON lines until Ctrl-C.
//!
//! Config edits (e.g. `config set alarm.prealarm_duration 15` from another
//! shell) and wall-clock jumps are picked up on a poll.

use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Local, Utc};
use reveille_core::storage::AlarmConfig;
use reveille_core::{Config, NextAlarm, Preferences};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::runtime;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Disagreement between wall and monotonic clocks that counts as a time set.
const CLOCK_JUMP_TOLERANCE_MS: i64 = 30_000;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let rt = runtime::start(&config).await?;
    let mut broadcasts = rt.notifier.subscribe();
    let mut next = rt.alarms.subscribe_next_alarm();
    let initial = next.borrow_and_update().clone();
    print_next(initial.as_ref());

    let mut applied = config.alarm;
    let mut wall_clock = WallClockWatch::new();
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(alarms = rt.alarms.alarms().len(), "reveille running");
    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            }
            received = broadcasts.recv() => match received {
                Ok(b) => println!(
                    "{}",
                    json!({ "type": "broadcast", "alarm_id": b.alarm_id, "intent": b.intent, "at": b.at })
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "broadcast output fell behind"),
                Err(RecvError::Closed) => break,
            },
            changed = next.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = next.borrow_and_update().clone();
                print_next(current.as_ref());
            }
            _ = poll.tick() => {
                match Config::load() {
                    Ok(config) => apply_preferences(&rt.preferences, &mut applied, config.alarm),
                    Err(e) => warn!(error = %e, "config reload failed"),
                }
                match wall_clock.check() {
                    Some(ClockChange::TimeSet) => rt.alarms.on_time_set(),
                    Some(ClockChange::TimeZone) => rt.alarms.refresh(),
                    None => {}
                }
            }
        }
    }

    rt.alarms.shutdown().await;
    info!("reveille stopped");
    Ok(())
}

fn print_next(next: Option<&NextAlarm>) {
    println!("{}", json!({ "type": "next-alarm", "next": next }));
}

fn apply_preferences(preferences: &Preferences, applied: &mut AlarmConfig, loaded: AlarmConfig) {
    if loaded == *applied {
        return;
    }
    info!(
        prealarm = loaded.prealarm_duration,
        snooze = loaded.snooze_duration,
        auto_silence = loaded.auto_silence,
        "alarm preferences reloaded"
    );
    preferences.set_prealarm_minutes(loaded.prealarm_duration);
    preferences.set_snooze_minutes(loaded.snooze_duration);
    preferences.set_auto_silence_minutes(loaded.auto_silence);
    *applied = loaded;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockChange {
    TimeSet,
    TimeZone,
}

/// Notices the wall clock being set or the local offset changing between
/// two polls.
struct WallClockWatch {
    wall: DateTime<Utc>,
    mono: Instant,
    offset: FixedOffset,
}

impl WallClockWatch {
    fn new() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
            offset: *Local::now().offset(),
        }
    }

    fn check(&mut self) -> Option<ClockChange> {
        let previous = std::mem::replace(self, Self::new());
        let elapsed = chrono::Duration::from_std(self.mono - previous.mono)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let drift = (self.wall - (previous.wall + elapsed)).num_milliseconds().abs();

        if drift > CLOCK_JUMP_TOLERANCE_MS {
            info!(drift_ms = drift, "wall clock jumped");
            Some(ClockChange::TimeSet)
        } else if self.offset != previous.offset {
            info!(offset = %self.offset, "time zone changed");
            Some(ClockChange::TimeZone)
        } else {
            None
        }
    }
}
