//! Shared harness: a registry on a manual clock and a manual wake-up timer.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use reveille_core::alarm::LoadRetry;
use reveille_core::{
    wakeup_channel, AlarmId, AlarmIntent, AlarmStore, Alarms, AlarmsDeps, BroadcastNotifier,
    CalendarType, Clock, ManualClock, ManualWakeupTimer, Preferences, Wakeup,
};
use reveille_core::wakeup::WakeupSender;
use tokio::sync::broadcast;

/// 2024-03-04 is a Monday.
pub fn local(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub timer: Arc<ManualWakeupTimer>,
    pub prefs: Preferences,
    pub wakeup_tx: WakeupSender,
    pub intents: broadcast::Receiver<reveille_core::Broadcast>,
    pub alarms: Arc<Alarms>,
}

impl Harness {
    pub async fn start(now: NaiveDateTime, store: Arc<dyn AlarmStore>) -> Self {
        Self::start_with(now, store, Preferences::new(30, 10, 10)).await
    }

    pub async fn start_with(
        now: NaiveDateTime,
        store: Arc<dyn AlarmStore>,
        prefs: Preferences,
    ) -> Self {
        let clock = Arc::new(ManualClock::at_local(now));
        let timer = Arc::new(ManualWakeupTimer::new());
        let notifier = Arc::new(BroadcastNotifier::new(256));
        let intents = notifier.subscribe();
        let (wakeup_tx, wakeup_rx) = wakeup_channel();
        let alarms = Alarms::start(AlarmsDeps {
            store,
            notifier,
            clock: clock.clone(),
            timer: timer.clone(),
            wakeup_tx: wakeup_tx.clone(),
            wakeup_rx,
            preferences: prefs.clone(),
            retry: LoadRetry {
                interval: Duration::from_millis(5),
                window: Duration::from_millis(100),
            },
        })
        .await;
        alarms.settle().await;
        Self {
            clock,
            timer,
            prefs,
            wakeup_tx,
            intents,
            alarms,
        }
    }

    /// Move the clock to the armed wake-up and let the platform timer expire.
    pub async fn fire_armed(&self) -> AlarmId {
        let (at, id) = self.timer.armed().expect("a wake-up should be armed");
        self.clock.set(at);
        self.wakeup_tx.send(Wakeup::Expired(id)).unwrap();
        self.alarms.settle().await;
        id
    }

    /// The queued entry for `id` as (type, local wall-clock time).
    pub fn entry(&self, id: AlarmId) -> Option<(CalendarType, NaiveDateTime)> {
        self.alarms
            .scheduler()
            .entry(id)
            .map(|e| (e.kind, self.clock.local(e.at)))
    }

    pub fn intents(&mut self) -> Vec<AlarmIntent> {
        let mut out = Vec::new();
        while let Ok(b) = self.intents.try_recv() {
            out.push(b.intent);
        }
        out
    }
}
