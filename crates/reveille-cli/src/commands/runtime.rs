//! Boots the alarm registry on the on-disk store and the host clock.

use std::sync::Arc;

use reveille_core::{
    wakeup_channel, Alarms, AlarmsDeps, BroadcastNotifier, Clock, Config, LoadRetry,
    Preferences, SqliteAlarmStore, SystemClock, TokioWakeupTimer,
};

pub struct Runtime {
    pub alarms: Arc<Alarms>,
    pub notifier: Arc<BroadcastNotifier>,
    pub preferences: Preferences,
}

pub async fn start(config: &Config) -> Result<Runtime, Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteAlarmStore::open()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (wakeup_tx, wakeup_rx) = wakeup_channel();
    let timer = Arc::new(TokioWakeupTimer::new(clock.clone(), wakeup_tx.clone()));
    let notifier = Arc::new(BroadcastNotifier::default());
    let preferences = Preferences::from_config(&config.alarm);

    let alarms = Alarms::start(AlarmsDeps {
        store,
        notifier: notifier.clone(),
        clock,
        timer,
        wakeup_tx,
        wakeup_rx,
        preferences: preferences.clone(),
        retry: LoadRetry::from(&config.startup),
    })
    .await;
    // Resumed alarms re-arm in their own tasks.
    alarms.settle().await;

    Ok(Runtime {
        alarms,
        notifier,
        preferences,
    })
}
