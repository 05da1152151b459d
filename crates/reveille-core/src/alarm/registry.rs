//! The alarm registry.
//!
//! Owns one task per alarm and routes commands, platform wake-ups and
//! preference changes into their mailboxes. Commands are fire-and-forget:
//! they return once the message is queued. Use [`Alarms::settle`] to wait
//! until everything queued so far has been handled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Timelike;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::machine::{run_core, AlarmCore, AlarmEvent, CoreServices, Envelope};
use super::list::AlarmList;
use super::{AlarmId, AlarmState, AlarmValue};
use crate::clock::Clock;
use crate::error::{CoreError, Result, ValidationError};
use crate::events::Notifier;
use crate::preferences::Preferences;
use crate::scheduler::{AlarmsScheduler, NextAlarm, ScheduledAlarm};
use crate::storage::{AlarmStore, StartupConfig};
use crate::wakeup::{Wakeup, WakeupReceiver, WakeupSender, WakeupTimer};

/// Rounds of dispatcher + mailbox barriers in [`Alarms::settle`]. Each round
/// lets one more hop of follow-up work (event -> due entry -> event) drain.
const SETTLE_ROUNDS: usize = 4;

/// How long startup keeps trying to read the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRetry {
    pub interval: Duration,
    pub window: Duration,
}

impl Default for LoadRetry {
    fn default() -> Self {
        Self::from(&StartupConfig::default())
    }
}

impl From<&StartupConfig> for LoadRetry {
    fn from(config: &StartupConfig) -> Self {
        Self {
            interval: config.retry_interval(),
            window: config.retry_window(),
        }
    }
}

/// Collaborators for [`Alarms::start`].
///
/// `wakeup_tx` must be the sender the `timer` posts expirations on, and
/// `wakeup_rx` its receiving end.
pub struct AlarmsDeps {
    pub store: Arc<dyn AlarmStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub timer: Arc<dyn WakeupTimer>,
    pub wakeup_tx: WakeupSender,
    pub wakeup_rx: WakeupReceiver,
    pub preferences: Preferences,
    pub retry: LoadRetry,
}

struct AlarmHandle {
    mailbox: mpsc::UnboundedSender<Envelope>,
    task: JoinHandle<()>,
}

/// Registry of live alarms.
pub struct Alarms {
    services: CoreServices,
    handles: Mutex<HashMap<AlarmId, AlarmHandle>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    wakeups: WakeupSender,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Alarms {
    /// Load every stored alarm, resume its state machine and start routing
    /// wake-ups.
    ///
    /// A store that stays unavailable for the whole retry window is logged
    /// and the registry starts empty.
    pub async fn start(deps: AlarmsDeps) -> Arc<Self> {
        let scheduler = Arc::new(AlarmsScheduler::new(
            deps.clock.clone(),
            deps.timer,
            deps.wakeup_tx.clone(),
            deps.preferences.clone(),
        ));
        let services = CoreServices {
            scheduler,
            store: deps.store,
            notifier: deps.notifier,
            clock: deps.clock,
            preferences: deps.preferences,
            list: AlarmList::new(),
        };

        let rows = load_with_retry(services.store.as_ref(), deps.retry).await;
        let prealarm = services.preferences.subscribe_prealarm();

        let alarms = Arc::new(Self {
            services,
            handles: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
            wakeups: deps.wakeup_tx,
        });

        info!(count = rows.len(), "alarms loaded");
        for value in rows {
            alarms.spawn_core(value, true);
        }

        let dispatcher = tokio::spawn(dispatch(Arc::downgrade(&alarms), deps.wakeup_rx, prealarm));
        lock(&alarms.background).push(dispatcher);
        alarms
    }

    fn spawn_core(&self, value: AlarmValue, resume: bool) {
        self.services.list.upsert(value.clone());
        let (mailbox, rx) = mpsc::unbounded_channel();
        let core = AlarmCore::new(value, self.services.clone());
        let id = core.id();
        let task = tokio::spawn(run_core(core, rx, resume));
        if lock(&self.handles)
            .insert(id, AlarmHandle { mailbox, task })
            .is_some()
        {
            warn!(alarm_id = id, "replaced an existing alarm task");
        }
    }

    fn post(&self, id: AlarmId, event: AlarmEvent) -> Result<()> {
        let handles = lock(&self.handles);
        let Some(handle) = handles.get(&id) else {
            warn!(alarm_id = id, %event, "unknown alarm");
            return Err(CoreError::AlarmNotFound(id));
        };
        handle
            .mailbox
            .send(Envelope::Event(event))
            .map_err(|_| CoreError::RegistryClosed)
    }

    fn post_all(&self, event: &AlarmEvent) {
        for (id, handle) in lock(&self.handles).iter() {
            if handle.mailbox.send(Envelope::Event(event.clone())).is_err() {
                warn!(alarm_id = *id, %event, "alarm task is gone");
            }
        }
    }

    fn route_fired(&self, entry: ScheduledAlarm) {
        debug!(alarm_id = entry.id, kind = %entry.kind, "wake-up");
        // Unknown ids are already logged by `post`.
        let _ = self.post(entry.id, AlarmEvent::Fired(entry.kind));
    }

    /// Enable or disable an alarm.
    ///
    /// # Errors
    /// `AlarmNotFound` for an unknown id.
    pub fn enable(&self, id: AlarmId, enabled: bool) -> Result<()> {
        let event = if enabled {
            AlarmEvent::Enable
        } else {
            AlarmEvent::Disable
        };
        self.post(id, event)
    }

    /// Replace the user-editable fields of an alarm.
    pub fn change(&self, id: AlarmId, value: AlarmValue) -> Result<()> {
        value.validate()?;
        self.post(id, AlarmEvent::Change(value))
    }

    pub fn snooze(&self, id: AlarmId) -> Result<()> {
        self.post(id, AlarmEvent::Snooze(None))
    }

    /// Snooze until a wall-clock time today; a time that has already passed
    /// falls back to the snooze duration.
    pub fn snooze_until(&self, id: AlarmId, hour: u32, minute: u32) -> Result<()> {
        if hour > 23 {
            return Err(ValidationError::Hour(hour).into());
        }
        if minute > 59 {
            return Err(ValidationError::Minute(minute).into());
        }
        self.post(id, AlarmEvent::Snooze(Some((hour, minute))))
    }

    pub fn dismiss(&self, id: AlarmId) -> Result<()> {
        self.post(id, AlarmEvent::Dismiss)
    }

    /// Skip the next occurrence of a repeating alarm.
    pub fn request_skip(&self, id: AlarmId) -> Result<()> {
        self.post(id, AlarmEvent::RequestSkip)
    }

    /// Delete an alarm. Its id is unknown to the registry from here on.
    pub fn delete(&self, id: AlarmId) -> Result<()> {
        let Some(handle) = lock(&self.handles).remove(&id) else {
            warn!(alarm_id = id, "delete of unknown alarm");
            return Err(CoreError::AlarmNotFound(id));
        };
        let sent = handle.mailbox.send(Envelope::Event(AlarmEvent::Delete));
        // Dropping the last sender lets the task finish after the delete.
        drop(handle.mailbox);
        lock(&self.retired).push(handle.task);
        sent.map_err(|_| CoreError::RegistryClosed)
    }

    /// Recompute every armed alarm, e.g. after a time zone change.
    pub fn refresh(&self) {
        info!("refreshing all alarms");
        self.post_all(&AlarmEvent::Refresh);
    }

    /// The wall clock was set.
    pub fn on_time_set(&self) {
        info!("wall clock changed");
        self.services.scheduler.rearm();
        self.post_all(&AlarmEvent::TimeSet);
    }

    /// New disabled, non-repeating alarm at the current wall-clock time.
    ///
    /// # Errors
    /// Returns a store error if the row cannot be created.
    pub fn create_new_alarm(&self) -> Result<AlarmValue> {
        let now = self.services.clock.local_now();
        self.create_alarm(AlarmValue::new(0, now.hour(), now.minute()))
    }

    /// New alarm from a template. The alarm starts disabled; a template with
    /// `enabled` set is enabled right after it is registered.
    ///
    /// # Errors
    /// Returns a validation error for an out-of-range time, or a store error
    /// if the row cannot be created.
    pub fn create_alarm(&self, template: AlarmValue) -> Result<AlarmValue> {
        template.validate()?;
        let enable = template.enabled;
        let mut value = template
            .with_enabled(false)
            .with_state(AlarmState::Disabled)
            .with_next_time(None);
        value.id = self.services.store.create(&value)?;
        info!(alarm_id = value.id, hour = value.hour, minutes = value.minutes, "alarm created");
        self.spawn_core(value.clone(), false);
        if enable {
            self.post(value.id, AlarmEvent::Enable)?;
        }
        Ok(value)
    }

    pub fn get(&self, id: AlarmId) -> Option<AlarmValue> {
        self.services.list.get(id)
    }

    /// Every alarm in display order.
    pub fn alarms(&self) -> Vec<AlarmValue> {
        self.services.list.sorted()
    }

    pub fn next_alarm(&self) -> Option<NextAlarm> {
        self.services.scheduler.next_alarm()
    }

    pub fn subscribe_next_alarm(&self) -> watch::Receiver<Option<NextAlarm>> {
        self.services.scheduler.subscribe_next_alarm()
    }

    pub fn scheduler(&self) -> &Arc<AlarmsScheduler> {
        &self.services.scheduler
    }

    pub fn preferences(&self) -> &Preferences {
        &self.services.preferences
    }

    /// Wait until the dispatcher and every mailbox have handled what was
    /// queued before this call, including follow-up wake-ups it produced.
    pub async fn settle(&self) {
        for _ in 0..SETTLE_ROUNDS {
            let (done, wait) = oneshot::channel();
            if self.wakeups.send(Wakeup::Barrier(done)).is_ok() {
                let _ = wait.await;
            }

            let mailboxes: Vec<_> = lock(&self.handles)
                .values()
                .map(|h| h.mailbox.clone())
                .collect();
            for mailbox in mailboxes {
                let (done, wait) = oneshot::channel();
                if mailbox.send(Envelope::Barrier(done)).is_ok() {
                    let _ = wait.await;
                }
            }

            let retired = std::mem::take(&mut *lock(&self.retired));
            for task in retired {
                if let Err(e) = task.await {
                    error!(error = %e, "alarm task failed");
                }
            }
        }
    }

    /// Stop routing and let every alarm task finish its queue.
    pub async fn shutdown(&self) {
        for task in lock(&self.background).drain(..) {
            task.abort();
        }
        let handles: Vec<AlarmHandle> = lock(&self.handles).drain().map(|(_, h)| h).collect();
        let mut tasks: Vec<JoinHandle<()>> = handles.into_iter().map(|h| h.task).collect();
        tasks.append(&mut lock(&self.retired));
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "alarm task failed");
            }
        }
        info!("alarm registry stopped");
    }
}

impl Drop for Alarms {
    fn drop(&mut self) {
        for task in lock(&self.background).drain(..) {
            task.abort();
        }
    }
}

async fn load_with_retry(store: &dyn AlarmStore, retry: LoadRetry) -> Vec<AlarmValue> {
    let deadline = Instant::now() + retry.window;
    let mut attempt = 1u32;
    loop {
        match store.load_all() {
            Ok(rows) => return rows,
            Err(e) if Instant::now() + retry.interval <= deadline => {
                warn!(attempt, error = %e, "alarm store not ready, retrying");
                tokio::time::sleep(retry.interval).await;
                attempt += 1;
            }
            Err(e) => {
                error!(attempt, error = %e, "giving up loading alarms, starting empty");
                return Vec::new();
            }
        }
    }
}

/// Routes wake-ups and pre-alarm preference changes.
///
/// Preference changes are polled first, so a barrier only completes once
/// every change made before it was sent has been fanned out.
async fn dispatch(
    alarms: Weak<Alarms>,
    mut wakeups: WakeupReceiver,
    mut prealarm: watch::Receiver<i32>,
) {
    let mut watching = true;
    loop {
        tokio::select! {
            biased;
            changed = prealarm.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let minutes = *prealarm.borrow_and_update();
                let Some(alarms) = alarms.upgrade() else {
                    break;
                };
                info!(minutes, "pre-alarm duration changed");
                alarms.post_all(&AlarmEvent::PrealarmDurationChanged);
            }
            wakeup = wakeups.recv() => {
                let Some(wakeup) = wakeup else {
                    break;
                };
                let Some(alarms) = alarms.upgrade() else {
                    break;
                };
                match wakeup {
                    Wakeup::Expired(id) => {
                        if let Some(entry) = alarms.services.scheduler.on_alarm_fired(id) {
                            alarms.route_fired(entry);
                        }
                    }
                    Wakeup::Due(entry) => alarms.route_fired(entry),
                    Wakeup::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
        }
    }
    debug!("wake-up dispatcher stopped");
}
