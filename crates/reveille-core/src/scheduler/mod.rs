//! Scheduling queue for alarm wake-ups.
//!
//! The queue holds at most one entry per alarm, ordered by absolute fire
//! time. Only the head is armed on the platform [`WakeupTimer`]. After every
//! mutation the scheduler:
//! - hands entries that are already due to the dispatcher,
//! - re-arms (or cancels) the platform timer if the head changed,
//! - publishes the user-visible "next alarm".

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::alarm::{AlarmId, AlarmValue};
use crate::clock::Clock;
use crate::preferences::Preferences;
use crate::wakeup::{Wakeup, WakeupSender, WakeupTimer};

/// Purpose of a scheduler entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarType {
    /// Main alarm, or the end of a snooze.
    Normal,
    PreAlarm,
    /// Ringing timeout.
    AutoSilence,
    /// End of a skipped occurrence.
    Skip,
}

impl CalendarType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::PreAlarm => "prealarm",
            Self::AutoSilence => "autosilence",
            Self::Skip => "skip",
        }
    }

    /// Entries the user should see as an upcoming alarm.
    pub const fn is_user_visible(self) -> bool {
        matches!(self, Self::Normal | Self::PreAlarm)
    }
}

impl fmt::Display for CalendarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued wake-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAlarm {
    pub id: AlarmId,
    pub at: DateTime<Utc>,
    pub kind: CalendarType,
    /// Snapshot of the alarm at scheduling time, for display only.
    pub value: Option<AlarmValue>,
}

/// The user-visible upcoming alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextAlarm {
    pub id: AlarmId,
    pub at: DateTime<Utc>,
    /// True when `at` was projected from a pre-alarm entry using the
    /// current pre-alarm duration.
    pub estimated: bool,
    pub value: Option<AlarmValue>,
}

#[derive(Debug, Default)]
struct Queue {
    by_time: BTreeMap<(DateTime<Utc>, AlarmId), ScheduledAlarm>,
    by_id: HashMap<AlarmId, DateTime<Utc>>,
    armed: Option<(AlarmId, DateTime<Utc>, CalendarType)>,
}

impl Queue {
    fn insert(&mut self, entry: ScheduledAlarm) {
        self.remove(entry.id);
        self.by_id.insert(entry.id, entry.at);
        self.by_time.insert((entry.at, entry.id), entry);
    }

    fn remove(&mut self, id: AlarmId) -> Option<ScheduledAlarm> {
        let at = self.by_id.remove(&id)?;
        self.by_time.remove(&(at, id))
    }

    fn head(&self) -> Option<&ScheduledAlarm> {
        self.by_time.values().next()
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<ScheduledAlarm> {
        let (&(at, id), _) = self.by_time.first_key_value()?;
        if at > now {
            return None;
        }
        self.by_id.remove(&id);
        self.by_time.remove(&(at, id))
    }
}

/// Queue of pending alarm wake-ups shared by every alarm state machine.
pub struct AlarmsScheduler {
    queue: Mutex<Queue>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn WakeupTimer>,
    wakeups: WakeupSender,
    preferences: Preferences,
    next_alarm: watch::Sender<Option<NextAlarm>>,
}

impl fmt::Debug for AlarmsScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmsScheduler")
            .field("entries", &self.lock().by_time.len())
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

impl AlarmsScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        timer: Arc<dyn WakeupTimer>,
        wakeups: WakeupSender,
        preferences: Preferences,
    ) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            clock,
            timer,
            wakeups,
            preferences,
            next_alarm: watch::channel(None).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a wake-up for `id`, replacing any entry it already has.
    ///
    /// A time that is not in the future is delivered right away.
    pub fn set_alarm(
        &self,
        id: AlarmId,
        kind: CalendarType,
        at: DateTime<Utc>,
        value: Option<AlarmValue>,
    ) {
        debug!(alarm_id = id, %kind, %at, "schedule");
        let mut queue = self.lock();
        queue.insert(ScheduledAlarm { id, at, kind, value });
        self.after_mutation(&mut queue);
    }

    /// Drop the entry for `id`. Unknown ids are ignored.
    pub fn remove_alarm(&self, id: AlarmId) {
        let mut queue = self.lock();
        if queue.remove(id).is_some() {
            debug!(alarm_id = id, "unschedule");
        }
        self.after_mutation(&mut queue);
    }

    /// Resolve an expired platform wake-up into its queue entry.
    ///
    /// Returns `None` for a stale wake-up whose entry has already been
    /// replaced or removed.
    pub fn on_alarm_fired(&self, id: AlarmId) -> Option<ScheduledAlarm> {
        let mut queue = self.lock();
        let armed = queue.armed.take();
        let fired = match queue.by_id.get(&id).copied() {
            Some(at) if armed.is_some_and(|(armed_id, armed_at, _)| armed_id == id && armed_at == at) => {
                queue.remove(id)
            }
            _ => {
                warn!(alarm_id = id, "stale wake-up ignored");
                // The armed slot was cleared above, so the head is re-armed.
                None
            }
        };
        self.after_mutation(&mut queue);
        fired
    }

    /// Re-arm the platform timer even if the head is unchanged, for when
    /// the wall clock moved under a sleeping timer.
    pub fn rearm(&self) {
        let mut queue = self.lock();
        queue.armed = None;
        self.after_mutation(&mut queue);
    }

    /// Entries in fire order.
    pub fn entries(&self) -> Vec<ScheduledAlarm> {
        self.lock().by_time.values().cloned().collect()
    }

    pub fn entry(&self, id: AlarmId) -> Option<ScheduledAlarm> {
        let queue = self.lock();
        let at = *queue.by_id.get(&id)?;
        queue.by_time.get(&(at, id)).cloned()
    }

    pub fn next_alarm(&self) -> Option<NextAlarm> {
        self.next_alarm.borrow().clone()
    }

    pub fn subscribe_next_alarm(&self) -> watch::Receiver<Option<NextAlarm>> {
        self.next_alarm.subscribe()
    }

    fn after_mutation(&self, queue: &mut Queue) {
        let now = self.clock.now();
        while let Some(due) = queue.pop_due(now) {
            debug!(alarm_id = due.id, kind = %due.kind, at = %due.at, "entry already due");
            if self.wakeups.send(Wakeup::Due(due)).is_err() {
                warn!("wake-up dispatcher is gone");
            }
        }

        let head = queue.head().map(|e| (e.id, e.at, e.kind));
        if head != queue.armed {
            match head {
                Some((id, at, _)) => self.timer.arm(at, id),
                None => self.timer.cancel(),
            }
            queue.armed = head;
        }

        let next = self.project_next(queue);
        self.next_alarm.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            trace!(next = ?next.as_ref().map(|n| n.at), "next alarm changed");
            *current = next;
            true
        });
    }

    fn project_next(&self, queue: &Queue) -> Option<NextAlarm> {
        let entry = queue.by_time.values().find(|e| e.kind.is_user_visible())?;
        let (at, estimated) = match entry.kind {
            CalendarType::PreAlarm => (
                entry.at + self.preferences.prealarm_duration().unwrap_or_else(Duration::zero),
                true,
            ),
            _ => (entry.at, false),
        };
        Some(NextAlarm {
            id: entry.id,
            at,
            estimated,
            value: entry.value.clone(),
        })
    }
}
