//! Per-alarm hierarchical state machine.
//!
//! States form a two-level tree: every state except `Disabled` and `Deleted`
//! is a child of an implicit `Enabled` parent. An event is offered to the
//! current state first; if it declines, the `Enabled` parent gets it (for
//! enabled states), and an event nobody claims is an error.
//!
//! Two pseudo-states decide where to go next without ever being current:
//! `Enable` (pre-alarm or plain set) and `Reschedule` (next occurrence or
//! disabled). A transition chain may pass through them any number of times
//! up to a fixed bound.
//!
//! Side effects of a chain are buffered and applied after the chain settles:
//! the container is written to the store and the shared list first, then
//! scheduler requests and broadcasts run in the order they were produced.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::calendar::{next_occurrence, prealarm_time, snooze_until};
use super::list::AlarmList;
use super::{AlarmId, AlarmState, AlarmValue};
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::{AlarmIntent, Notifier};
use crate::preferences::Preferences;
use crate::scheduler::{AlarmsScheduler, CalendarType};
use crate::storage::AlarmStore;

/// Longest chain of transitions a single event may trigger.
const MAX_TRANSITIONS: usize = 8;

/// Input to an alarm's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmEvent {
    Enable,
    Disable,
    /// Replace the user-editable fields.
    Change(AlarmValue),
    /// Snooze, optionally until an explicit wall-clock (hour, minute).
    Snooze(Option<(u32, u32)>),
    Dismiss,
    Delete,
    RequestSkip,
    /// Recompute armed times, e.g. after a time zone change.
    Refresh,
    /// The wall clock was set.
    TimeSet,
    PrealarmDurationChanged,
    /// A scheduler entry of this type came due.
    Fired(CalendarType),
}

impl AlarmEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Change(_) => "change",
            Self::Snooze(_) => "snooze",
            Self::Dismiss => "dismiss",
            Self::Delete => "delete",
            Self::RequestSkip => "request_skip",
            Self::Refresh => "refresh",
            Self::TimeSet => "time_set",
            Self::PrealarmDurationChanged => "prealarm_duration_changed",
            Self::Fired(_) => "fired",
        }
    }
}

impl fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fired(kind) => write!(f, "fired({kind})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Everything an alarm state machine talks to.
#[derive(Debug, Clone)]
pub struct CoreServices {
    pub scheduler: Arc<AlarmsScheduler>,
    pub store: Arc<dyn AlarmStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub preferences: Preferences,
    pub list: AlarmList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    State(AlarmState),
    Enable,
    Reschedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Claimed without changing state.
    Stay,
    Go(Target),
    Unhandled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Effect {
    Schedule {
        kind: CalendarType,
        at: DateTime<Utc>,
    },
    Unschedule,
    Broadcast(AlarmIntent),
}

/// State machine for one alarm.
///
/// Owned by exactly one task; nothing else touches the container.
#[derive(Debug)]
pub struct AlarmCore {
    container: AlarmValue,
    persisted: AlarmValue,
    services: CoreServices,
    effects: Vec<Effect>,
    snooze_request: Option<(u32, u32)>,
    now: DateTime<Utc>,
}

impl AlarmCore {
    /// Wrap a value that already exists in the store.
    pub fn new(value: AlarmValue, services: CoreServices) -> Self {
        let now = services.clock.now();
        Self {
            persisted: value.clone(),
            container: value,
            services,
            effects: Vec::new(),
            snooze_request: None,
            now,
        }
    }

    pub fn id(&self) -> AlarmId {
        self.container.id
    }

    pub fn state(&self) -> AlarmState {
        self.container.state
    }

    pub fn value(&self) -> &AlarmValue {
        &self.container
    }

    /// Pick up where a previous process left off.
    pub fn resume(&mut self) -> Result<()> {
        self.now = self.services.clock.now();
        let state = self.container.state;
        debug!(alarm_id = self.id(), %state, "resume");
        match state {
            AlarmState::Disabled | AlarmState::Deleted => {}
            AlarmState::Set | AlarmState::PreAlarmSet => {
                if let Some(follow) = self.enter(state) {
                    self.transition(follow)?;
                }
            }
            AlarmState::PreAlarmFired
            | AlarmState::Snoozed
            | AlarmState::PreAlarmSnoozed
            | AlarmState::Skipping => match self.container.next_time {
                Some(at) => {
                    let kind = if state == AlarmState::Skipping {
                        CalendarType::Skip
                    } else {
                        CalendarType::Normal
                    };
                    self.effects.push(Effect::Schedule { kind, at });
                }
                None => {
                    warn!(alarm_id = self.id(), %state, "no stored time to resume, re-enabling");
                    self.transition(Target::Enable)?;
                }
            },
            AlarmState::Fired => {
                self.effects.push(Effect::Broadcast(AlarmIntent::AlertFired));
                self.arm_auto_silence();
            }
        }
        self.commit();
        Ok(())
    }

    /// Run one event to completion.
    pub fn handle(&mut self, event: AlarmEvent) -> Result<()> {
        self.now = self.services.clock.now();
        let state = self.container.state;
        debug!(alarm_id = self.id(), %state, %event, "event");

        let result = self.dispatch(&event).and_then(|outcome| match outcome {
            Outcome::Go(target) => self.transition(target),
            Outcome::Stay | Outcome::Unhandled => Ok(()),
        });
        // A chain that failed part way still commits what it did.
        self.commit();
        result
    }

    fn dispatch(&mut self, event: &AlarmEvent) -> Result<Outcome> {
        let state = self.container.state;
        let mut outcome = self.on_state(state, event);
        if outcome == Outcome::Unhandled && state.is_enabled() {
            outcome = self.on_enabled(event);
        }
        match outcome {
            Outcome::Unhandled => Err(CoreError::UnhandledEvent {
                id: self.id(),
                state: state.as_str(),
                event: event.name(),
            }),
            other => Ok(other),
        }
    }

    fn on_state(&mut self, state: AlarmState, event: &AlarmEvent) -> Outcome {
        use AlarmEvent as E;
        use AlarmState as S;
        use Outcome::{Go, Stay, Unhandled};
        use Target::State as To;

        match (state, event) {
            (S::Disabled, E::Enable) => Go(Target::Enable),
            (S::Disabled, E::Change(edit)) => {
                self.apply_edit(edit);
                if self.container.enabled {
                    Go(Target::Enable)
                } else {
                    Stay
                }
            }
            (S::Disabled, E::Delete) => Go(To(S::Deleted)),
            (S::Disabled, E::Fired(kind)) => {
                warn!(alarm_id = self.id(), %kind, "wake-up for a disabled alarm ignored");
                Stay
            }
            (S::Disabled, _) => Stay,

            (S::Set, E::Fired(CalendarType::Normal)) => Go(To(S::Fired)),
            (S::PreAlarmSet, E::Fired(CalendarType::PreAlarm)) => Go(To(S::PreAlarmFired)),
            (S::Set | S::PreAlarmSet, E::PrealarmDurationChanged) => Go(Target::Enable),
            (S::Set | S::PreAlarmSet, E::RequestSkip) => {
                if self.container.days_of_week.is_repeat_set() {
                    Go(To(S::Skipping))
                } else {
                    Go(To(S::Disabled))
                }
            }

            (S::PreAlarmFired, E::Fired(CalendarType::Normal)) => Go(To(S::Fired)),
            (S::PreAlarmFired | S::PreAlarmSnoozed, E::Snooze(until)) => {
                self.snooze_request = *until;
                if until.is_some() {
                    Go(To(S::Snoozed))
                } else {
                    Go(To(S::PreAlarmSnoozed))
                }
            }

            (S::Fired, E::Fired(CalendarType::AutoSilence)) => {
                info!(alarm_id = self.id(), "alarm rang out");
                self.effects.push(Effect::Broadcast(AlarmIntent::SoundExpired));
                Go(Target::Reschedule)
            }
            (S::Fired | S::Snoozed, E::Snooze(until)) => {
                self.snooze_request = *until;
                Go(To(S::Snoozed))
            }

            (S::Snoozed | S::PreAlarmSnoozed, E::Fired(CalendarType::Normal)) => Go(To(S::Fired)),

            // Ringing and snoozed alarms keep their absolute times.
            (
                S::PreAlarmFired | S::Fired | S::Snoozed | S::PreAlarmSnoozed,
                E::Refresh | E::TimeSet | E::PrealarmDurationChanged,
            ) => Stay,

            (S::Skipping, E::Fired(CalendarType::Skip) | E::RequestSkip) => Go(Target::Enable),
            (S::Skipping, E::Refresh | E::TimeSet) => Go(To(S::Skipping)),
            (S::Skipping, E::PrealarmDurationChanged) => Stay,

            // A wake-up armed by an earlier state, delivered after the state
            // moved on.
            (_, E::Fired(kind)) if state != S::Deleted => {
                debug!(alarm_id = self.id(), %state, %kind, "stale wake-up ignored");
                Stay
            }

            (S::Deleted, E::Refresh | E::TimeSet | E::PrealarmDurationChanged) => Stay,
            (S::Deleted, other) => {
                debug!(alarm_id = self.id(), event = %other, "event for a deleted alarm ignored");
                Stay
            }

            _ => Unhandled,
        }
    }

    /// Shared behaviour of every enabled state.
    fn on_enabled(&mut self, event: &AlarmEvent) -> Outcome {
        match event {
            AlarmEvent::Enable => Outcome::Stay,
            AlarmEvent::Disable => Outcome::Go(Target::State(AlarmState::Disabled)),
            AlarmEvent::Change(edit) => {
                self.apply_edit(edit);
                if self.container.enabled {
                    Outcome::Go(Target::Enable)
                } else {
                    Outcome::Go(Target::State(AlarmState::Disabled))
                }
            }
            AlarmEvent::Dismiss => Outcome::Go(Target::Reschedule),
            AlarmEvent::Refresh | AlarmEvent::TimeSet => Outcome::Go(Target::Enable),
            AlarmEvent::Delete => Outcome::Go(Target::State(AlarmState::Deleted)),
            _ => Outcome::Unhandled,
        }
    }

    fn apply_edit(&mut self, edit: &AlarmValue) {
        self.container = self.container.clone().edited(edit);
    }

    fn transition(&mut self, mut target: Target) -> Result<()> {
        for _ in 0..MAX_TRANSITIONS {
            let next = match target {
                Target::Enable => {
                    target = self.enable_transition();
                    continue;
                }
                Target::Reschedule => {
                    target = self.reschedule_transition();
                    continue;
                }
                Target::State(next) => next,
            };

            let from = self.container.state;
            debug!(alarm_id = self.id(), %from, to = %next, "transition");
            self.exit(from, next);
            self.container = self.container.clone().with_state(next);
            match self.enter(next) {
                Some(follow) => target = follow,
                None => return Ok(()),
            }
        }
        error!(alarm_id = self.id(), "transition chain did not settle");
        Err(CoreError::TransitionLoop { id: self.id() })
    }

    /// Pre-alarm if the alarm wants one and it still fits before the main
    /// time, otherwise plain set.
    fn enable_transition(&self) -> Target {
        let offset = self.services.preferences.prealarm_duration();
        let fits = match offset {
            Some(offset) if self.container.prealarm => {
                prealarm_time(self.main_time(), offset) > self.now
            }
            _ => false,
        };
        if fits {
            Target::State(AlarmState::PreAlarmSet)
        } else {
            Target::State(AlarmState::Set)
        }
    }

    fn reschedule_transition(&self) -> Target {
        if self.container.days_of_week.is_repeat_set() {
            Target::Enable
        } else {
            Target::State(AlarmState::Disabled)
        }
    }

    fn main_time(&self) -> DateTime<Utc> {
        next_occurrence(
            self.services.clock.as_ref(),
            self.now,
            self.container.time_of_day(),
            self.container.days_of_week,
        )
    }

    fn exit(&mut self, from: AlarmState, to: AlarmState) {
        let armed = from.arms_on_enter() || from == AlarmState::Fired;
        if armed && !to.arms_on_enter() {
            self.effects.push(Effect::Unschedule);
        }
        match from {
            AlarmState::Fired if !to.is_snoozed() => {
                self.effects.push(Effect::Broadcast(AlarmIntent::AlertDismissed));
            }
            AlarmState::Snoozed | AlarmState::PreAlarmSnoozed => {
                self.effects.push(Effect::Broadcast(AlarmIntent::CancelSnooze));
            }
            AlarmState::Skipping => {
                self.effects.push(Effect::Broadcast(AlarmIntent::RemoveSkipNotice));
            }
            _ => {}
        }
    }

    /// Entry actions. Returns where to go next when the state cannot hold.
    fn enter(&mut self, state: AlarmState) -> Option<Target> {
        match state {
            AlarmState::Disabled => {
                self.container.enabled = false;
                self.container.next_time = None;
                None
            }
            AlarmState::Set => {
                let at = self.main_time();
                self.container.enabled = true;
                self.schedule(CalendarType::Normal, at);
                None
            }
            AlarmState::PreAlarmSet => {
                let main = self.main_time();
                let pre = self
                    .services
                    .preferences
                    .prealarm_duration()
                    .map(|offset| prealarm_time(main, offset))
                    .filter(|pre| *pre > self.now);
                match pre {
                    Some(at) => {
                        self.container.enabled = true;
                        self.schedule(CalendarType::PreAlarm, at);
                        None
                    }
                    None => {
                        warn!(alarm_id = self.id(), "pre-alarm time already passed");
                        Some(Target::Enable)
                    }
                }
            }
            AlarmState::PreAlarmFired => {
                self.effects.push(Effect::Broadcast(AlarmIntent::PrealarmFired));
                let main = self.main_time();
                self.schedule(CalendarType::Normal, main);
                None
            }
            AlarmState::Fired => {
                info!(alarm_id = self.id(), "alarm ringing");
                self.effects.push(Effect::Broadcast(AlarmIntent::AlertFired));
                self.arm_auto_silence();
                None
            }
            AlarmState::Snoozed => {
                let at = self.snooze_time();
                self.effects.push(Effect::Broadcast(AlarmIntent::Snoozed));
                self.schedule(CalendarType::Normal, at);
                None
            }
            AlarmState::PreAlarmSnoozed => {
                // Never ring later than the main alarm would have.
                let main = self.main_time();
                let at = self.snooze_time().min(main);
                self.effects.push(Effect::Broadcast(AlarmIntent::Snoozed));
                self.schedule(CalendarType::Normal, at);
                None
            }
            AlarmState::Skipping => {
                let skipped = self.main_time();
                self.effects.push(Effect::Broadcast(AlarmIntent::ShowSkipNotice));
                self.schedule(CalendarType::Skip, skipped);
                None
            }
            AlarmState::Deleted => {
                self.effects.push(Effect::Unschedule);
                None
            }
        }
    }

    fn snooze_time(&mut self) -> DateTime<Utc> {
        snooze_until(
            self.services.clock.as_ref(),
            self.now,
            self.snooze_request.take(),
            self.services.preferences.snooze_duration(),
        )
    }

    fn arm_auto_silence(&mut self) {
        match self.services.preferences.auto_silence_duration() {
            Some(timeout) => self.schedule(CalendarType::AutoSilence, self.now + timeout),
            None => self.container.next_time = None,
        }
    }

    fn schedule(&mut self, kind: CalendarType, at: DateTime<Utc>) {
        self.container.next_time = Some(at);
        self.effects.push(Effect::Schedule { kind, at });
    }

    /// Write the container out, then run buffered effects in order.
    fn commit(&mut self) {
        let id = self.id();
        if self.container.state == AlarmState::Deleted {
            if self.persisted.state != AlarmState::Deleted {
                if let Err(e) = self.services.store.delete(id) {
                    error!(alarm_id = id, error = %e, "failed to delete alarm row");
                }
                self.services.list.remove(id);
                self.persisted = self.container.clone();
                info!(alarm_id = id, "alarm deleted");
            }
        } else if self.container != self.persisted {
            if let Err(e) = self.services.store.persist(&self.container) {
                error!(alarm_id = id, error = %e, "failed to persist alarm");
            }
            self.services.list.upsert(self.container.clone());
            self.persisted = self.container.clone();
        }

        for effect in std::mem::take(&mut self.effects) {
            match effect {
                Effect::Schedule { kind, at } => {
                    self.services
                        .scheduler
                        .set_alarm(id, kind, at, Some(self.container.clone()));
                }
                Effect::Unschedule => self.services.scheduler.remove_alarm(id),
                Effect::Broadcast(intent) => self.services.notifier.broadcast(id, intent),
            }
        }
    }
}

/// Message in an alarm's mailbox.
#[derive(Debug)]
pub(crate) enum Envelope {
    Event(AlarmEvent),
    /// Answered once everything queued before it has been handled.
    Barrier(oneshot::Sender<()>),
}

/// Mailbox loop owning one [`AlarmCore`]. Ends when every sender is gone.
pub(crate) async fn run_core(
    mut core: AlarmCore,
    mut mailbox: mpsc::UnboundedReceiver<Envelope>,
    resume: bool,
) {
    if resume {
        if let Err(e) = core.resume() {
            error!(alarm_id = core.id(), error = %e, "resume failed");
        }
    }
    while let Some(envelope) = mailbox.recv().await {
        match envelope {
            Envelope::Event(event) => {
                if let Err(e) = core.handle(event) {
                    error!(alarm_id = core.id(), error = %e, "event failed");
                }
            }
            Envelope::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(alarm_id = core.id(), state = %core.state(), "alarm task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::DaysOfWeek;
    use crate::clock::ManualClock;
    use crate::events::BroadcastNotifier;
    use crate::storage::MemoryAlarmStore;
    use crate::wakeup::{wakeup_channel, ManualWakeupTimer, Wakeup, WakeupReceiver};
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use tokio::sync::broadcast;

    // 2024-03-04 is a Monday.
    fn local(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryAlarmStore>,
        scheduler: Arc<AlarmsScheduler>,
        prefs: Preferences,
        intents: broadcast::Receiver<crate::events::Broadcast>,
        wakeups: WakeupReceiver,
        services: CoreServices,
    }

    impl Fixture {
        fn new(now: NaiveDateTime) -> Self {
            let clock = Arc::new(ManualClock::at_local(now));
            let store = Arc::new(MemoryAlarmStore::new());
            let notifier = Arc::new(BroadcastNotifier::new(64));
            let intents = notifier.subscribe();
            let prefs = Preferences::new(30, 10, 10);
            let (tx, wakeups) = wakeup_channel();
            let scheduler = Arc::new(AlarmsScheduler::new(
                clock.clone(),
                Arc::new(ManualWakeupTimer::new()),
                tx,
                prefs.clone(),
            ));
            let services = CoreServices {
                scheduler: scheduler.clone(),
                store: store.clone(),
                notifier,
                clock: clock.clone(),
                preferences: prefs.clone(),
                list: AlarmList::new(),
            };
            Self {
                clock,
                store,
                scheduler,
                prefs,
                intents,
                wakeups,
                services,
            }
        }

        fn core(&self, value: AlarmValue) -> AlarmCore {
            let id = self.store.create(&value).unwrap();
            AlarmCore::new(AlarmValue { id, ..value }, self.services.clone())
        }

        fn intents(&mut self) -> Vec<AlarmIntent> {
            let mut out = Vec::new();
            while let Ok(b) = self.intents.try_recv() {
                out.push(b.intent);
            }
            out
        }

        fn entry(&self, id: AlarmId) -> Option<(CalendarType, NaiveDateTime)> {
            self.scheduler
                .entry(id)
                .map(|e| (e.kind, self.clock.local(e.at)))
        }

        fn due(&mut self) -> Vec<(AlarmId, CalendarType)> {
            let mut out = Vec::new();
            while let Ok(w) = self.wakeups.try_recv() {
                if let Wakeup::Due(e) = w {
                    out.push((e.id, e.kind));
                }
            }
            out
        }
    }

    #[test]
    fn enabling_past_time_arms_tomorrow() {
        let f = Fixture::new(local(4, 9, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        assert_eq!(core.state(), AlarmState::Set);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(5, 8, 0))));
        let stored = f.store.get(core.id()).unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.state, AlarmState::Set);
    }

    #[test]
    fn prealarm_that_does_not_fit_goes_straight_to_set() {
        let f = Fixture::new(local(4, 7, 55));
        f.prefs.set_prealarm_minutes(10);
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_prealarm(true));
        core.handle(AlarmEvent::Enable).unwrap();
        assert_eq!(core.state(), AlarmState::Set);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 8, 0))));
    }

    #[test]
    fn prealarm_flow_fires_then_rings() {
        let mut f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_prealarm(true));
        core.handle(AlarmEvent::Enable).unwrap();
        assert_eq!(core.state(), AlarmState::PreAlarmSet);
        assert_eq!(f.entry(core.id()), Some((CalendarType::PreAlarm, local(4, 7, 30))));

        f.clock.set_local(local(4, 7, 30));
        core.handle(AlarmEvent::Fired(CalendarType::PreAlarm)).unwrap();
        assert_eq!(core.state(), AlarmState::PreAlarmFired);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 8, 0))));

        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        assert_eq!(core.state(), AlarmState::Fired);
        assert_eq!(
            f.intents(),
            vec![AlarmIntent::PrealarmFired, AlarmIntent::AlertFired]
        );
    }

    #[test]
    fn prealarm_duration_change_reschedules() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_prealarm(true));
        core.handle(AlarmEvent::Enable).unwrap();
        f.prefs.set_prealarm_minutes(15);
        core.handle(AlarmEvent::PrealarmDurationChanged).unwrap();
        assert_eq!(f.entry(core.id()), Some((CalendarType::PreAlarm, local(4, 7, 45))));

        f.prefs.set_prealarm_minutes(0);
        core.handle(AlarmEvent::PrealarmDurationChanged).unwrap();
        assert_eq!(core.state(), AlarmState::Set);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 8, 0))));
    }

    #[test]
    fn auto_silence_rings_out_and_reschedules() {
        let mut f = Fixture::new(local(4, 6, 0));
        f.prefs.set_auto_silence_minutes(5);
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_days(DaysOfWeek::EVERY_DAY));
        core.handle(AlarmEvent::Enable).unwrap();

        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        assert_eq!(f.entry(core.id()), Some((CalendarType::AutoSilence, local(4, 8, 5))));

        f.clock.set_local(local(4, 8, 5));
        core.handle(AlarmEvent::Fired(CalendarType::AutoSilence)).unwrap();
        assert_eq!(core.state(), AlarmState::Set);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(5, 8, 0))));
        assert_eq!(
            f.intents(),
            vec![
                AlarmIntent::AlertFired,
                AlarmIntent::SoundExpired,
                AlarmIntent::AlertDismissed
            ]
        );
    }

    #[test]
    fn no_auto_silence_when_disabled() {
        let f = Fixture::new(local(4, 6, 0));
        f.prefs.set_auto_silence_minutes(-1);
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        assert_eq!(f.entry(core.id()), None);
    }

    #[test]
    fn dismissing_one_shot_alarm_disables_it() {
        let mut f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        core.handle(AlarmEvent::Dismiss).unwrap();
        assert_eq!(core.state(), AlarmState::Disabled);
        assert!(!core.value().enabled);
        assert_eq!(f.entry(core.id()), None);
        assert_eq!(
            f.intents(),
            vec![AlarmIntent::AlertFired, AlarmIntent::AlertDismissed]
        );
    }

    #[test]
    fn snooze_until_past_time_uses_duration() {
        let mut f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        core.handle(AlarmEvent::Snooze(Some((7, 0)))).unwrap();
        assert_eq!(core.state(), AlarmState::Snoozed);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 8, 10))));
        // Snoozing does not dismiss.
        assert_eq!(f.intents(), vec![AlarmIntent::AlertFired, AlarmIntent::Snoozed]);

        f.clock.set_local(local(4, 8, 10));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        assert_eq!(core.state(), AlarmState::Fired);
        assert_eq!(
            f.intents(),
            vec![AlarmIntent::CancelSnooze, AlarmIntent::AlertFired]
        );
    }

    #[test]
    fn prealarm_snooze_never_passes_main_time() {
        let f = Fixture::new(local(4, 6, 0));
        f.prefs.set_snooze_minutes(45);
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_prealarm(true));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 7, 30));
        core.handle(AlarmEvent::Fired(CalendarType::PreAlarm)).unwrap();
        core.handle(AlarmEvent::Snooze(None)).unwrap();
        assert_eq!(core.state(), AlarmState::PreAlarmSnoozed);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 8, 0))));
    }

    #[test]
    fn prealarm_snooze_with_explicit_time_is_a_plain_snooze() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_prealarm(true));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 7, 30));
        core.handle(AlarmEvent::Fired(CalendarType::PreAlarm)).unwrap();
        core.handle(AlarmEvent::Snooze(Some((7, 40)))).unwrap();
        assert_eq!(core.state(), AlarmState::Snoozed);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 7, 40))));
    }

    #[test]
    fn second_prealarm_snooze_is_capped_at_main_time() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_prealarm(true));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 7, 30));
        core.handle(AlarmEvent::Fired(CalendarType::PreAlarm)).unwrap();
        core.handle(AlarmEvent::Snooze(None)).unwrap();
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 7, 40))));

        f.clock.set_local(local(4, 7, 35));
        core.handle(AlarmEvent::Snooze(None)).unwrap();
        assert_eq!(core.state(), AlarmState::PreAlarmSnoozed);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 7, 45))));

        f.clock.set_local(local(4, 7, 55));
        core.handle(AlarmEvent::Snooze(None)).unwrap();
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 8, 0))));
    }

    #[test]
    fn auto_silence_arriving_after_snooze_is_ignored() {
        let mut f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        f.clock.set_local(local(4, 8, 5));
        core.handle(AlarmEvent::Snooze(None)).unwrap();

        core.handle(AlarmEvent::Fired(CalendarType::AutoSilence)).unwrap();
        assert_eq!(core.state(), AlarmState::Snoozed);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 8, 15))));
        assert_eq!(f.intents(), vec![AlarmIntent::AlertFired, AlarmIntent::Snoozed]);
    }

    #[test]
    fn auto_silence_arriving_after_dismiss_does_not_ring() {
        let mut f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_days(DaysOfWeek::EVERY_DAY));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        f.clock.set_local(local(4, 8, 5));
        core.handle(AlarmEvent::Dismiss).unwrap();

        core.handle(AlarmEvent::Fired(CalendarType::AutoSilence)).unwrap();
        assert_eq!(core.state(), AlarmState::Set);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(5, 8, 0))));
        assert_eq!(
            f.intents(),
            vec![AlarmIntent::AlertFired, AlarmIntent::AlertDismissed]
        );
    }

    #[test]
    fn skip_then_skip_entry_fires_back_to_set() {
        let mut f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0).with_days(DaysOfWeek::WEEKDAYS));
        core.handle(AlarmEvent::Enable).unwrap();
        core.handle(AlarmEvent::RequestSkip).unwrap();
        assert_eq!(core.state(), AlarmState::Skipping);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Skip, local(4, 8, 0))));
        assert!(f.scheduler.next_alarm().is_none());

        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Skip)).unwrap();
        assert_eq!(core.state(), AlarmState::Set);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(5, 8, 0))));
        assert_eq!(
            f.intents(),
            vec![AlarmIntent::ShowSkipNotice, AlarmIntent::RemoveSkipNotice]
        );
    }

    #[test]
    fn skipping_a_one_shot_alarm_disables_it() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        core.handle(AlarmEvent::RequestSkip).unwrap();
        assert_eq!(core.state(), AlarmState::Disabled);
    }

    #[test]
    fn change_while_set_recomputes() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        let edit = core.value().clone().with_time(7, 15).with_label("earlier");
        core.handle(AlarmEvent::Change(edit)).unwrap();
        assert_eq!(core.state(), AlarmState::Set);
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(4, 7, 15))));
        assert_eq!(f.store.get(core.id()).unwrap().label, "earlier");
    }

    #[test]
    fn change_to_disabled_unschedules() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        let edit = core.value().clone().with_enabled(false);
        core.handle(AlarmEvent::Change(edit)).unwrap();
        assert_eq!(core.state(), AlarmState::Disabled);
        assert_eq!(f.entry(core.id()), None);
    }

    #[test]
    fn change_while_disabled_only_persists() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        let edit = core.value().clone().with_time(9, 0);
        core.handle(AlarmEvent::Change(edit)).unwrap();
        assert_eq!(core.state(), AlarmState::Disabled);
        assert_eq!(f.store.get(core.id()).unwrap().hour, 9);
        assert!(f.scheduler.entries().is_empty());
    }

    #[test]
    fn delete_removes_row_and_entry() {
        let mut f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        core.handle(AlarmEvent::Delete).unwrap();
        assert_eq!(core.state(), AlarmState::Deleted);
        assert!(f.store.get(core.id()).is_none());
        assert_eq!(f.entry(core.id()), None);
        assert_eq!(
            f.intents(),
            vec![AlarmIntent::AlertFired, AlarmIntent::AlertDismissed]
        );
        core.handle(AlarmEvent::Refresh).unwrap();
        core.handle(AlarmEvent::Enable).unwrap();
        assert_eq!(core.state(), AlarmState::Deleted);
    }

    #[test]
    fn unhandled_event_is_an_error_and_keeps_state() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        let err = core.handle(AlarmEvent::Snooze(None)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnhandledEvent {
                state: "set",
                event: "snooze",
                ..
            }
        ));
        assert_eq!(core.state(), AlarmState::Set);
    }

    #[test]
    fn refresh_while_ringing_keeps_ringing() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 8, 0));
        core.handle(AlarmEvent::Fired(CalendarType::Normal)).unwrap();
        core.handle(AlarmEvent::TimeSet).unwrap();
        assert_eq!(core.state(), AlarmState::Fired);
    }

    #[test]
    fn time_set_recomputes_armed_alarm() {
        let f = Fixture::new(local(4, 6, 0));
        let mut core = f.core(AlarmValue::new(0, 8, 0));
        core.handle(AlarmEvent::Enable).unwrap();
        f.clock.set_local(local(4, 9, 0));
        core.handle(AlarmEvent::TimeSet).unwrap();
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(5, 8, 0))));
    }

    #[test]
    fn resume_rearms_stored_snooze() {
        let mut f = Fixture::new(local(4, 8, 20));
        let snoozed_until = f.clock.now() - Duration::minutes(5);
        let mut core = f.core(
            AlarmValue::new(0, 8, 0)
                .with_enabled(true)
                .with_state(AlarmState::Snoozed)
                .with_next_time(Some(snoozed_until)),
        );
        core.resume().unwrap();
        // Already past: delivered straight to the dispatcher.
        assert_eq!(f.due(), vec![(core.id(), CalendarType::Normal)]);
    }

    #[test]
    fn resume_of_ringing_alarm_rebroadcasts() {
        let mut f = Fixture::new(local(4, 8, 2));
        let mut core = f.core(
            AlarmValue::new(0, 8, 0)
                .with_enabled(true)
                .with_state(AlarmState::Fired),
        );
        core.resume().unwrap();
        assert_eq!(f.intents(), vec![AlarmIntent::AlertFired]);
        assert_eq!(f.entry(core.id()), Some((CalendarType::AutoSilence, local(4, 8, 12))));
    }

    #[test]
    fn resume_recomputes_set_alarm() {
        let f = Fixture::new(local(4, 9, 0));
        let mut core = f.core(
            AlarmValue::new(0, 8, 0)
                .with_enabled(true)
                .with_state(AlarmState::Set),
        );
        core.resume().unwrap();
        assert_eq!(f.entry(core.id()), Some((CalendarType::Normal, local(5, 8, 0))));
        assert!(f.services.list.get(core.id()).is_some());
    }
}
