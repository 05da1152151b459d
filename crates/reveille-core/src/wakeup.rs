//! Platform wake-up timer abstraction.
//!
//! The scheduler keeps exactly one absolute wake-up armed: the head of its
//! queue. When it expires the timer posts [`Wakeup::Expired`] back into the
//! registry's dispatcher, which asks the scheduler which entry that was.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::alarm::AlarmId;
use crate::clock::Clock;
use crate::scheduler::ScheduledAlarm;

/// Messages delivered to the registry's dispatcher task.
#[derive(Debug)]
pub enum Wakeup {
    /// The armed platform timer went off for this alarm.
    Expired(AlarmId),
    /// An entry was already due when it was queued.
    Due(ScheduledAlarm),
    /// Reply once every wake-up queued before this one has been routed.
    Barrier(oneshot::Sender<()>),
}

pub type WakeupSender = mpsc::UnboundedSender<Wakeup>;
pub type WakeupReceiver = mpsc::UnboundedReceiver<Wakeup>;

pub fn wakeup_channel() -> (WakeupSender, WakeupReceiver) {
    mpsc::unbounded_channel()
}

/// A single absolute wake-up. Arming again replaces the previous one.
pub trait WakeupTimer: Send + Sync + fmt::Debug {
    fn arm(&self, at: DateTime<Utc>, id: AlarmId);
    fn cancel(&self);
}

/// Wake-up timer backed by a sleeping tokio task.
#[derive(Debug)]
pub struct TokioWakeupTimer {
    clock: Arc<dyn Clock>,
    wakeups: WakeupSender,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TokioWakeupTimer {
    pub fn new(clock: Arc<dyn Clock>, wakeups: WakeupSender) -> Self {
        Self {
            clock,
            wakeups,
            pending: Mutex::new(None),
        }
    }
}

impl WakeupTimer for TokioWakeupTimer {
    fn arm(&self, at: DateTime<Utc>, id: AlarmId) {
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(alarm_id = id, "no async runtime, wake-up not armed");
            return;
        };
        debug!(alarm_id = id, %at, delay_ms = delay.as_millis() as u64, "arming wake-up");
        let wakeups = self.wakeups.clone();
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wakeups.send(Wakeup::Expired(id));
        }));
    }

    fn cancel(&self) {
        if let Some(previous) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            debug!("wake-up cancelled");
            previous.abort();
        }
    }
}

impl Drop for TokioWakeupTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Something the scheduler asked a [`ManualWakeupTimer`] to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    Arm { at: DateTime<Utc>, id: AlarmId },
    Cancel,
}

/// Records requests instead of sleeping. Tests fire it by hand.
#[derive(Debug, Default)]
pub struct ManualWakeupTimer {
    armed: Mutex<Option<(DateTime<Utc>, AlarmId)>>,
    history: Mutex<Vec<TimerRequest>>,
}

impl ManualWakeupTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently armed wake-up, if any.
    pub fn armed(&self) -> Option<(DateTime<Utc>, AlarmId)> {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn history(&self) -> Vec<TimerRequest> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, request: TimerRequest) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }
}

impl WakeupTimer for ManualWakeupTimer {
    fn arm(&self, at: DateTime<Utc>, id: AlarmId) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some((at, id));
        self.record(TimerRequest::Arm { at, id });
    }

    fn cancel(&self) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.record(TimerRequest::Cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::Duration;

    #[test]
    fn manual_timer_records_requests() {
        let timer = ManualWakeupTimer::new();
        let at = Utc::now();
        timer.arm(at, 3);
        assert_eq!(timer.armed(), Some((at, 3)));
        timer.cancel();
        assert_eq!(timer.armed(), None);
        assert_eq!(
            timer.history(),
            vec![TimerRequest::Arm { at, id: 3 }, TimerRequest::Cancel]
        );
    }

    #[tokio::test]
    async fn tokio_timer_posts_expiry() {
        let (tx, mut rx) = wakeup_channel();
        let timer = TokioWakeupTimer::new(Arc::new(SystemClock), tx);
        timer.arm(Utc::now() + Duration::milliseconds(10), 7);
        match rx.recv().await {
            Some(Wakeup::Expired(id)) => assert_eq!(id, 7),
            other => panic!("unexpected wake-up: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rearming_replaces_previous_wakeup() {
        let (tx, mut rx) = wakeup_channel();
        let timer = TokioWakeupTimer::new(Arc::new(SystemClock), tx);
        timer.arm(Utc::now() + Duration::milliseconds(20), 1);
        timer.arm(Utc::now() + Duration::milliseconds(40), 2);
        match rx.recv().await {
            Some(Wakeup::Expired(id)) => assert_eq!(id, 2),
            other => panic!("unexpected wake-up: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_timer_stays_quiet() {
        let (tx, mut rx) = wakeup_channel();
        let timer = TokioWakeupTimer::new(Arc::new(SystemClock), tx);
        timer.arm(Utc::now() + Duration::milliseconds(10), 1);
        timer.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }
}
