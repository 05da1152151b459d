use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::alarm::AlarmId;

/// Signals the alarm state machine sends to the presentation layer
/// (notifications, sound, vibration). Fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlarmIntent {
    AlertFired,
    AlertDismissed,
    PrealarmFired,
    Snoozed,
    CancelSnooze,
    SoundExpired,
    ShowSkipNotice,
    RemoveSkipNotice,
}

impl AlarmIntent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlertFired => "alert-fired",
            Self::AlertDismissed => "alert-dismissed",
            Self::PrealarmFired => "prealarm-fired",
            Self::Snoozed => "snoozed",
            Self::CancelSnooze => "cancel-snooze",
            Self::SoundExpired => "sound-expired",
            Self::ShowSkipNotice => "show-skip-notice",
            Self::RemoveSkipNotice => "remove-skip-notice",
        }
    }
}

impl fmt::Display for AlarmIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivered broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
    pub alarm_id: AlarmId,
    pub intent: AlarmIntent,
    pub at: DateTime<Utc>,
}

/// Receives state machine broadcasts.
pub trait Notifier: Send + Sync + fmt::Debug {
    fn broadcast(&self, alarm_id: AlarmId, intent: AlarmIntent);
}

/// Fans broadcasts out to any number of subscribers and logs each one.
///
/// Broadcasting with no subscriber attached is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Broadcast>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for BroadcastNotifier {
    fn broadcast(&self, alarm_id: AlarmId, intent: AlarmIntent) {
        info!(alarm_id, %intent, "broadcast");
        let _ = self.tx.send(Broadcast {
            alarm_id,
            intent,
            at: Utc::now(),
        });
    }
}
