use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{AlarmId, AlarmValue};

/// Display order: every-day alarms first, then weekdays, weekends and the
/// rest, each group by time of day. Stable, so ties keep id order.
pub fn sort_for_display(alarms: &mut [AlarmValue]) {
    alarms.sort_by_key(|a| (a.days_of_week.repeat_priority(), a.hour, a.minutes));
}

/// The latest committed value of every live alarm, shared between the alarm
/// tasks (writers) and the registry (readers).
#[derive(Debug, Clone, Default)]
pub struct AlarmList {
    inner: Arc<RwLock<BTreeMap<AlarmId, AlarmValue>>>,
}

impl AlarmList {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn upsert(&self, value: AlarmValue) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value.id, value);
    }

    pub(crate) fn remove(&self, id: AlarmId) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn get(&self, id: AlarmId) -> Option<AlarmValue> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot in display order.
    pub fn sorted(&self) -> Vec<AlarmValue> {
        let mut alarms: Vec<AlarmValue> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sort_for_display(&mut alarms);
        alarms
    }
}
