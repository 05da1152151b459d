use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::AlarmStore;
use crate::alarm::{AlarmId, AlarmValue};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Rows {
    alarms: BTreeMap<AlarmId, AlarmValue>,
    last_id: AlarmId,
}

/// Volatile alarm store.
///
/// `failing_loads` makes the first N `load_all` calls report the store as
/// unavailable, for exercising the startup retry.
#[derive(Debug, Default)]
pub struct MemoryAlarmStore {
    rows: Mutex<Rows>,
    failing_loads: AtomicUsize,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `alarms`, keeping their ids.
    pub fn with_alarms(alarms: impl IntoIterator<Item = AlarmValue>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.lock().unwrap_or_else(PoisonError::into_inner);
            for alarm in alarms {
                rows.last_id = rows.last_id.max(alarm.id);
                rows.alarms.insert(alarm.id, alarm);
            }
        }
        store
    }

    pub fn failing_loads(self, count: usize) -> Self {
        self.failing_loads.store(count, Ordering::SeqCst);
        self
    }

    pub fn get(&self, id: AlarmId) -> Option<AlarmValue> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .alarms
            .get(&id)
            .cloned()
    }
}

impl AlarmStore for MemoryAlarmStore {
    fn load_all(&self) -> Result<Vec<AlarmValue>, StoreError> {
        let remaining = self.failing_loads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_loads.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("store not ready".into()));
        }
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.alarms.values().cloned().collect())
    }

    fn create(&self, value: &AlarmValue) -> Result<AlarmId, StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.last_id += 1;
        let id = rows.last_id;
        rows.alarms.insert(
            id,
            AlarmValue {
                id,
                ..value.clone()
            },
        );
        Ok(id)
    }

    fn persist(&self, value: &AlarmValue) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        match rows.alarms.get_mut(&value.id) {
            Some(row) => {
                *row = value.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(value.id)),
        }
    }

    fn delete(&self, id: AlarmId) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.alarms
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
