//! Alarms survive a restart: persisted by one registry, resumed by the next.

mod common;

use std::sync::Arc;

use common::{local, Harness};
use reveille_core::{
    AlarmState, AlarmStore, AlarmValue, CalendarType, DaysOfWeek, SqliteAlarmStore,
};

#[tokio::test]
async fn test_persist_and_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reveille.db");

    let (id, first_next) = {
        let store = Arc::new(SqliteAlarmStore::open_at(&path).unwrap());
        let h = Harness::start(local(4, 6, 0), store.clone()).await;
        let template = AlarmValue::new(0, 7, 15)
            .with_days(DaysOfWeek::WEEKDAYS)
            .with_label("work")
            .with_enabled(true);
        let id = h.alarms.create_alarm(template).unwrap().id;
        h.alarms.settle().await;
        let value = h.alarms.get(id).unwrap();
        h.alarms.shutdown().await;
        (id, value.next_time)
    };

    let store = SqliteAlarmStore::open_at(&path).unwrap();
    let rows = store.load_all().unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.id, id);
    assert_eq!((row.hour, row.minutes), (7, 15));
    assert_eq!(row.days_of_week, DaysOfWeek::WEEKDAYS);
    assert_eq!(row.label, "work");
    assert!(row.enabled);
    assert_eq!(row.state, AlarmState::Set);
    assert_eq!(row.next_time, first_next);

    // A second process resumes the alarm and arms the same time.
    let h = Harness::start(local(4, 6, 30), Arc::new(store)).await;
    assert_eq!(h.entry(id), Some((CalendarType::Normal, local(4, 7, 15))));
    assert_eq!(h.alarms.get(id).unwrap().next_time, first_next);
}

#[tokio::test]
async fn test_resume_fires_snooze_that_ended_while_down() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reveille.db");

    let id = {
        let store = Arc::new(SqliteAlarmStore::open_at(&path).unwrap());
        let h = Harness::start(local(4, 7, 0), store).await;
        let id = h
            .alarms
            .create_alarm(AlarmValue::new(0, 8, 0).with_enabled(true))
            .unwrap()
            .id;
        h.alarms.settle().await;
        h.fire_armed().await;
        h.alarms.snooze(id).unwrap();
        h.alarms.settle().await;
        assert_eq!(h.alarms.get(id).unwrap().state, AlarmState::Snoozed);
        h.alarms.shutdown().await;
        id
    };

    // Back up after the snooze ended.
    let store = Arc::new(SqliteAlarmStore::open_at(&path).unwrap());
    let h = Harness::start(local(4, 8, 30), store).await;
    assert_eq!(h.alarms.get(id).unwrap().state, AlarmState::Fired);
}

#[tokio::test]
async fn test_deleted_alarm_stays_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reveille.db");

    let store = Arc::new(SqliteAlarmStore::open_at(&path).unwrap());
    let h = Harness::start(local(4, 6, 0), store.clone()).await;
    let keep = h.alarms.create_new_alarm().unwrap().id;
    let gone = h.alarms.create_new_alarm().unwrap().id;
    h.alarms.delete(gone).unwrap();
    h.alarms.settle().await;
    h.alarms.shutdown().await;

    let ids: Vec<_> = store.load_all().unwrap().iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![keep]);
}
