//! SQLite-backed alarm storage.
//!
//! One row per alarm in the `alarms` table. Instants are stored as RFC 3339
//! text, the state as its snake_case name.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

use super::{data_dir, migrations, AlarmStore};
use crate::alarm::{Alert, AlarmId, AlarmState, AlarmValue, DaysOfWeek};
use crate::error::{ConfigError, StoreError};

const SELECT_COLUMNS: &str = "id, hour, minutes, days_of_week, enabled, label, alert, vibrate, \
                              prealarm, state, next_time";

/// SQLite database for alarm rows.
pub struct SqliteAlarmStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteAlarmStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAlarmStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteAlarmStore {
    /// Open the database at `~/.config/reveille/reveille.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unavailable or the database
    /// cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let dir = data_dir().map_err(|e: ConfigError| StoreError::Unavailable(e.to_string()))?;
        Self::open_at(dir.join("reveille.db"))
    }

    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|source| StoreError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "opened alarm database");
        Self::with_connection(conn, Some(path))
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a single alarm.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if no row has this id.
    pub fn load(&self, id: AlarmId) -> Result<AlarmValue, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM alarms WHERE id = ?1");
        conn.query_row(&sql, [id], row_to_alarm)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id),
                other => other.into(),
            })
    }
}

fn row_to_alarm(row: &Row<'_>) -> rusqlite::Result<AlarmValue> {
    let id: AlarmId = row.get(0)?;
    let state: String = row.get(9)?;
    let state = state.parse::<AlarmState>().unwrap_or_else(|_| {
        warn!(alarm_id = id, state = %state, "unknown stored state, treating as disabled");
        AlarmState::Disabled
    });
    let next_time: Option<String> = row.get(10)?;
    let next_time = next_time.and_then(|s| match DateTime::parse_from_rfc3339(&s) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            warn!(alarm_id = id, error = %e, "unparseable next_time dropped");
            None
        }
    });
    Ok(AlarmValue {
        id,
        hour: row.get(1)?,
        minutes: row.get(2)?,
        days_of_week: DaysOfWeek::new(row.get(3)?),
        enabled: row.get(4)?,
        label: row.get(5)?,
        alert: Alert::from(row.get::<_, String>(6)?),
        vibrate: row.get(7)?,
        prealarm: row.get(8)?,
        state,
        next_time,
    })
}

impl AlarmStore for SqliteAlarmStore {
    fn load_all(&self) -> Result<Vec<AlarmValue>, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM alarms ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_alarm)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn create(&self, value: &AlarmValue) -> Result<AlarmId, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO alarms (hour, minutes, days_of_week, enabled, label, alert, vibrate,
                                 prealarm, state, next_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                value.hour,
                value.minutes,
                value.days_of_week.coded(),
                value.enabled,
                value.label,
                value.alert.to_string(),
                value.vibrate,
                value.prealarm,
                value.state.as_str(),
                value.next_time.map(|t| t.to_rfc3339()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(alarm_id = id, "alarm row created");
        Ok(id)
    }

    fn persist(&self, value: &AlarmValue) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE alarms
             SET hour = ?2, minutes = ?3, days_of_week = ?4, enabled = ?5, label = ?6,
                 alert = ?7, vibrate = ?8, prealarm = ?9, state = ?10, next_time = ?11
             WHERE id = ?1",
            params![
                value.id,
                value.hour,
                value.minutes,
                value.days_of_week.coded(),
                value.enabled,
                value.label,
                value.alert.to_string(),
                value.vibrate,
                value.prealarm,
                value.state.as_str(),
                value.next_time.map(|t| t.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(value.id));
        }
        Ok(())
    }

    fn delete(&self, id: AlarmId) -> Result<(), StoreError> {
        let changed = self.conn().execute("DELETE FROM alarms WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        debug!(alarm_id = id, "alarm row deleted");
        Ok(())
    }
}
