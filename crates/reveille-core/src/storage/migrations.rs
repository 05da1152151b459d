//! Database schema migrations for reveille.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::{debug, warn};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 1;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: alarms table.
///
/// `AUTOINCREMENT` keeps ids of deleted alarms from being handed out again.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS alarms (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            hour         INTEGER NOT NULL,
            minutes      INTEGER NOT NULL,
            days_of_week INTEGER NOT NULL DEFAULT 0,
            enabled      INTEGER NOT NULL DEFAULT 0,
            label        TEXT NOT NULL DEFAULT '',
            prealarm     INTEGER NOT NULL DEFAULT 0,
            alert        TEXT NOT NULL DEFAULT 'default',
            vibrate      INTEGER NOT NULL DEFAULT 1,
            state        TEXT NOT NULL DEFAULT 'disabled',
            next_time    TEXT
        );",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()?;
    debug!("schema migrated to v1");
    Ok(())
}
