mod config;
pub mod database;
mod memory;
pub mod migrations;

pub use config::{AlarmConfig, Config, StartupConfig};
pub use database::SqliteAlarmStore;
pub use memory::MemoryAlarmStore;

use std::fmt;
use std::path::PathBuf;

use crate::alarm::{AlarmId, AlarmValue};
use crate::error::{ConfigError, StoreError};

/// Persistence for alarm rows.
///
/// Implementations are shared between every alarm task, so each call must be
/// safe to make concurrently.
pub trait AlarmStore: Send + Sync + fmt::Debug {
    /// All stored alarms, in id order.
    fn load_all(&self) -> Result<Vec<AlarmValue>, StoreError>;

    /// Insert a new row and return its id. The `id` field of `value` is
    /// ignored.
    fn create(&self, value: &AlarmValue) -> Result<AlarmId, StoreError>;

    /// Overwrite the row for `value.id`.
    fn persist(&self, value: &AlarmValue) -> Result<(), StoreError>;

    fn delete(&self, id: AlarmId) -> Result<(), StoreError>;
}

/// Returns `~/.config/reveille[-dev]/` based on REVEILLE_ENV.
///
/// Set REVEILLE_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("REVEILLE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("reveille-dev")
    } else {
        base_dir.join("reveille")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
