//! Core error types for reveille-core.
//!
//! This module defines the error hierarchy using thiserror for
//! error handling and reporting across the library.

use std::path::PathBuf;
use thiserror::Error;

use crate::alarm::AlarmId;

/// Core error type for reveille-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The registry does not know this alarm id.
    #[error("Alarm {0} not found")]
    AlarmNotFound(AlarmId),

    /// An event reached a state that has no interpretation for it.
    #[error("Alarm {id}: event '{event}' is not handled in state '{state}'")]
    UnhandledEvent {
        id: AlarmId,
        state: &'static str,
        event: &'static str,
    },

    /// A chain of complex transitions did not settle on a state.
    #[error("Alarm {id}: transition chain did not settle")]
    TransitionLoop { id: AlarmId },

    /// The registry (or one alarm mailbox) has shut down.
    #[error("Alarm registry is closed")]
    RegistryClosed,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// No persisted row for this id
    #[error("No stored alarm with id {0}")]
    NotFound(AlarmId),

    /// The store is not ready yet (e.g. still being provisioned)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Key does not exist in the configuration tree
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Could not determine the data directory
    #[error("Could not determine data directory: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Hour outside 0..=23
    #[error("Invalid hour {0}: must be within 0..=23")]
    Hour(u32),

    /// Minute outside 0..=59
    #[error("Invalid minute {0}: must be within 0..=59")]
    Minute(u32),

    /// Unparseable time of day
    #[error("Invalid time '{0}': expected HH:MM")]
    TimeOfDay(String),

    /// Unparseable days-of-week value
    #[error("Invalid days '{0}'")]
    Days(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Store(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
