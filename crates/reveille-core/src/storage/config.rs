//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Pre-alarm, snooze and auto-silence durations
//! - The alert used for new alarms
//! - Startup behaviour of the alarm registry
//!
//! Configuration is stored at `~/.config/reveille/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;

/// Alarm behaviour. Durations are in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Minutes between the pre-alarm and the main alarm; `<= 0` disables it.
    #[serde(default = "default_prealarm_duration")]
    pub prealarm_duration: i32,
    #[serde(default = "default_snooze_duration")]
    pub snooze_duration: i32,
    /// Minutes an alarm rings before it silences itself; `<= 0` rings forever.
    #[serde(default = "default_auto_silence")]
    pub auto_silence: i32,
    #[serde(default = "default_alert")]
    pub default_alert: String,
}

/// Registry startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_load_retry_interval_ms")]
    pub load_retry_interval_ms: u64,
    #[serde(default = "default_load_retry_window_ms")]
    pub load_retry_window_ms: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/reveille/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

fn default_prealarm_duration() -> i32 {
    30
}
fn default_snooze_duration() -> i32 {
    10
}
fn default_auto_silence() -> i32 {
    10
}
fn default_alert() -> String {
    "default".into()
}
fn default_load_retry_interval_ms() -> u64 {
    500
}
fn default_load_retry_window_ms() -> u64 {
    10_000
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            prealarm_duration: default_prealarm_duration(),
            snooze_duration: default_snooze_duration(),
            auto_silence: default_auto_silence(),
            default_alert: default_alert(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            load_retry_interval_ms: default_load_retry_interval_ms(),
            load_retry_window_ms: default_load_retry_window_ms(),
        }
    }
}

impl StartupConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.load_retry_interval_ms)
    }

    pub fn retry_window(&self) -> Duration {
        Duration::from_millis(self.load_retry_window_ms)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<i64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as an integer")))?,
                    serde_json::Value::Object(_) => return Err(unknown()),
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location of the config file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::path()?)
    }

    /// Load from `path`, writing defaults there if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// default config cannot be written.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::path()?)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key. Does not save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// or is out of range.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Every leaf key with its value, in a stable order.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out.sort();
        out
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.alarm.snooze_duration < 1 {
            return Err(ConfigError::InvalidValue {
                key: "alarm.snooze_duration".into(),
                message: "must be at least 1 minute".into(),
            });
        }
        if self.startup.load_retry_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "startup.load_retry_interval_ms".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}
