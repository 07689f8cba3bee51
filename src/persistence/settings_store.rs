//! Key-value settings document
//!
//! The settings file is a TOML table addressed with dotted keys
//! (`smoothing.steering`, `key_bindings.throttle`). The store keeps the whole
//! document in memory, so unknown keys written by other tools survive a save.
//! [`TomlSettingsStore::drive_config`] extracts the typed configuration
//! section by section: a broken section falls back to its defaults without
//! taking the rest of the file down with it.

use super::{AssistConfig, DriveConfig, GameProfile, KeyBindings, SmoothingConfig};
use crate::keyboard::LogicalControl;
use color_eyre::eyre::{eyre, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, info, warn};

/// Minimal persistence contract used by the settings editor and the portal
pub trait SettingsStore: Send + Sync {
    /// Value at `key`, or `default` when missing
    fn get(&self, key: &str, default: Value) -> Value;

    fn set(&mut self, key: &str, value: Value);

    fn save(&self) -> impl Future<Output = Result<()>> + Send;
}

/// TOML file backed [`SettingsStore`]
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
    document: Table,
}

impl TomlSettingsStore {
    /// Empty document that will be written to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Table::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| eyre!("Failed to read settings file {}: {}", path.display(), e))?;
        let document: Table = content
            .parse()
            .map_err(|e| eyre!("Failed to parse settings file {}: {}", path.display(), e))?;
        debug!("Loaded {} settings sections from {}", document.len(), path.display());
        Ok(Self { path, document })
    }

    /// Loads `path`, or writes a default document there when it does not exist yet.
    /// An unreadable file is logged and replaced in memory by defaults.
    pub async fn load_or_create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("Failed to check settings file: {}", e))?;

        if exists {
            match Self::load(&path).await {
                Ok(store) => return Ok(store),
                Err(e) => {
                    warn!("{}, falling back to defaults", e);
                    let mut store = Self::new(path);
                    store.store_config(&DriveConfig::default())?;
                    return Ok(store);
                }
            }
        }

        info!("No settings at {}, creating defaults", path.display());
        let mut store = Self::new(path);
        store.store_config(&DriveConfig::default())?;
        store.save().await?;
        Ok(store)
    }

    /// Typed configuration; every section that fails to parse falls back to defaults
    pub fn drive_config(&self) -> DriveConfig {
        let defaults = DriveConfig::default();
        let mut config = DriveConfig {
            key_bindings: self.key_bindings(),
            smoothing: self.section::<SmoothingConfig>("smoothing"),
            assists: self.section::<AssistConfig>("assists"),
            game_profiles: self
                .document
                .get("game_profiles")
                .map(|value| {
                    parse_or_default::<HashMap<String, GameProfile>>("game_profiles", value)
                })
                .unwrap_or(defaults.game_profiles),
            deadzone_size: self.scalar("deadzone_size", defaults.deadzone_size),
            curve_strength: self.scalar("curve_strength", defaults.curve_strength),
            response_speed: self.scalar("response_speed", defaults.response_speed),
            center_snap: self.scalar("center_snap", defaults.center_snap),
            vibration_strength: self.scalar("vibration_strength", defaults.vibration_strength),
            detection_threshold_secs: self
                .scalar("detection_threshold_secs", defaults.detection_threshold_secs),
            force_feedback: self
                .document
                .get("force_feedback")
                .and_then(Value::as_bool)
                .unwrap_or(defaults.force_feedback),
            steering_mode: self
                .document
                .get("steering_mode")
                .map(|value| parse_or_default("steering_mode", value))
                .unwrap_or(defaults.steering_mode),
        };
        config.sanitize();
        config
    }

    /// Writes every field of `config` into the document
    pub fn store_config(&mut self, config: &DriveConfig) -> Result<()> {
        let value = Value::try_from(config)
            .map_err(|e| eyre!("Failed to serialize drive config: {}", e))?;
        if let Value::Table(table) = value {
            for (key, value) in table {
                self.document.insert(key, value);
            }
        }
        Ok(())
    }

    fn section<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        self.document
            .get(name)
            .map(|value| parse_or_default(name, value))
            .unwrap_or_default()
    }

    /// Bindings are parsed entry by entry so one bad key keeps the others
    fn key_bindings(&self) -> KeyBindings {
        let mut bindings = KeyBindings::default();
        let Some(Value::Table(table)) = self.document.get("key_bindings") else {
            return bindings;
        };
        for control in LogicalControl::ALL {
            match table.get(control.name()) {
                Some(Value::String(key)) => bindings.set(control, key),
                Some(other) => warn!(
                    "key_bindings.{} is not a string ({}), using default",
                    control,
                    other.type_str()
                ),
                None => {}
            }
        }
        bindings
    }

    fn scalar(&self, key: &str, default: f32) -> f32 {
        match self.document.get(key) {
            Some(Value::Float(v)) => *v as f32,
            Some(Value::Integer(v)) => *v as f32,
            Some(other) => {
                warn!("{} is not a number ({}), using default", key, other.type_str());
                default
            }
            None => default,
        }
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let mut current = self.document.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }
}

fn parse_or_default<T: DeserializeOwned + Default>(name: &str, value: &Value) -> T {
    match value.clone().try_into::<T>() {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Invalid settings section {}: {}, using defaults", name, e);
            T::default()
        }
    }
}

impl SettingsStore for TomlSettingsStore {
    fn get(&self, key: &str, default: Value) -> Value {
        self.lookup(key).cloned().unwrap_or(default)
    }

    fn set(&mut self, key: &str, value: Value) {
        let mut parts: Vec<&str> = key.split('.').collect();
        let Some(leaf) = parts.pop() else {
            return;
        };

        let mut table = &mut self.document;
        for part in parts {
            let entry = table
                .entry(part.to_string())
                .or_insert(Value::Table(Table::new()));
            if !entry.is_table() {
                warn!("Overwriting non-table setting {} while setting {}", part, key);
                *entry = Value::Table(Table::new());
            }
            let Value::Table(next) = entry else {
                return;
            };
            table = next;
        }
        table.insert(leaf.to_string(), value);
    }

    async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create settings directory: {}", e))?;
        }
        let content = toml::to_string_pretty(&self.document)
            .map_err(|e| eyre!("Failed to serialize settings: {}", e))?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| eyre!("Failed to write settings file: {}", e))?;
        info!("Settings saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SteeringMode;

    #[tokio::test]
    async fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let store = TomlSettingsStore::load_or_create(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.drive_config(), DriveConfig::default());

        let reloaded = TomlSettingsStore::load(&path).await.unwrap();
        assert_eq!(reloaded.drive_config(), DriveConfig::default());
    }

    #[tokio::test]
    async fn test_set_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let mut store = TomlSettingsStore::new(&path);
        store.set("smoothing.steering", Value::Float(0.6));
        store.set("key_bindings.throttle", Value::String("up".to_string()));
        store.set("steering_mode", Value::String("sport".to_string()));
        store.save().await.unwrap();

        let reloaded = TomlSettingsStore::load(&path).await.unwrap();
        assert_eq!(
            reloaded.get("smoothing.steering", Value::Float(0.0)),
            Value::Float(0.6)
        );
        let config = reloaded.drive_config();
        assert_eq!(config.smoothing.steering, 0.6);
        assert_eq!(config.key_bindings.throttle, "up");
        assert_eq!(config.steering_mode, SteeringMode::Sport);
    }

    #[test]
    fn test_get_returns_default_for_missing_key() {
        let store = TomlSettingsStore::new("unused.toml");
        assert_eq!(
            store.get("assists.counter_steer_strength", Value::Float(0.5)),
            Value::Float(0.5)
        );
    }

    #[test]
    fn test_broken_section_only_resets_itself() {
        let mut store = TomlSettingsStore::new("unused.toml");
        store.set("smoothing", Value::String("fast".to_string()));
        store.set("key_bindings.brake", Value::Integer(3));
        store.set("key_bindings.steer_left", Value::String("Left".to_string()));
        store.set("deadzone_size", Value::Float(0.1));

        let config = store.drive_config();
        assert_eq!(config.smoothing, SmoothingConfig::default());
        assert_eq!(config.key_bindings.brake, "s");
        assert_eq!(config.key_bindings.steer_left, "left");
        assert_eq!(config.deadzone_size, 0.1);
    }

    #[test]
    fn test_out_of_range_values_are_sanitized() {
        let mut store = TomlSettingsStore::new("unused.toml");
        store.set("smoothing.throttle", Value::Float(3.0));
        store.set("detection_threshold_secs", Value::Integer(-1));

        let config = store.drive_config();
        assert_eq!(config.smoothing.throttle, 0.7);
        assert_eq!(config.detection_threshold_secs, 0.5);
    }

    #[tokio::test]
    async fn test_unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        tokio::fs::write(&path, "this is [not toml").await.unwrap();

        let store = TomlSettingsStore::load_or_create(&path).await.unwrap();
        assert_eq!(store.drive_config(), DriveConfig::default());
    }
}
