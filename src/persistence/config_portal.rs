//! # Configuration Portal - single entry point for configuration updates
//!
//! Every configuration change (settings editor, game auto-profile switching,
//! the tunable table, startup load) goes through the [`ConfigPortal`]. The
//! portal owns a `tokio::sync::watch` channel holding an `Arc<DriveConfig>`:
//!
//! ```text
//! settings editor ─┐
//! game profiles   ─┼─► ConfigPortal ──watch──► shaping tick / arbitrator / feedback
//! tunable table   ─┘      (sanitize)
//! ```
//!
//! ## Consistency
//! An update clones the current snapshot, applies the change, sanitizes the
//! result and publishes a new `Arc` inside `send_if_modified`. Readers either
//! see the old snapshot or the new one in full; there is no field-by-field
//! window. Updates that change nothing do not wake the receivers.

use super::{
    AssistConfig, ConfigError, DriveConfig, KeyBindings, SmoothingConfig, SteeringMode,
    TomlSettingsStore,
};
use crate::persistence::settings_store::SettingsStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ConfigPortal {
    tx: Arc<watch::Sender<Arc<DriveConfig>>>,
}

impl ConfigPortal {
    /// Sanitizes `config` and makes it the current snapshot
    pub fn new(mut config: DriveConfig) -> Self {
        config.sanitize();
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<DriveConfig> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DriveConfig>> {
        self.tx.subscribe()
    }

    /// Applies `change` to a copy of the current config and publishes the sanitized result.
    /// A failing change leaves the current snapshot untouched.
    pub fn update<F>(&self, change: F) -> Result<Arc<DriveConfig>, ConfigError>
    where
        F: FnOnce(&mut DriveConfig) -> Result<(), ConfigError>,
    {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|current| {
            let mut next = (**current).clone();
            if let Err(e) = change(&mut next) {
                outcome = Err(e);
                return false;
            }
            next.sanitize();
            if next == **current {
                debug!("Configuration update without changes");
                return false;
            }
            *current = Arc::new(next);
            true
        });
        outcome.map(|()| self.current())
    }

    /// Replaces the whole configuration
    pub fn replace(&self, config: DriveConfig) -> Arc<DriveConfig> {
        let result = self.update(|current| {
            *current = config;
            Ok(())
        });
        info!("Configuration replaced");
        result.unwrap_or_else(|_| self.current())
    }

    /// Bindings, smoothing and assists in one atomic step
    pub fn configure(
        &self,
        bindings: KeyBindings,
        smoothing: SmoothingConfig,
        assists: AssistConfig,
    ) -> Arc<DriveConfig> {
        let result = self.update(|config| {
            config.key_bindings = bindings;
            config.smoothing = smoothing;
            config.assists = assists;
            Ok(())
        });
        info!("Configuration updated (bindings, smoothing, assists)");
        result.unwrap_or_else(|_| self.current())
    }

    /// Entry point for the settings editor
    pub fn set_key_bindings(&self, bindings: KeyBindings) -> Arc<DriveConfig> {
        let result = self.update(|config| {
            config.key_bindings = bindings;
            Ok(())
        });
        info!("Key bindings updated");
        result.unwrap_or_else(|_| self.current())
    }

    pub fn apply_tunable(&self, name: &str, raw: &str) -> Result<Arc<DriveConfig>, ConfigError> {
        self.update(|config| config.set_tunable_str(name, raw))
    }

    pub fn apply_steering_mode(&self, mode: SteeringMode) -> Arc<DriveConfig> {
        let result = self.update(|config| {
            config.apply_steering_mode(mode);
            Ok(())
        });
        result.unwrap_or_else(|_| self.current())
    }

    /// Called by the game watcher when the foreground executable changes
    pub fn apply_game_profile(&self, executable: &str) -> Result<Arc<DriveConfig>, ConfigError> {
        self.update(|config| config.apply_game_profile(executable))
    }

    /// Writes the current snapshot through `store`
    pub async fn save_to(&self, store: &mut TomlSettingsStore) -> color_eyre::Result<()> {
        let config = self.current();
        store.store_config(&config)?;
        store.save().await
    }
}

impl Default for ConfigPortal {
    fn default() -> Self {
        Self::new(DriveConfig::default())
    }
}
