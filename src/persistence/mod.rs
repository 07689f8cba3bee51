//! # Persistence Module
//!
//! ## Why This Module Exists
//! Holds the driving configuration: key bindings, per-axis smoothing, assist
//! strengths, deadzone and curve parameters, steering modes and per-game
//! overrides. The running core never reads settings from globals; it gets an
//! immutable [`DriveConfig`] snapshot that the [`config_portal::ConfigPortal`]
//! swaps atomically.
//!
//! ## Key Abstractions
//! - **DriveConfig**: one serde struct tree, `#[serde(default)]` on every level so
//!   partially written files still load
//! - **Sanitizing**: out-of-range values are replaced with their defaults and
//!   reported, never fatal
//! - **Tunables**: named numeric settings dispatched through a table of typed setters
//! - **SettingsStore**: the key-value document on disk ([`settings_store`])
//!
//! ## Error Handling Strategy
//! Validation problems are [`ConfigError`] values that get logged and replaced by
//! defaults. File operations use `color_eyre` for context, like the rest of the
//! startup path.

pub mod config_portal;
pub mod settings_store;

use crate::keyboard::{normalize_key_name, LogicalControl};
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub use config_portal::ConfigPortal;
pub use settings_store::{SettingsStore, TomlSettingsStore};

const APP_DIR: &str = "drive-assist";
const SETTINGS_FILE: &str = "settings.toml";
const RECORDINGS_DIR: &str = "recordings";

/// `<config dir>/drive-assist`
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| eyre!("No config directory on this platform"))?;
    Ok(base.join(APP_DIR))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(SETTINGS_FILE))
}

pub fn recordings_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join(RECORDINGS_DIR))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} = {value} is out of range, using default {default}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        default: f32,
    },

    #[error("Invalid key binding for {control}: {key:?}, using default {default:?}")]
    InvalidKeyBinding {
        control: LogicalControl,
        key: String,
        default: String,
    },

    #[error("Unknown tunable: {0}")]
    UnknownTunable(String),

    #[error("Invalid value for {name}: {raw:?}")]
    InvalidValue { name: String, raw: String },

    #[error("Unknown steering mode: {0}")]
    UnknownSteeringMode(String),

    #[error("No game profile for {0}")]
    UnknownGame(String),
}

/// Physical key name per logical control
///
/// Canonical defaults: `a`/`d` steer, `w` throttle, `s` brake, `shift`/`ctrl`
/// gear up/down, `space` clutch, `alt` handbrake.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct KeyBindings {
    pub steer_left: String,
    pub steer_right: String,
    pub throttle: String,
    pub brake: String,
    pub gear_up: String,
    pub gear_down: String,
    pub clutch: String,
    pub handbrake: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            steer_left: "a".to_string(),
            steer_right: "d".to_string(),
            throttle: "w".to_string(),
            brake: "s".to_string(),
            gear_up: "shift".to_string(),
            gear_down: "ctrl".to_string(),
            clutch: "space".to_string(),
            handbrake: "alt".to_string(),
        }
    }
}

impl KeyBindings {
    pub fn get(&self, control: LogicalControl) -> &str {
        match control {
            LogicalControl::SteerLeft => &self.steer_left,
            LogicalControl::SteerRight => &self.steer_right,
            LogicalControl::Throttle => &self.throttle,
            LogicalControl::Brake => &self.brake,
            LogicalControl::GearUp => &self.gear_up,
            LogicalControl::GearDown => &self.gear_down,
            LogicalControl::Clutch => &self.clutch,
            LogicalControl::Handbrake => &self.handbrake,
        }
    }

    fn slot(&mut self, control: LogicalControl) -> &mut String {
        match control {
            LogicalControl::SteerLeft => &mut self.steer_left,
            LogicalControl::SteerRight => &mut self.steer_right,
            LogicalControl::Throttle => &mut self.throttle,
            LogicalControl::Brake => &mut self.brake,
            LogicalControl::GearUp => &mut self.gear_up,
            LogicalControl::GearDown => &mut self.gear_down,
            LogicalControl::Clutch => &mut self.clutch,
            LogicalControl::Handbrake => &mut self.handbrake,
        }
    }

    /// Stores the normalized key name
    pub fn set(&mut self, control: LogicalControl, key: &str) {
        *self.slot(control) = normalize_key_name(key);
    }

    /// A usable binding is a single non-empty token
    pub fn is_valid_key(key: &str) -> bool {
        !key.is_empty() && !key.chars().any(char::is_whitespace)
    }

    /// Replaces malformed entries with defaults
    pub fn sanitize(&mut self) -> Vec<ConfigError> {
        let defaults = KeyBindings::default();
        let mut errors = Vec::new();
        for control in LogicalControl::ALL {
            let normalized = normalize_key_name(self.get(control));
            if Self::is_valid_key(&normalized) {
                *self.slot(control) = normalized;
            } else {
                errors.push(ConfigError::InvalidKeyBinding {
                    control,
                    key: self.get(control).to_string(),
                    default: defaults.get(control).to_string(),
                });
                *self.slot(control) = defaults.get(control).to_string();
            }
        }
        errors
    }
}

/// Per-axis smoothing and the mode toggles that decide whether it applies
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Exponential smoothing factor for steering, in (0, 1)
    pub steering: f32,
    pub throttle: f32,
    pub brake: f32,
    /// Smoothing factor used while easing back to center
    pub center_speed: f32,
    /// Smooth steering instead of assigning the target directly
    pub gradual_turn: bool,
    /// Smooth throttle and brake instead of assigning the target directly
    pub progressive_acceleration: bool,
    pub return_to_center: bool,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            steering: 0.8,
            throttle: 0.7,
            brake: 0.7,
            center_speed: 0.3,
            gradual_turn: true,
            progressive_acceleration: true,
            return_to_center: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AssistConfig {
    pub counter_steer: bool,
    pub counter_steer_strength: f32,
    pub spin_prevention: bool,
    pub spin_prevention_strength: f32,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            counter_steer: true,
            counter_steer_strength: 0.5,
            spin_prevention: true,
            spin_prevention_strength: 0.6,
        }
    }
}

/// Steering response presets
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SteeringMode {
    #[default]
    Standard,
    Sport,
    Race,
}

/// Parameters a steering mode sets
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SteeringPreset {
    pub curve_strength: f32,
    pub response_speed: f32,
    pub center_snap: f32,
}

impl SteeringMode {
    pub const fn preset(self) -> SteeringPreset {
        match self {
            SteeringMode::Standard => SteeringPreset {
                curve_strength: 1.5,
                response_speed: 1.0,
                center_snap: 0.8,
            },
            SteeringMode::Sport => SteeringPreset {
                curve_strength: 1.8,
                response_speed: 1.2,
                center_snap: 0.9,
            },
            SteeringMode::Race => SteeringPreset {
                curve_strength: 2.2,
                response_speed: 1.5,
                center_snap: 0.7,
            },
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            SteeringMode::Standard => "standard",
            SteeringMode::Sport => "sport",
            SteeringMode::Race => "race",
        }
    }
}

impl fmt::Display for SteeringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SteeringMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(SteeringMode::Standard),
            "sport" => Ok(SteeringMode::Sport),
            "race" => Ok(SteeringMode::Race),
            other => Err(ConfigError::UnknownSteeringMode(other.to_string())),
        }
    }
}

/// Per-game overrides; unset fields keep the current value
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct GameProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steering_mode: Option<SteeringMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadzone: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_strength: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center_snap: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_feedback: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibration_strength: Option<f32>,
}

/// Complete configuration snapshot handed to the running core.
///
/// ## Design Rationale
/// Components never see a half-updated configuration: the portal builds a new
/// `DriveConfig`, sanitizes it and publishes it behind an `Arc`. A tick clones
/// the `Arc` once and works with that snapshot to the end.
///
/// ## Persisted Layout
/// ```toml
/// deadzone_size = 0.05
/// steering_mode = "standard"
///
/// [key_bindings]
/// steer_left = "a"
/// throttle = "w"
///
/// [smoothing]
/// steering = 0.8
///
/// [assists]
/// counter_steer_strength = 0.5
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    pub key_bindings: KeyBindings,
    pub smoothing: SmoothingConfig,
    pub assists: AssistConfig,
    /// Targets with a smaller magnitude become exactly zero
    pub deadzone_size: f32,
    pub steering_mode: SteeringMode,
    /// Scales the progressivity of the hold curve (1.5 is neutral)
    pub curve_strength: f32,
    /// Scales hold time before it enters the curve (1.0 is neutral)
    pub response_speed: f32,
    /// Return-to-center speed multiplier (0.8 is neutral)
    pub center_snap: f32,
    pub force_feedback: bool,
    pub vibration_strength: f32,
    /// How long a device counts as active after its last input
    pub detection_threshold_secs: f32,
    /// Executable name (lower-case) → overrides
    pub game_profiles: HashMap<String, GameProfile>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        let standard = SteeringMode::Standard.preset();
        let mut game_profiles = HashMap::new();
        game_profiles.insert(
            "assetto_corsa.exe".to_string(),
            GameProfile {
                steering_mode: Some(SteeringMode::Race),
                vibration_strength: Some(0.7),
                ..GameProfile::default()
            },
        );

        Self {
            key_bindings: KeyBindings::default(),
            smoothing: SmoothingConfig::default(),
            assists: AssistConfig::default(),
            deadzone_size: 0.05,
            steering_mode: SteeringMode::Standard,
            curve_strength: standard.curve_strength,
            response_speed: standard.response_speed,
            center_snap: standard.center_snap,
            force_feedback: true,
            vibration_strength: 0.5,
            detection_threshold_secs: 0.5,
            game_profiles,
        }
    }
}

/// Resets `value` to `default` when it is not finite or fails `valid`
fn clamp_field(
    errors: &mut Vec<ConfigError>,
    field: &'static str,
    value: &mut f32,
    default: f32,
    valid: impl Fn(f32) -> bool,
) {
    if !value.is_finite() || !valid(*value) {
        errors.push(ConfigError::OutOfRange {
            field,
            value: *value,
            default,
        });
        *value = default;
    }
}

fn open_unit(v: f32) -> bool {
    v > 0.0 && v < 1.0
}

fn closed_unit(v: f32) -> bool {
    (0.0..=1.0).contains(&v)
}

fn multiplier(v: f32) -> bool {
    v > 0.0 && v <= 5.0
}

impl DriveConfig {
    /// Resets every invalid field to its default and logs one warning per field
    pub fn sanitize(&mut self) -> Vec<ConfigError> {
        let defaults = DriveConfig::default();
        let smoothing_defaults = &defaults.smoothing;
        let assist_defaults = &defaults.assists;
        let mut errors = self.key_bindings.sanitize();

        let s = &mut self.smoothing;
        clamp_field(
            &mut errors,
            "smoothing.steering",
            &mut s.steering,
            smoothing_defaults.steering,
            open_unit,
        );
        clamp_field(
            &mut errors,
            "smoothing.throttle",
            &mut s.throttle,
            smoothing_defaults.throttle,
            open_unit,
        );
        clamp_field(
            &mut errors,
            "smoothing.brake",
            &mut s.brake,
            smoothing_defaults.brake,
            open_unit,
        );
        clamp_field(
            &mut errors,
            "smoothing.center_speed",
            &mut s.center_speed,
            smoothing_defaults.center_speed,
            open_unit,
        );

        let a = &mut self.assists;
        clamp_field(
            &mut errors,
            "assists.counter_steer_strength",
            &mut a.counter_steer_strength,
            assist_defaults.counter_steer_strength,
            closed_unit,
        );
        clamp_field(
            &mut errors,
            "assists.spin_prevention_strength",
            &mut a.spin_prevention_strength,
            assist_defaults.spin_prevention_strength,
            closed_unit,
        );

        clamp_field(
            &mut errors,
            "deadzone_size",
            &mut self.deadzone_size,
            defaults.deadzone_size,
            |v| (0.0..1.0).contains(&v),
        );
        clamp_field(
            &mut errors,
            "curve_strength",
            &mut self.curve_strength,
            defaults.curve_strength,
            multiplier,
        );
        clamp_field(
            &mut errors,
            "response_speed",
            &mut self.response_speed,
            defaults.response_speed,
            multiplier,
        );
        clamp_field(
            &mut errors,
            "center_snap",
            &mut self.center_snap,
            defaults.center_snap,
            open_unit,
        );
        clamp_field(
            &mut errors,
            "vibration_strength",
            &mut self.vibration_strength,
            defaults.vibration_strength,
            closed_unit,
        );
        clamp_field(
            &mut errors,
            "detection_threshold_secs",
            &mut self.detection_threshold_secs,
            defaults.detection_threshold_secs,
            |v| v > 0.0 && v <= 10.0,
        );

        // Profiles are keyed by lower-case executable name
        if self.game_profiles.keys().any(|name| *name != name.to_lowercase()) {
            self.game_profiles = std::mem::take(&mut self.game_profiles)
                .into_iter()
                .map(|(name, profile)| (name.to_lowercase(), profile))
                .collect();
        }

        for error in &errors {
            warn!("Configuration: {}", error);
        }
        errors
    }

    /// Copies the preset parameters of `mode` into the config
    pub fn apply_steering_mode(&mut self, mode: SteeringMode) {
        let preset = mode.preset();
        self.steering_mode = mode;
        self.curve_strength = preset.curve_strength;
        self.response_speed = preset.response_speed;
        self.center_snap = preset.center_snap;
        info!("Steering mode set to {}", mode);
    }

    /// Applies the overrides registered for `executable`
    pub fn apply_game_profile(&mut self, executable: &str) -> Result<(), ConfigError> {
        let key = executable.trim().to_lowercase();
        let profile = self
            .game_profiles
            .get(&key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownGame(key.clone()))?;

        if let Some(mode) = profile.steering_mode {
            self.apply_steering_mode(mode);
        }
        if let Some(deadzone) = profile.deadzone {
            self.deadzone_size = deadzone;
        }
        if let Some(curve) = profile.curve_strength {
            self.curve_strength = curve;
        }
        if let Some(response) = profile.response_speed {
            self.response_speed = response;
        }
        if let Some(snap) = profile.center_snap {
            self.center_snap = snap;
        }
        if let Some(enabled) = profile.force_feedback {
            self.force_feedback = enabled;
        }
        if let Some(strength) = profile.vibration_strength {
            self.vibration_strength = strength;
        }
        self.sanitize();
        info!("Applied game profile for {}", key);
        Ok(())
    }

    pub fn get_tunable(&self, tunable: Tunable) -> f32 {
        (tunable.entry().get)(self)
    }

    /// Range-checks `value` and writes it through the typed setter
    pub fn set_tunable(&mut self, tunable: Tunable, value: f32) -> Result<(), ConfigError> {
        let entry = tunable.entry();
        if !value.is_finite() || !(entry.valid)(value) {
            return Err(ConfigError::InvalidValue {
                name: entry.name.to_string(),
                raw: value.to_string(),
            });
        }
        (entry.set)(self, value);
        debug!("Tunable {} = {}", entry.name, value);
        Ok(())
    }

    /// `name = raw` as typed in a settings editor
    pub fn set_tunable_str(&mut self, name: &str, raw: &str) -> Result<(), ConfigError> {
        let tunable: Tunable = name.parse()?;
        let value: f32 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            raw: raw.to_string(),
        })?;
        self.set_tunable(tunable, value)
    }
}

/// Numeric settings addressable by name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tunable {
    SteeringSmoothing,
    PedalSmoothing,
    CenterSpeed,
    Deadzone,
    CounterSteerStrength,
    SpinPreventionStrength,
    CurveStrength,
    ResponseSpeed,
    DetectionThreshold,
}

struct TunableEntry {
    tunable: Tunable,
    name: &'static str,
    get: fn(&DriveConfig) -> f32,
    set: fn(&mut DriveConfig, f32),
    valid: fn(f32) -> bool,
}

/// Ordered like the `Tunable` variants
static TUNABLES: [TunableEntry; 9] = [
    TunableEntry {
        tunable: Tunable::SteeringSmoothing,
        name: "steering_smoothing",
        get: |c| c.smoothing.steering,
        set: |c, v| c.smoothing.steering = v,
        valid: open_unit,
    },
    TunableEntry {
        tunable: Tunable::PedalSmoothing,
        name: "pedal_smoothing",
        get: |c| c.smoothing.throttle,
        set: |c, v| {
            c.smoothing.throttle = v;
            c.smoothing.brake = v;
        },
        valid: open_unit,
    },
    TunableEntry {
        tunable: Tunable::CenterSpeed,
        name: "center_speed",
        get: |c| c.smoothing.center_speed,
        set: |c, v| c.smoothing.center_speed = v,
        valid: open_unit,
    },
    TunableEntry {
        tunable: Tunable::Deadzone,
        name: "deadzone",
        get: |c| c.deadzone_size,
        set: |c, v| c.deadzone_size = v,
        valid: |v| (0.0..1.0).contains(&v),
    },
    TunableEntry {
        tunable: Tunable::CounterSteerStrength,
        name: "counter_steer_strength",
        get: |c| c.assists.counter_steer_strength,
        set: |c, v| c.assists.counter_steer_strength = v,
        valid: closed_unit,
    },
    TunableEntry {
        tunable: Tunable::SpinPreventionStrength,
        name: "spin_prevention_strength",
        get: |c| c.assists.spin_prevention_strength,
        set: |c, v| c.assists.spin_prevention_strength = v,
        valid: closed_unit,
    },
    TunableEntry {
        tunable: Tunable::CurveStrength,
        name: "curve_strength",
        get: |c| c.curve_strength,
        set: |c, v| c.curve_strength = v,
        valid: multiplier,
    },
    TunableEntry {
        tunable: Tunable::ResponseSpeed,
        name: "response_speed",
        get: |c| c.response_speed,
        set: |c, v| c.response_speed = v,
        valid: multiplier,
    },
    TunableEntry {
        tunable: Tunable::DetectionThreshold,
        name: "detection_threshold",
        get: |c| c.detection_threshold_secs,
        set: |c, v| c.detection_threshold_secs = v,
        valid: |v| v > 0.0 && v <= 10.0,
    },
];

impl Tunable {
    pub const ALL: [Tunable; 9] = [
        Tunable::SteeringSmoothing,
        Tunable::PedalSmoothing,
        Tunable::CenterSpeed,
        Tunable::Deadzone,
        Tunable::CounterSteerStrength,
        Tunable::SpinPreventionStrength,
        Tunable::CurveStrength,
        Tunable::ResponseSpeed,
        Tunable::DetectionThreshold,
    ];

    fn entry(self) -> &'static TunableEntry {
        &TUNABLES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }
}

impl FromStr for Tunable {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        TUNABLES
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.tunable)
            .ok_or(ConfigError::UnknownTunable(name))
    }
}

impl fmt::Display for Tunable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_clean() {
        let mut config = DriveConfig::default();
        assert!(config.sanitize().is_empty());
        assert_eq!(config, DriveConfig::default());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: DriveConfig = toml::from_str(
            r#"
            deadzone_size = 0.1

            [key_bindings]
            throttle = "up"

            [smoothing]
            steering = 0.6
            "#,
        )
        .unwrap();

        assert_eq!(config.deadzone_size, 0.1);
        assert_eq!(config.key_bindings.throttle, "up");
        assert_eq!(config.key_bindings.brake, "s");
        assert_eq!(config.smoothing.steering, 0.6);
        assert_eq!(config.smoothing.throttle, 0.7);
        assert_eq!(config.assists, AssistConfig::default());
    }

    #[test]
    fn test_sanitize_replaces_out_of_range_values() {
        let mut config = DriveConfig::default();
        config.smoothing.steering = 1.5;
        config.deadzone_size = f32::NAN;
        config.assists.spin_prevention_strength = -0.2;
        config.key_bindings.brake = "   ".to_string();

        let errors = config.sanitize();
        assert_eq!(errors.len(), 4);
        assert_eq!(config.smoothing.steering, 0.8);
        assert_eq!(config.deadzone_size, 0.05);
        assert_eq!(config.assists.spin_prevention_strength, 0.6);
        assert_eq!(config.key_bindings.brake, "s");
    }

    #[test]
    fn test_key_bindings_are_normalized() {
        let mut bindings = KeyBindings::default();
        bindings.set(LogicalControl::GearUp, "LShift");
        assert_eq!(bindings.get(LogicalControl::GearUp), "shift");

        bindings.throttle = "Up".to_string();
        assert!(bindings.sanitize().is_empty());
        assert_eq!(bindings.throttle, "up");
    }

    #[test]
    fn test_steering_mode_presets() {
        let mut config = DriveConfig::default();
        config.apply_steering_mode(SteeringMode::Sport);
        assert_eq!(config.curve_strength, 1.8);
        assert_eq!(config.response_speed, 1.2);
        assert_eq!(config.center_snap, 0.9);

        assert_eq!("RACE".parse::<SteeringMode>().unwrap(), SteeringMode::Race);
        assert!("drift".parse::<SteeringMode>().is_err());
    }

    #[test]
    fn test_game_profile_overrides() {
        let mut config = DriveConfig::default();
        config.apply_game_profile("Assetto_Corsa.exe").unwrap();
        assert_eq!(config.steering_mode, SteeringMode::Race);
        assert_eq!(config.curve_strength, 2.2);
        assert_eq!(config.vibration_strength, 0.7);
        // Fields the profile leaves unset are untouched
        assert_eq!(config.deadzone_size, 0.05);

        assert_eq!(
            config.apply_game_profile("notepad.exe"),
            Err(ConfigError::UnknownGame("notepad.exe".to_string()))
        );
    }

    #[test]
    fn test_tunable_table_dispatch() {
        let mut config = DriveConfig::default();
        config.set_tunable_str("pedal_smoothing", "0.5").unwrap();
        assert_eq!(config.smoothing.throttle, 0.5);
        assert_eq!(config.smoothing.brake, 0.5);

        config.set_tunable(Tunable::Deadzone, 0.1).unwrap();
        assert_eq!(config.get_tunable(Tunable::Deadzone), 0.1);

        assert!(matches!(
            config.set_tunable_str("warp_speed", "1"),
            Err(ConfigError::UnknownTunable(_))
        ));
        assert!(matches!(
            config.set_tunable_str("deadzone", "abc"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(config.set_tunable(Tunable::SteeringSmoothing, 1.0).is_err());
        assert_eq!(config.smoothing.steering, 0.8);
    }

    #[test]
    fn test_tunable_names_round_trip() {
        for tunable in Tunable::ALL {
            assert_eq!(tunable.name().parse::<Tunable>().unwrap(), tunable);
        }
    }
}
