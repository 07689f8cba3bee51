//! Key-Hold Tracker - press/release bookkeeping per logical control
//!
//! Records when each bound key went down and up and answers "how long has
//! this been held" for the shaping tick. Physical key names are resolved
//! through the active [`KeyBindings`]; anything not bound is ignored.

use super::normalize_key_name;
use crate::persistence::KeyBindings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Key table shared between the key-event callback and the shaping tick
pub type SharedKeyTracker = Arc<Mutex<KeyHoldTracker>>;

/// Abstract driving input, independent of the physical key bound to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalControl {
    SteerLeft,
    SteerRight,
    Throttle,
    Brake,
    GearUp,
    GearDown,
    Clutch,
    Handbrake,
}

impl LogicalControl {
    pub const COUNT: usize = 8;

    pub const ALL: [LogicalControl; Self::COUNT] = [
        LogicalControl::SteerLeft,
        LogicalControl::SteerRight,
        LogicalControl::Throttle,
        LogicalControl::Brake,
        LogicalControl::GearUp,
        LogicalControl::GearDown,
        LogicalControl::Clutch,
        LogicalControl::Handbrake,
    ];

    /// Position in [`LogicalControl::ALL`], used for fixed-size tables
    pub const fn index(self) -> usize {
        match self {
            LogicalControl::SteerLeft => 0,
            LogicalControl::SteerRight => 1,
            LogicalControl::Throttle => 2,
            LogicalControl::Brake => 3,
            LogicalControl::GearUp => 4,
            LogicalControl::GearDown => 5,
            LogicalControl::Clutch => 6,
            LogicalControl::Handbrake => 7,
        }
    }

    /// Name used in the settings document (`key_bindings.<name>`)
    pub const fn name(self) -> &'static str {
        match self {
            LogicalControl::SteerLeft => "steer_left",
            LogicalControl::SteerRight => "steer_right",
            LogicalControl::Throttle => "throttle",
            LogicalControl::Brake => "brake",
            LogicalControl::GearUp => "gear_up",
            LogicalControl::GearDown => "gear_down",
            LogicalControl::Clutch => "clutch",
            LogicalControl::Handbrake => "handbrake",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|control| control.name() == name)
    }

    /// Controls that feed the analog axes (the rest are plain buttons)
    pub const fn is_axis_control(self) -> bool {
        matches!(
            self,
            LogicalControl::SteerLeft
                | LogicalControl::SteerRight
                | LogicalControl::Throttle
                | LogicalControl::Brake
        )
    }
}

impl fmt::Display for LogicalControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Press/release state of one logical control
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KeyState {
    pub pressed: bool,
    pub press_time: Option<Instant>,
    pub release_time: Option<Instant>,
    pub hold_duration: Duration,
}

impl KeyState {
    /// Returns false when the key was already down (repeat events are ignored)
    pub fn press(&mut self, at: Instant) -> bool {
        if self.pressed {
            return false;
        }
        self.pressed = true;
        self.press_time = Some(at);
        self.hold_duration = Duration::ZERO;
        true
    }

    /// Returns false when the key was not down
    pub fn release(&mut self, at: Instant) -> bool {
        if !self.pressed {
            return false;
        }
        self.pressed = false;

        // Out-of-order timestamps are pinned to the press so release never precedes it
        let press_time = self.press_time.unwrap_or(at);
        let release_time = at.max(press_time);
        self.release_time = Some(release_time);
        self.hold_duration = release_time.saturating_duration_since(press_time);
        true
    }

    /// Hold time as of `now`: running while pressed, last recorded otherwise
    pub fn hold_duration_at(&self, now: Instant) -> Duration {
        match (self.pressed, self.press_time) {
            (true, Some(press_time)) => now.saturating_duration_since(press_time),
            _ => self.hold_duration,
        }
    }
}

/// Per-control view handed to the shaping engine
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlSample {
    pub pressed: bool,
    pub hold: Duration,
}

/// Consistent copy of the key table taken once per tick
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeySnapshot {
    samples: [ControlSample; LogicalControl::COUNT],
}

impl KeySnapshot {
    pub fn get(&self, control: LogicalControl) -> ControlSample {
        self.samples[control.index()]
    }

    pub fn is_pressed(&self, control: LogicalControl) -> bool {
        self.samples[control.index()].pressed
    }

    /// Hold duration in seconds, zero for released controls
    pub fn held_seconds(&self, control: LogicalControl) -> f32 {
        let sample = self.get(control);
        if sample.pressed {
            sample.hold.as_secs_f32()
        } else {
            0.0
        }
    }

    /// Builds a snapshot directly, used by replays and tests
    pub fn with(mut self, control: LogicalControl, pressed: bool, hold: Duration) -> Self {
        self.samples[control.index()] = ControlSample { pressed, hold };
        self
    }
}

/// Tracks key state for every bound control
#[derive(Debug, Clone)]
pub struct KeyHoldTracker {
    /// Physical key name → controls bound to it
    bindings: HashMap<String, Vec<LogicalControl>>,
    bound: KeyBindings,
    states: [KeyState; LogicalControl::COUNT],
}

impl KeyHoldTracker {
    pub fn new(bindings: &KeyBindings) -> Self {
        let mut tracker = Self {
            bindings: HashMap::new(),
            bound: bindings.clone(),
            states: [KeyState::default(); LogicalControl::COUNT],
        };
        tracker.index_bindings();
        tracker
    }

    pub fn shared(bindings: &KeyBindings) -> SharedKeyTracker {
        Arc::new(Mutex::new(Self::new(bindings)))
    }

    fn index_bindings(&mut self) {
        self.bindings.clear();
        for control in LogicalControl::ALL {
            self.bindings
                .entry(self.bound.get(control).to_string())
                .or_default()
                .push(control);
        }
    }

    /// Bindings the tracker currently resolves keys with
    pub fn bindings(&self) -> &KeyBindings {
        &self.bound
    }

    /// Swaps in new bindings. Controls whose key changed are reset to released
    pub fn rebind(&mut self, bindings: &KeyBindings) {
        if &self.bound == bindings {
            return;
        }
        for control in LogicalControl::ALL {
            if self.bound.get(control) != bindings.get(control) {
                debug!(
                    "Rebinding {}: {} -> {}",
                    control,
                    self.bound.get(control),
                    bindings.get(control)
                );
                self.states[control.index()] = KeyState::default();
            }
        }
        self.bound = bindings.clone();
        self.index_bindings();
        info!("Key tracker rebound to {:?}", self.bound);
    }

    /// Resolves a physical key name, falling back to a logical control name
    fn resolve(&self, key: &str) -> Vec<LogicalControl> {
        let normalized = normalize_key_name(key);
        if let Some(controls) = self.bindings.get(&normalized) {
            return controls.clone();
        }
        LogicalControl::from_name(&normalized)
            .map(|control| vec![control])
            .unwrap_or_default()
    }

    pub fn on_key_down(&mut self, key: &str, at: Instant) {
        for control in self.resolve(key) {
            if self.states[control.index()].press(at) {
                debug!("{} pressed ({})", control, key);
            }
        }
    }

    pub fn on_key_up(&mut self, key: &str, at: Instant) {
        for control in self.resolve(key) {
            let state = &mut self.states[control.index()];
            if state.release(at) {
                debug!(
                    "{} released ({}) after {:.3}s",
                    control,
                    key,
                    state.hold_duration.as_secs_f64()
                );
            }
        }
    }

    pub fn on_key_transition(&mut self, key: &str, is_down: bool, at: Instant) {
        if is_down {
            self.on_key_down(key, at);
        } else {
            self.on_key_up(key, at);
        }
    }

    /// Hold duration for a physical or logical key name; zero for unknown keys
    pub fn hold_duration_now(&self, key: &str, now: Instant) -> Duration {
        self.resolve(key)
            .first()
            .map(|control| self.states[control.index()].hold_duration_at(now))
            .unwrap_or(Duration::ZERO)
    }

    pub fn state(&self, control: LogicalControl) -> &KeyState {
        &self.states[control.index()]
    }

    /// True while any bound key is down
    pub fn any_pressed(&self) -> bool {
        self.states.iter().any(|state| state.pressed)
    }

    pub fn snapshot(&self, now: Instant) -> KeySnapshot {
        let mut snapshot = KeySnapshot::default();
        for control in LogicalControl::ALL {
            let state = &self.states[control.index()];
            snapshot.samples[control.index()] = ControlSample {
                pressed: state.pressed,
                hold: state.hold_duration_at(now),
            };
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> KeyHoldTracker {
        KeyHoldTracker::new(&KeyBindings::default())
    }

    #[test]
    fn test_press_records_time_and_resets_hold() {
        let mut tracker = tracker();
        let t0 = Instant::now();

        tracker.on_key_down("w", t0);
        let state = tracker.state(LogicalControl::Throttle);
        assert!(state.pressed);
        assert_eq!(state.press_time, Some(t0));
        assert_eq!(state.hold_duration, Duration::ZERO);
    }

    #[test]
    fn test_repeated_key_down_keeps_press_time() {
        let mut tracker = tracker();
        let t0 = Instant::now();

        tracker.on_key_down("a", t0);
        tracker.on_key_down("a", t0 + Duration::from_millis(300));

        let state = tracker.state(LogicalControl::SteerLeft);
        assert_eq!(state.press_time, Some(t0));
        assert_eq!(
            tracker.hold_duration_now("a", t0 + Duration::from_millis(500)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_release_computes_hold_duration() {
        let mut tracker = tracker();
        let t0 = Instant::now();

        tracker.on_key_down("d", t0);
        tracker.on_key_up("d", t0 + Duration::from_millis(250));

        let state = tracker.state(LogicalControl::SteerRight);
        assert!(!state.pressed);
        assert_eq!(state.hold_duration, Duration::from_millis(250));
        assert!(state.press_time <= state.release_time);

        // After release the recorded duration is reported, not a running one
        assert_eq!(
            tracker.hold_duration_now("d", t0 + Duration::from_secs(5)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_release_before_press_timestamp_is_clamped() {
        let mut tracker = tracker();
        let t0 = Instant::now() + Duration::from_secs(1);

        tracker.on_key_down("s", t0);
        tracker.on_key_up("s", t0 - Duration::from_millis(10));

        let state = tracker.state(LogicalControl::Brake);
        assert_eq!(state.release_time, Some(t0));
        assert_eq!(state.hold_duration, Duration::ZERO);
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let mut tracker = tracker();
        let t0 = Instant::now();

        tracker.on_key_up("w", t0);
        let state = tracker.state(LogicalControl::Throttle);
        assert_eq!(*state, KeyState::default());
    }

    #[test]
    fn test_unknown_key_is_noop() {
        let mut tracker = tracker();
        let t0 = Instant::now();

        tracker.on_key_down("f13", t0);
        assert!(!tracker.any_pressed());
        assert_eq!(tracker.hold_duration_now("f13", t0), Duration::ZERO);
    }

    #[test]
    fn test_never_pressed_hold_is_zero() {
        let tracker = tracker();
        assert_eq!(
            tracker.hold_duration_now("w", Instant::now()),
            Duration::ZERO
        );
    }

    #[test]
    fn test_logical_names_and_case_are_accepted() {
        let mut tracker = tracker();
        let t0 = Instant::now();

        tracker.on_key_down("steer_left", t0);
        tracker.on_key_down("W", t0);
        tracker.on_key_down("LShift", t0);
        assert!(tracker.state(LogicalControl::SteerLeft).pressed);
        assert!(tracker.state(LogicalControl::Throttle).pressed);
        assert!(tracker.state(LogicalControl::GearUp).pressed);
    }

    #[test]
    fn test_snapshot_reports_running_hold() {
        let mut tracker = tracker();
        let t0 = Instant::now();

        tracker.on_key_down("w", t0);
        let snapshot = tracker.snapshot(t0 + Duration::from_millis(400));

        assert!(snapshot.is_pressed(LogicalControl::Throttle));
        assert!((snapshot.held_seconds(LogicalControl::Throttle) - 0.4).abs() < 1e-6);
        assert_eq!(snapshot.held_seconds(LogicalControl::Brake), 0.0);
    }

    #[test]
    fn test_rebind_resets_changed_controls_only() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.on_key_down("w", t0);
        tracker.on_key_down("a", t0);

        let mut bindings = KeyBindings::default();
        bindings.set(LogicalControl::Throttle, "up");
        tracker.rebind(&bindings);

        assert!(!tracker.state(LogicalControl::Throttle).pressed);
        assert!(tracker.state(LogicalControl::SteerLeft).pressed);

        tracker.on_key_down("up", t0);
        assert!(tracker.state(LogicalControl::Throttle).pressed);
        tracker.on_key_up("w", t0);
        assert!(tracker.state(LogicalControl::Throttle).pressed);
    }

    #[test]
    fn test_control_names_round_trip() {
        for control in LogicalControl::ALL {
            assert_eq!(LogicalControl::from_name(control.name()), Some(control));
            assert_eq!(LogicalControl::ALL[control.index()], control);
        }
    }
}
