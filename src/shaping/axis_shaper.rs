//! Axis Shaping Engine
//!
//! Per tick, every axis goes through the same steps:
//!
//! ```text
//! hold time ──► raw curve ──► deadzone ──► smoothing ──► return-to-center ──► clamp
//! ```
//!
//! The raw curve is `1 - exp(-hold * k)`: it starts at zero, rises fast and
//! flattens towards full deflection, so short taps produce small corrections
//! and a held key ramps to full lock. Smoothing is exponential and expressed
//! per 1/60 s, which keeps the feel identical when ticks arrive late.

use super::Axes;
use crate::keyboard::{KeySnapshot, LogicalControl};
use crate::persistence::DriveConfig;
use tracing::{debug, warn};

/// `k` of the raw curve at neutral curve strength
pub const BASE_PROGRESSIVITY: f32 = 2.0;
/// Curve strength at which `k == BASE_PROGRESSIVITY`
pub const NEUTRAL_CURVE_STRENGTH: f32 = 1.5;
/// Center snap at which return-to-center runs at `center_speed` unscaled
pub const NEUTRAL_CENTER_SNAP: f32 = 0.8;
/// Distances below this snap straight to the target
pub const SNAP_EPSILON: f32 = 1e-3;
/// Smoothing factors are defined per frame at this rate
const REFERENCE_RATE: f32 = 60.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("Invalid tick interval: {0}s")]
    InvalidDelta(f32),

    #[error("Shaping produced a non-finite {axis} value")]
    NonFinite { axis: &'static str },
}

/// Normalized deflection for a key held `hold_secs`; 0 for no or invalid hold
pub fn raw_from_hold(hold_secs: f32, k: f32) -> f32 {
    if hold_secs.is_nan() || hold_secs <= 0.0 || !k.is_finite() {
        return 0.0;
    }
    (1.0 - (-hold_secs * k).exp()).clamp(0.0, 1.0)
}

/// Progressivity constant for the given curve strength
pub fn progressivity(curve_strength: f32) -> f32 {
    BASE_PROGRESSIVITY * curve_strength / NEUTRAL_CURVE_STRENGTH
}

/// Magnitudes below `deadzone` become exactly zero; everything else passes unchanged
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        value
    }
}

/// One exponential smoothing step. `smoothing` is the fraction of the gap kept per 1/60 s
pub fn smooth_toward(current: f32, target: f32, smoothing: f32, dt: f32) -> f32 {
    if (target - current).abs() < SNAP_EPSILON {
        return target;
    }
    let rate = 1.0 - smoothing.powf(dt * REFERENCE_RATE);
    current + (target - current) * rate
}

/// One output channel with its valid range
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Axis {
    pub current_value: f32,
    pub min: f32,
    pub max: f32,
}

impl Axis {
    pub const fn bipolar() -> Self {
        Self {
            current_value: 0.0,
            min: -1.0,
            max: 1.0,
        }
    }

    pub const fn unipolar() -> Self {
        Self {
            current_value: 0.0,
            min: 0.0,
            max: 1.0,
        }
    }

    fn set(&mut self, value: f32) {
        self.current_value = value.clamp(self.min, self.max);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisState {
    pub steering: Axis,
    pub throttle: Axis,
    pub brake: Axis,
}

impl Default for AxisState {
    fn default() -> Self {
        Self {
            steering: Axis::bipolar(),
            throttle: Axis::unipolar(),
            brake: Axis::unipolar(),
        }
    }
}

impl AxisState {
    pub fn axes(&self) -> Axes {
        Axes::new(
            self.steering.current_value,
            self.throttle.current_value,
            self.brake.current_value,
        )
    }
}

/// Owns the axis state between ticks. Only the tick processor mutates it
#[derive(Clone, Debug, Default)]
pub struct AxisShaper {
    state: AxisState,
}

impl AxisShaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AxisState {
        &self.state
    }

    pub fn axes(&self) -> Axes {
        self.state.axes()
    }

    /// Back to neutral, e.g. when the keyboard takes over again from a wheel
    pub fn reset(&mut self) {
        self.state = AxisState::default();
    }

    /// Stores assisted steering and throttle so the next tick smooths from them
    pub fn commit(&mut self, axes: Axes) {
        self.state.steering.set(axes.steering);
        self.state.throttle.set(axes.throttle);
    }

    /// Raw per-axis targets for a snapshot, after the deadzone
    pub fn targets(snapshot: &KeySnapshot, config: &DriveConfig) -> Axes {
        let k = progressivity(config.curve_strength);
        let raw = |control: LogicalControl| {
            raw_from_hold(snapshot.held_seconds(control) * config.response_speed, k)
        };

        let steering = (raw(LogicalControl::SteerRight) - raw(LogicalControl::SteerLeft))
            .clamp(-1.0, 1.0);
        Axes {
            steering: apply_deadzone(steering, config.deadzone_size),
            throttle: apply_deadzone(raw(LogicalControl::Throttle), config.deadzone_size),
            brake: apply_deadzone(raw(LogicalControl::Brake), config.deadzone_size),
        }
    }

    /// Advances every axis by `dt` seconds. On error the previous state is kept
    pub fn update(
        &mut self,
        snapshot: &KeySnapshot,
        dt: f32,
        config: &DriveConfig,
    ) -> Result<Axes, ShapeError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(ShapeError::InvalidDelta(dt));
        }

        let targets = Self::targets(snapshot, config);
        let smoothing = &config.smoothing;
        let mut next = self.state;

        let steering_held = snapshot.is_pressed(LogicalControl::SteerLeft)
            || snapshot.is_pressed(LogicalControl::SteerRight);

        let mut steering = if smoothing.gradual_turn {
            smooth_toward(
                next.steering.current_value,
                targets.steering,
                smoothing.steering,
                dt,
            )
        } else {
            targets.steering
        };
        if !steering_held && smoothing.return_to_center {
            let center_dt = dt * config.center_snap / NEUTRAL_CENTER_SNAP;
            steering = smooth_toward(steering, 0.0, smoothing.center_speed, center_dt);
        }

        let (throttle, brake) = if smoothing.progressive_acceleration {
            (
                smooth_toward(
                    next.throttle.current_value,
                    targets.throttle,
                    smoothing.throttle,
                    dt,
                ),
                smooth_toward(next.brake.current_value, targets.brake, smoothing.brake, dt),
            )
        } else {
            (targets.throttle, targets.brake)
        };

        for (axis, value) in [("steering", steering), ("throttle", throttle), ("brake", brake)] {
            if !value.is_finite() {
                warn!("Discarding shaping result, {} = {}", axis, value);
                return Err(ShapeError::NonFinite { axis });
            }
        }

        next.steering.set(steering);
        next.throttle.set(throttle);
        next.brake.set(brake);
        self.state = next;

        debug!(
            "Shaped S:{:.3} T:{:.3} B:{:.3} (targets {:.3}/{:.3}/{:.3}, dt {:.4})",
            steering, throttle, brake, targets.steering, targets.throttle, targets.brake, dt
        );
        Ok(self.state.axes())
    }
}
