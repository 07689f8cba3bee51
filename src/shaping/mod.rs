//! Axis shaping
//!
//! Turns a [`KeySnapshot`](crate::keyboard::KeySnapshot) into analog driving
//! axes. [`axis_shaper`] holds the curve, deadzone and smoothing math plus the
//! per-axis state; [`assist`] applies the counter-steer and anti-spin
//! corrections to the shaped values before they are published.

pub mod assist;
pub mod axis_shaper;

pub use assist::{apply_assists, AssistReport};
pub use axis_shaper::{
    apply_deadzone, progressivity, raw_from_hold, smooth_toward, Axis, AxisShaper, AxisState,
    ShapeError,
};

use crate::keyboard::{KeySnapshot, LogicalControl};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Upper bound of a virtual joystick axis
pub const VIRTUAL_AXIS_MAX: u16 = 32767;
/// Virtual steering value for a centered wheel
pub const VIRTUAL_AXIS_CENTER: u16 = 16384;

/// Normalized axis values: steering in [-1, 1], pedals in [0, 1]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub steering: f32,
    pub throttle: f32,
    pub brake: f32,
}

impl Axes {
    pub fn new(steering: f32, throttle: f32, brake: f32) -> Self {
        Self {
            steering,
            throttle,
            brake,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.steering.is_finite() && self.throttle.is_finite() && self.brake.is_finite()
    }

    /// Clamps into the valid ranges; non-finite components fall back to neutral
    pub fn clamped(self) -> Self {
        fn clamp_or(value: f32, lo: f32, hi: f32) -> f32 {
            if value.is_finite() {
                value.clamp(lo, hi)
            } else {
                0.0
            }
        }
        Self {
            steering: clamp_or(self.steering, -1.0, 1.0),
            throttle: clamp_or(self.throttle, 0.0, 1.0),
            brake: clamp_or(self.brake, 0.0, 1.0),
        }
    }

    /// 16-bit virtual joystick representation
    pub fn to_virtual(self) -> VirtualAxes {
        let axes = self.clamped();
        let max = f32::from(VIRTUAL_AXIS_MAX);
        VirtualAxes {
            steering: ((axes.steering + 1.0) * 0.5 * max).round() as u16,
            throttle: (axes.throttle * max).round() as u16,
            brake: (axes.brake * max).round() as u16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualAxes {
    pub steering: u16,
    pub throttle: u16,
    pub brake: u16,
}

impl Default for VirtualAxes {
    fn default() -> Self {
        Self {
            steering: VIRTUAL_AXIS_CENTER,
            throttle: 0,
            brake: 0,
        }
    }
}

/// Digital controls passed through next to the axes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buttons {
    pub gear_up: bool,
    pub gear_down: bool,
    pub clutch: bool,
    pub handbrake: bool,
}

impl Buttons {
    pub fn from_snapshot(snapshot: &KeySnapshot) -> Self {
        Self {
            gear_up: snapshot.is_pressed(LogicalControl::GearUp),
            gear_down: snapshot.is_pressed(LogicalControl::GearDown),
            clutch: snapshot.is_pressed(LogicalControl::Clutch),
            handbrake: snapshot.is_pressed(LogicalControl::Handbrake),
        }
    }
}

/// What one committed tick publishes
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DriveOutput {
    pub axes: Axes,
    pub buttons: Buttons,
    /// Number of the tick that produced this output, 0 before the first commit
    pub tick: u64,
    pub committed_at: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_virtual_axes_range() {
        assert_eq!(Axes::default().to_virtual(), VirtualAxes::default());
        assert_eq!(
            Axes::new(-1.0, 1.0, 0.0).to_virtual(),
            VirtualAxes {
                steering: 0,
                throttle: VIRTUAL_AXIS_MAX,
                brake: 0
            }
        );
        assert_eq!(Axes::new(1.0, 0.0, 0.5).to_virtual().steering, VIRTUAL_AXIS_MAX);
        assert_eq!(Axes::new(3.0, -2.0, 7.0).to_virtual().brake, VIRTUAL_AXIS_MAX);
    }

    #[test]
    fn test_non_finite_falls_back_to_neutral() {
        let axes = Axes::new(f32::NAN, f32::INFINITY, 0.5).clamped();
        assert_eq!(axes, Axes::new(0.0, 0.0, 0.5));
        assert_eq!(
            Axes::new(f32::NAN, 0.0, 0.0).to_virtual().steering,
            VIRTUAL_AXIS_CENTER
        );
    }

    #[test]
    fn test_buttons_follow_snapshot() {
        let snapshot = KeySnapshot::default()
            .with(LogicalControl::Clutch, true, Duration::from_millis(20))
            .with(LogicalControl::Throttle, true, Duration::from_millis(20));
        let buttons = Buttons::from_snapshot(&snapshot);
        assert!(buttons.clutch);
        assert!(!buttons.handbrake);
    }
}
