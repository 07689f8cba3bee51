//! Assist Corrector
//!
//! Two heuristics that keep a keyboard driver out of trouble:
//! - **Counter-steer**: hard lock at high throttle gets its steering reduced
//! - **Anti-spin**: a lot of throttle while turning gets the throttle reduced
//!
//! Both rules look at the values as they came out of the shaper, so the
//! counter-steer reduction never switches anti-spin off (or on). Corrected
//! values are written back into the shaper state by the tick processor, so
//! the next tick smooths from them. When no rule fires the axes pass through
//! untouched.

use super::Axes;
use crate::persistence::AssistConfig;
use tracing::debug;

pub const COUNTER_STEER_STEERING: f32 = 0.8;
pub const COUNTER_STEER_THROTTLE: f32 = 0.7;
pub const SPIN_STEERING: f32 = 0.6;
pub const SPIN_THROTTLE: f32 = 0.8;

/// Which rules fired on a tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssistReport {
    pub counter_steer: bool,
    pub spin_prevention: bool,
}

impl AssistReport {
    pub fn any(&self) -> bool {
        self.counter_steer || self.spin_prevention
    }
}

pub fn apply_assists(axes: Axes, config: &AssistConfig) -> (Axes, AssistReport) {
    let before = axes;
    let mut corrected = axes;
    let mut report = AssistReport::default();

    if config.counter_steer
        && before.steering.abs() > COUNTER_STEER_STEERING
        && before.throttle > COUNTER_STEER_THROTTLE
    {
        corrected.steering =
            (before.steering * (1.0 - config.counter_steer_strength)).clamp(-1.0, 1.0);
        report.counter_steer = true;
    }

    if config.spin_prevention
        && before.steering.abs() > SPIN_STEERING
        && before.throttle > SPIN_THROTTLE
    {
        corrected.throttle =
            (before.throttle * (1.0 - config.spin_prevention_strength)).clamp(0.0, 1.0);
        report.spin_prevention = true;
    }

    if report.any() {
        debug!(
            "Assists {:?}: S {:.3} -> {:.3}, T {:.3} -> {:.3}",
            report, before.steering, corrected.steering, before.throttle, corrected.throttle
        );
    }
    (corrected, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_counter_steer_halves_steering() {
        let (axes, report) = apply_assists(Axes::new(0.9, 0.75, 0.0), &AssistConfig::default());
        assert!(close(axes.steering, 0.45));
        assert_eq!(axes.throttle, 0.75);
        assert!(report.counter_steer);
        assert!(!report.spin_prevention);
    }

    #[test]
    fn test_anti_spin_reduces_throttle() {
        let (axes, report) = apply_assists(Axes::new(0.7, 0.85, 0.0), &AssistConfig::default());
        assert!(close(axes.throttle, 0.34));
        assert_eq!(axes.steering, 0.7);
        assert_eq!(
            report,
            AssistReport {
                counter_steer: false,
                spin_prevention: true
            }
        );
    }

    #[test]
    fn test_both_rules_use_pre_assist_values() {
        // Counter-steer drops |steering| to 0.45, anti-spin must still see 0.95
        let (axes, report) = apply_assists(Axes::new(-0.95, 0.9, 0.0), &AssistConfig::default());
        assert!(report.counter_steer && report.spin_prevention);
        assert!(close(axes.steering, -0.475));
        assert!(close(axes.throttle, 0.36));
    }

    #[test]
    fn test_disabled_rules_pass_through() {
        let config = AssistConfig {
            counter_steer: false,
            spin_prevention: false,
            ..AssistConfig::default()
        };
        let input = Axes::new(1.0, 1.0, 0.2);
        let (axes, report) = apply_assists(input, &config);
        assert_eq!(axes, input);
        assert!(!report.any());

        // No clamping either when nothing fired
        let out_of_range = Axes::new(1.5, 1.2, -0.1);
        assert_eq!(apply_assists(out_of_range, &config).0, out_of_range);
    }

    #[test]
    fn test_below_thresholds_untouched() {
        let input = Axes::new(0.6, 0.8, 0.0);
        assert_eq!(apply_assists(input, &AssistConfig::default()).0, input);
    }
}
