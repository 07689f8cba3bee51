use crate::keyboard::{KeySnapshot, SharedKeyTracker};
use crate::persistence::DriveConfig;
use crate::shaping::{apply_assists, AxisShaper, Buttons, DriveOutput, ShapeError};
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// dt used for the very first tick
pub const FIRST_TICK_DT: f32 = 1.0 / 60.0;

// Tick settings
#[derive(Clone, Debug)]
pub struct TickSettings {
    /// Longer gaps (suspend, debugger) are shortened to this
    pub max_tick_gap: Duration,
    pub key_lock_timeout: Duration,
}

impl Default for TickSettings {
    fn default() -> Self {
        Self {
            max_tick_gap: Duration::from_millis(250),
            key_lock_timeout: Duration::from_millis(2),
        }
    }
}

// Tick errors
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("Key table busy for more than {0:?}")]
    KeyTableBusy(Duration),

    #[error("Shaping failed: {0}")]
    Shape(#[from] ShapeError),

    #[error("Tick input missing in shaping state")]
    MissingInput,
}

// Everything one tick works on, captured at the start of the tick
#[derive(Debug, Clone)]
pub struct TickInput {
    pub snapshot: KeySnapshot,
    pub dt: f32,
    pub config: Arc<DriveConfig>,
    pub now: Instant,
}

// Tick lifecycle states
#[state]
#[derive(Debug, Clone)]
pub enum TickState {
    Waiting,
    Shaping(TickInput),
    Publishing,
}

#[machine]
#[derive(Debug)]
pub struct TickProcessor<S: TickState> {
    // Key table shared with the key-event callback
    tracker: SharedKeyTracker,

    // Axis state between ticks
    shaper: AxisShaper,

    // Live configuration
    config_rx: watch::Receiver<Arc<DriveConfig>>,

    // Committed output for pull-based readers
    output_tx: watch::Sender<DriveOutput>,

    settings: TickSettings,

    // Start of the last tick that got past the key table
    last_tick: Option<Instant>,

    // Output of the tick in flight, published in the Publishing state
    pending: DriveOutput,

    tick_count: u64,
}

impl<S: TickState> TickProcessor<S> {
    pub fn subscribe(&self) -> watch::Receiver<DriveOutput> {
        self.output_tx.subscribe()
    }

    /// Last committed output
    pub fn output(&self) -> DriveOutput {
        *self.output_tx.borrow()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

type TickResult<S> = Result<TickProcessor<S>, (TickProcessor<Waiting>, TickError)>;

impl TickProcessor<Waiting> {
    pub fn create(
        tracker: SharedKeyTracker,
        config_rx: watch::Receiver<Arc<DriveConfig>>,
        settings: Option<TickSettings>,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        info!("Creating tick processor with settings: {:?}", settings);
        let (output_tx, _) = watch::channel(DriveOutput::default());
        Self::new(
            tracker,
            AxisShaper::new(),
            config_rx,
            output_tx,
            settings,
            None,
            DriveOutput::default(),
            0,
        )
    }

    fn delta(&self, now: Instant) -> f32 {
        match self.last_tick {
            None => FIRST_TICK_DT,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed > self.settings.max_tick_gap {
                    debug!(
                        "Tick gap {:?} exceeds {:?}, clamping",
                        elapsed, self.settings.max_tick_gap
                    );
                }
                elapsed.min(self.settings.max_tick_gap).as_secs_f32()
            }
        }
    }

    /// Snapshots keys and configuration; a busy key table fails the tick
    pub fn begin(mut self, now: Instant) -> TickResult<Shaping> {
        let config = self.config_rx.borrow_and_update().clone();
        let dt = self.delta(now);

        let key_table = Arc::clone(&self.tracker);
        let timeout = self.settings.key_lock_timeout;
        let snapshot = {
            let Some(mut tracker) = key_table.try_lock_for(timeout) else {
                return Err((self, TickError::KeyTableBusy(timeout)));
            };
            if tracker.bindings() != &config.key_bindings {
                tracker.rebind(&config.key_bindings);
            }
            tracker.snapshot(now)
        };

        self.last_tick = Some(now);
        Ok(self.transition_with(TickInput {
            snapshot,
            dt,
            config,
            now,
        }))
    }

    /// Skips shaping while another device is in charge; the output stays as it was
    pub fn hold(mut self, now: Instant) -> Self {
        self.last_tick = Some(now);
        self
    }

    /// Puts the axes back to neutral and publishes that, used when the keyboard takes over again
    pub fn reset(mut self) -> Self {
        self.shaper.reset();
        let output = DriveOutput {
            tick: self.tick_count,
            ..DriveOutput::default()
        };
        self.output_tx.send_replace(output);
        info!("Axis state reset to neutral");
        self
    }
}

impl TickProcessor<Shaping> {
    /// Shapes and assists; on failure the axis state and output are left untouched
    pub fn shape(mut self) -> TickResult<Publishing> {
        let Some(input) = self.get_state_data().cloned() else {
            warn!("No tick input found in state data, this should not happen");
            return Err((self.transition(), TickError::MissingInput));
        };

        let shaped = match self.shaper.update(&input.snapshot, input.dt, &input.config) {
            Ok(axes) => axes,
            Err(e) => return Err((self.transition(), e.into())),
        };
        let (axes, report) = apply_assists(shaped, &input.config.assists);
        if report.any() {
            debug!("Assists active: {:?}", report);
            self.shaper.commit(axes);
        }

        self.pending = DriveOutput {
            axes,
            buttons: Buttons::from_snapshot(&input.snapshot),
            tick: self.tick_count + 1,
            committed_at: Some(input.now),
        };
        Ok(self.transition())
    }
}

impl TickProcessor<Publishing> {
    /// Commits the pending output and goes back to waiting
    pub fn publish(mut self) -> TickProcessor<Waiting> {
        self.tick_count += 1;
        let output = self.pending;
        self.output_tx.send_replace(output);
        debug!(
            "Tick {} committed S:{:.3} T:{:.3} B:{:.3}",
            output.tick, output.axes.steering, output.axes.throttle, output.axes.brake
        );
        self.transition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::KeyHoldTracker;
    use crate::persistence::{ConfigPortal, KeyBindings};

    fn processor() -> (TickProcessor<Waiting>, SharedKeyTracker, ConfigPortal) {
        let portal = ConfigPortal::default();
        let tracker = KeyHoldTracker::shared(&KeyBindings::default());
        let processor = TickProcessor::create(Arc::clone(&tracker), portal.subscribe(), None);
        (processor, tracker, portal)
    }

    fn run_tick(processor: TickProcessor<Waiting>, now: Instant) -> TickProcessor<Waiting> {
        match processor.begin(now).and_then(|p| p.shape()) {
            Ok(p) => p.publish(),
            Err((_, e)) => panic!("tick failed: {}", e),
        }
    }

    #[test]
    fn test_tick_publishes_throttle() {
        let (mut processor, tracker, _portal) = processor();
        let t0 = Instant::now();
        tracker.lock().on_key_down("w", t0);

        for i in 1..=30 {
            processor = run_tick(processor, t0 + Duration::from_millis(i * 16));
        }
        let output = processor.output();
        assert_eq!(output.tick, 30);
        assert!(output.axes.throttle > 0.3);
        assert_eq!(output.axes.steering, 0.0);
        assert!(!output.buttons.clutch);
    }

    #[test]
    fn test_busy_key_table_holds_output() {
        let (processor, tracker, _portal) = processor();
        let t0 = Instant::now();
        tracker.lock().on_key_down("w", t0);
        let processor = run_tick(processor, t0 + Duration::from_millis(100));
        let before = processor.output();

        let guard = tracker.lock();
        let processor = match processor.begin(t0 + Duration::from_millis(116)) {
            Ok(_) => panic!("tick should fail while the key table is locked"),
            Err((p, e)) => {
                assert!(matches!(e, TickError::KeyTableBusy(_)));
                p
            }
        };
        drop(guard);

        assert_eq!(processor.output(), before);
        assert_eq!(processor.tick_count(), 1);
    }

    #[test]
    fn test_first_tick_uses_nominal_dt_and_gaps_are_clamped() {
        let (processor, _tracker, _portal) = processor();
        let t0 = Instant::now();
        assert_eq!(processor.delta(t0), FIRST_TICK_DT);

        let processor = run_tick(processor, t0);
        assert_eq!(processor.delta(t0 + Duration::from_secs(5)), 0.25);
    }

    #[test]
    fn test_config_swap_rebinds_keys() {
        let (processor, tracker, portal) = processor();
        let t0 = Instant::now();

        let mut bindings = KeyBindings::default();
        bindings.throttle = "up".to_string();
        portal.set_key_bindings(bindings);

        let processor = run_tick(processor, t0);
        tracker.lock().on_key_down("up", t0);
        let processor = run_tick(processor, t0 + Duration::from_millis(500));
        assert!(processor.output().axes.throttle > 0.0);
    }

    #[test]
    fn test_assists_carry_into_next_tick() {
        let (mut processor, tracker, _portal) = processor();
        let t0 = Instant::now();
        {
            let mut tracker = tracker.lock();
            tracker.on_key_down("d", t0);
            tracker.on_key_down("w", t0);
        }

        let mut outputs = Vec::new();
        for i in 0..120 {
            let now = t0 + Duration::from_secs(10) + Duration::from_millis(i * 16);
            processor = run_tick(processor, now);
            assert_eq!(processor.shaper.axes(), processor.output().axes);
            outputs.push(processor.output().axes);
        }

        // With the key held steering only drops through counter-steer, and the
        // next tick smooths up from the reduced value
        let reduced: Vec<usize> = (1..outputs.len() - 1)
            .filter(|&i| outputs[i].steering < outputs[i - 1].steering)
            .collect();
        assert!(!reduced.is_empty());
        for i in reduced {
            assert!(outputs[i + 1].steering > outputs[i].steering);
        }
    }

    #[test]
    fn test_reset_publishes_neutral() {
        let (mut processor, tracker, _portal) = processor();
        let t0 = Instant::now();
        tracker.lock().on_key_down("d", t0);
        for i in 1..=10 {
            processor = run_tick(processor, t0 + Duration::from_millis(i * 16));
        }
        assert!(processor.output().axes.steering > 0.0);

        let processor = processor.reset();
        assert_eq!(processor.output().axes, crate::shaping::Axes::default());
    }
}
