//! Force feedback
//!
//! Turns committed axes into short vibration events for a [`FeedbackSink`].
//! Strength follows the steering input scaled by the current vehicle's grip,
//! the vehicle speed and the weight transfer from throttle and brake.
//!
//! ## Events
//!
//! - `Road` while steering is outside a small deadzone
//! - `Collision` on a sudden steering change between two outputs
//! - any pattern on demand through [`ForceFeedback::pulse_sender`]

pub mod catalog;

pub use catalog::{builtin_catalog, InMemoryCatalog, VehicleCatalog, VehicleParams};

use crate::persistence::DriveConfig;
use crate::shaping::{Axes, DriveOutput};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Steering magnitude below which no road feedback is produced
pub const ROAD_STEERING_THRESHOLD: f32 = 1000.0 / 32768.0;
/// Steering change between two outputs that counts as an impact
pub const COLLISION_STEERING_DELTA: f32 = 5000.0 / 32768.0;
pub const COLLISION_INTENSITY: f32 = 0.8;
/// Speed at which the speed factor saturates
pub const FULL_SPEED_KMH: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackPattern {
    Road,
    Curb,
    Collision,
}

impl FeedbackPattern {
    pub const ALL: [FeedbackPattern; 3] = [
        FeedbackPattern::Road,
        FeedbackPattern::Curb,
        FeedbackPattern::Collision,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn base_frequency_hz(self) -> u32 {
        match self {
            FeedbackPattern::Road => 100,
            FeedbackPattern::Curb => 200,
            FeedbackPattern::Collision => 500,
        }
    }

    pub fn base_duration_ms(self) -> u32 {
        match self {
            FeedbackPattern::Road => 50,
            FeedbackPattern::Curb => 100,
            FeedbackPattern::Collision => 200,
        }
    }

    /// Event for this pattern at `intensity` in [0, 1]
    pub fn event(self, intensity: f32) -> FeedbackEvent {
        let intensity = if intensity.is_finite() {
            intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        FeedbackEvent {
            pattern: self,
            intensity,
            frequency_hz: (self.base_frequency_hz() as f32 * (0.5 + intensity * 0.5)) as u32,
            duration_ms: (self.base_duration_ms() as f32 * intensity) as u32,
        }
    }
}

impl fmt::Display for FeedbackPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackPattern::Road => write!(f, "road"),
            FeedbackPattern::Curb => write!(f, "curb"),
            FeedbackPattern::Collision => write!(f, "collision"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackEvent {
    pub pattern: FeedbackPattern,
    pub intensity: f32,
    pub frequency_hz: u32,
    pub duration_ms: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedbackError {
    #[error("Feedback sink {sink} failed: {reason}")]
    Sink { sink: String, reason: String },
}

/// Output side of force feedback (rumble motor, audio beeper, log)
pub trait FeedbackSink: Send + 'static {
    fn initialize(&mut self) -> Result<(), FeedbackError> {
        Ok(())
    }

    fn send(&mut self, event: &FeedbackEvent) -> Result<(), FeedbackError>;

    fn shutdown(&mut self) {}

    fn name(&self) -> &str;
}

/// Writes every event to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl FeedbackSink for LogSink {
    fn send(&mut self, event: &FeedbackEvent) -> Result<(), FeedbackError> {
        debug!(
            "Feedback {} intensity {:.2} ({} Hz, {} ms)",
            event.pattern, event.intensity, event.frequency_hz, event.duration_ms
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Keeps every event; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<FeedbackEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FeedbackEvent> {
        self.events.lock().clone()
    }
}

impl FeedbackSink for CollectingSink {
    fn send(&mut self, event: &FeedbackEvent) -> Result<(), FeedbackError> {
        self.events.lock().push(*event);
        Ok(())
    }

    fn name(&self) -> &str {
        "collecting"
    }
}

/// Feedback strength before the configured vibration strength, capped at 1
pub fn force_intensity(axes: Axes, speed_kmh: f32, vehicle: &VehicleParams) -> f32 {
    let speed = if speed_kmh.is_finite() { speed_kmh.max(0.0) } else { 0.0 };
    let speed_factor = (speed / FULL_SPEED_KMH).min(1.0);
    let weight_transfer = (axes.throttle - axes.brake) * 0.1 * (1.0 - vehicle.weight_distribution);

    let intensity = axes.steering.abs()
        * vehicle.tire_grip
        * (1.0 + speed_factor)
        * (1.0 + weight_transfer.abs());
    if intensity.is_finite() {
        intensity.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Minimum spacing between two events of one pattern
#[derive(Debug, Clone)]
struct RateLimiter {
    min_interval: Duration,
    last_event_time: Option<Instant>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_event_time: None,
        }
    }

    fn should_process(&mut self, now: Instant) -> bool {
        let due = self
            .last_event_time
            .map_or(true, |last| now.saturating_duration_since(last) >= self.min_interval);
        if due {
            self.last_event_time = Some(now);
        }
        due
    }
}

#[derive(Clone, Debug)]
pub struct FeedbackSettings {
    /// Per pattern
    pub min_interval: Duration,
    pub pulse_queue: usize,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(50),
            pulse_queue: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedbackStats {
    pub evaluated: u64,
    pub sent: u64,
    pub dropped: u64,
    pub failures: u64,
}

pub struct ForceFeedback {
    sink: Box<dyn FeedbackSink>,
    config_rx: watch::Receiver<Arc<DriveConfig>>,
    vehicle_rx: watch::Receiver<Option<VehicleParams>>,
    speed_rx: watch::Receiver<f32>,
    pulse_tx: mpsc::Sender<FeedbackEvent>,
    pulse_rx: mpsc::Receiver<FeedbackEvent>,
    limiters: Vec<RateLimiter>,
    last_steering: f32,
    stats: FeedbackStats,
}

impl ForceFeedback {
    pub fn new(
        sink: Box<dyn FeedbackSink>,
        config_rx: watch::Receiver<Arc<DriveConfig>>,
        vehicle_rx: watch::Receiver<Option<VehicleParams>>,
        speed_rx: watch::Receiver<f32>,
        settings: FeedbackSettings,
    ) -> Self {
        info!("Creating force feedback with sink {}", sink.name());
        let (pulse_tx, pulse_rx) = mpsc::channel(settings.pulse_queue.max(1));
        Self {
            sink,
            config_rx,
            vehicle_rx,
            speed_rx,
            pulse_tx,
            pulse_rx,
            limiters: FeedbackPattern::ALL
                .iter()
                .map(|_| RateLimiter::new(settings.min_interval))
                .collect(),
            last_steering: 0.0,
            stats: FeedbackStats::default(),
        }
    }

    /// Queue for externally triggered events such as curb strikes
    pub fn pulse_sender(&self) -> mpsc::Sender<FeedbackEvent> {
        self.pulse_tx.clone()
    }

    pub fn stats(&self) -> FeedbackStats {
        self.stats
    }

    /// Events one output produces, before rate limiting
    pub fn evaluate(&mut self, axes: Axes) -> Vec<FeedbackEvent> {
        self.stats.evaluated += 1;
        let previous = std::mem::replace(&mut self.last_steering, axes.steering);

        let config = Arc::clone(&self.config_rx.borrow());
        if !config.force_feedback {
            return Vec::new();
        }
        let Some(vehicle) = *self.vehicle_rx.borrow() else {
            return Vec::new();
        };
        let speed = *self.speed_rx.borrow();
        let strength = config.vibration_strength;

        let mut events = Vec::new();
        let intensity = force_intensity(axes, speed, &vehicle) * strength;
        if axes.steering.abs() > ROAD_STEERING_THRESHOLD && intensity > 0.0 {
            events.push(FeedbackPattern::Road.event(intensity));
        }
        if (axes.steering - previous).abs() > COLLISION_STEERING_DELTA {
            events.push(FeedbackPattern::Collision.event(COLLISION_INTENSITY * strength));
        }
        events
    }

    /// Sends through the sink; returns how many events went out
    pub fn dispatch(&mut self, events: &[FeedbackEvent], now: Instant) -> usize {
        let mut sent = 0;
        for event in events {
            if event.duration_ms == 0 {
                continue;
            }
            if !self.limiters[event.pattern.index()].should_process(now) {
                self.stats.dropped += 1;
                continue;
            }
            match self.sink.send(event) {
                Ok(()) => {
                    sent += 1;
                    self.stats.sent += 1;
                }
                Err(e) => {
                    self.stats.failures += 1;
                    warn!("Failed to send {} feedback: {}", event.pattern, e);
                }
            }
        }
        sent
    }

    pub fn update(&mut self, axes: Axes, now: Instant) -> usize {
        let events = self.evaluate(axes);
        self.dispatch(&events, now)
    }

    /// Follows committed outputs until `cancel` fires or the output channel closes
    pub async fn run(
        mut self,
        mut output_rx: watch::Receiver<DriveOutput>,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self.sink.initialize() {
            error!("Force feedback disabled, sink {} failed to start: {}", self.sink.name(), e);
            return;
        }
        info!("Force feedback running with sink {}", self.sink.name());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = self.pulse_rx.recv() => {
                    if self.config_rx.borrow().force_feedback {
                        self.dispatch(&[event], Instant::now());
                    }
                }
                changed = output_rx.changed() => {
                    if changed.is_err() {
                        debug!("Output channel closed, stopping force feedback");
                        break;
                    }
                    let output = *output_rx.borrow_and_update();
                    self.update(output.axes, Instant::now());
                }
            }
        }

        self.sink.shutdown();
        info!(
            "Force feedback stopped: {} outputs evaluated, {} events sent, {} dropped, {} failures",
            self.stats.evaluated, self.stats.sent, self.stats.dropped, self.stats.failures
        );
    }
}
