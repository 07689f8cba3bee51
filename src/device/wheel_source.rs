//! Wheel activity samplers
//!
//! The arbitrator only needs one bit per sample: "did the physical wheel do
//! something since the last look". Samplers may block, so the arbitrator
//! calls them on the blocking pool under a timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("Wheel device unavailable: {0}")]
    Unavailable(String),

    #[error("Wheel sampling failed: {0}")]
    Failed(String),
}

/// Injected capability answering "is the wheel being used"
pub trait WheelActivitySource: Send + 'static {
    fn sample(&mut self) -> Result<bool, SampleError>;

    fn name(&self) -> &str;
}

/// Sampler for setups without a wheel
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWheel;

impl WheelActivitySource for NoWheel {
    fn sample(&mut self) -> Result<bool, SampleError> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Sampler whose answer is set from outside, for replays and tests
#[derive(Debug, Clone, Default)]
pub struct ScriptedWheel {
    active: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl ScriptedWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sample blocks for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }
}

impl WheelActivitySource for ScriptedWheel {
    fn sample(&mut self) -> Result<bool, SampleError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::Acquire) {
            debug!("Scripted wheel sample failing");
            return Err(SampleError::Failed("scripted failure".to_string()));
        }
        Ok(self.active.load(Ordering::Acquire))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(feature = "wheel")]
pub use gilrs_source::GilrsWheelSource;

#[cfg(feature = "wheel")]
mod gilrs_source {
    use super::{SampleError, WheelActivitySource};
    use gilrs::{Axis, Event, EventType, Gilrs};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread::JoinHandle;
    use std::time::Duration;
    use tracing::{debug, error, info, warn};

    const POLL_INTERVAL: Duration = Duration::from_millis(5);
    const WATCHED_AXES: [Axis; 4] = [
        Axis::LeftStickX,
        Axis::LeftZ,
        Axis::RightZ,
        Axis::RightStickX,
    ];

    /// Watches every gamepad gilrs reports; wheels show up as gamepads
    /// with the steering on a stick axis and the pedals on the Z axes.
    pub struct GilrsWheelSource {
        activity: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    }

    impl GilrsWheelSource {
        /// Starts the polling thread; fails when gilrs cannot be initialized
        pub fn spawn(axis_threshold: f32) -> Result<Self, SampleError> {
            let activity = Arc::new(AtomicBool::new(false));
            let running = Arc::new(AtomicBool::new(true));
            let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

            let thread_activity = Arc::clone(&activity);
            let thread_running = Arc::clone(&running);
            let worker = std::thread::Builder::new()
                .name("wheel-poller".to_string())
                .spawn(move || {
                    // Gilrs stays on this thread for its whole life
                    let gilrs = match Gilrs::new() {
                        Ok(gilrs) => gilrs,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    poll_wheel(gilrs, axis_threshold, thread_activity, thread_running);
                })
                .map_err(|e| SampleError::Unavailable(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    info!("Wheel sampler started (axis threshold {})", axis_threshold);
                    Ok(Self {
                        activity,
                        running,
                        worker: Some(worker),
                    })
                }
                Ok(Err(reason)) => {
                    error!("Failed to initialize gilrs: {}", reason);
                    let _ = worker.join();
                    Err(SampleError::Unavailable(reason))
                }
                Err(e) => Err(SampleError::Unavailable(e.to_string())),
            }
        }
    }

    impl WheelActivitySource for GilrsWheelSource {
        fn sample(&mut self) -> Result<bool, SampleError> {
            if self.worker.as_ref().is_some_and(|w| w.is_finished()) {
                return Err(SampleError::Failed("wheel poller stopped".to_string()));
            }
            Ok(self.activity.swap(false, Ordering::AcqRel))
        }

        fn name(&self) -> &str {
            "gilrs"
        }
    }

    impl Drop for GilrsWheelSource {
        fn drop(&mut self) {
            self.running.store(false, Ordering::Release);
            if let Some(worker) = self.worker.take() {
                if worker.join().is_err() {
                    warn!("Wheel poller thread panicked");
                }
            }
        }
    }

    fn poll_wheel(
        mut gilrs: Gilrs,
        threshold: f32,
        activity: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
    ) {
        while running.load(Ordering::Acquire) {
            let mut active = false;
            while let Some(Event { id, event, .. }) = gilrs.next_event() {
                match event {
                    EventType::AxisChanged(axis, value, _) if value.abs() > threshold => {
                        debug!("Wheel {} axis {:?} = {:.2}", id, axis, value);
                        active = true;
                    }
                    EventType::ButtonPressed(button, _) => {
                        debug!("Wheel {} button {:?} pressed", id, button);
                        active = true;
                    }
                    EventType::Connected => info!("Wheel {} connected", id),
                    EventType::Disconnected => warn!("Wheel {} disconnected", id),
                    _ => {}
                }
            }

            // A wheel held at an angle sends no events but is still in use
            if !active {
                active = gilrs.gamepads().any(|(_, gamepad)| {
                    WATCHED_AXES
                        .iter()
                        .any(|axis| gamepad.value(*axis).abs() > threshold)
                });
            }

            if active {
                activity.store(true, Ordering::Release);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        debug!("Wheel poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_wheel_is_never_active() {
        assert_eq!(NoWheel.sample(), Ok(false));
    }

    #[test]
    fn test_scripted_wheel_follows_handle() {
        let mut wheel = ScriptedWheel::new();
        let handle = wheel.clone();
        assert_eq!(wheel.sample(), Ok(false));

        handle.set_active(true);
        assert_eq!(wheel.sample(), Ok(true));

        handle.set_failing(true);
        assert!(wheel.sample().is_err());
    }
}
