//! Device Arbitrator
//!
//! Decides every 100 ms whether the keyboard or a physical wheel is in
//! charge. A device counts as active for `detection_threshold` after its last
//! input; only a single active device wins, anything else is `Unknown`.
//! Listeners hear about a decision only when it changes.

use super::wheel_source::{SampleError, WheelActivitySource};
use crate::keyboard::SharedKeyTracker;
use crate::persistence::DriveConfig;
use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDevice {
    Keyboard,
    SteeringWheel,
    #[default]
    Unknown,
}

impl fmt::Display for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputDevice::Keyboard => "keyboard",
            InputDevice::SteeringWheel => "steering wheel",
            InputDevice::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListenerError {
    #[error("Listener {name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("Listener {0} panicked")]
    Panicked(String),
}

/// Most recent activity per device and the resulting decision
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceActivity {
    pub last_keyboard_time: Option<Instant>,
    pub last_wheel_time: Option<Instant>,
    pub detection_threshold: Duration,
    pub current_device: InputDevice,
}

impl DeviceActivity {
    pub fn new(detection_threshold: Duration) -> Self {
        Self {
            last_keyboard_time: None,
            last_wheel_time: None,
            detection_threshold,
            current_device: InputDevice::Unknown,
        }
    }

    fn recent(&self, last: Option<Instant>, now: Instant) -> bool {
        last.is_some_and(|last| now.saturating_duration_since(last) < self.detection_threshold)
    }

    /// Decision for `now` without recording anything
    pub fn decide(&self, now: Instant) -> InputDevice {
        let keyboard = self.recent(self.last_keyboard_time, now);
        let wheel = self.recent(self.last_wheel_time, now);
        match (keyboard, wheel) {
            (true, false) => InputDevice::Keyboard,
            (false, true) => InputDevice::SteeringWheel,
            _ => InputDevice::Unknown,
        }
    }

    /// Records one sample; returns the new device when the decision changed
    pub fn observe(
        &mut self,
        keyboard_active: bool,
        wheel_active: bool,
        now: Instant,
    ) -> Option<InputDevice> {
        if keyboard_active {
            self.last_keyboard_time = Some(now);
        }
        if wheel_active {
            self.last_wheel_time = Some(now);
        }

        let device = self.decide(now);
        if device == self.current_device {
            return None;
        }
        self.current_device = device;
        Some(device)
    }
}

pub type DeviceListener = Arc<dyn Fn(InputDevice) -> Result<(), ListenerError> + Send + Sync>;

/// Registered device-changed callbacks
#[derive(Default)]
pub struct DeviceListeners {
    listeners: Mutex<Vec<(String, DeviceListener)>>,
}

impl fmt::Debug for DeviceListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .listeners
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        f.debug_struct("DeviceListeners").field("listeners", &names).finish()
    }
}

impl DeviceListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: impl Into<String>, listener: DeviceListener) {
        let name = name.into();
        debug!("Registering device listener {}", name);
        self.listeners.lock().push((name, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener with `device`; failures are logged and returned, never propagated
    pub fn notify(&self, device: InputDevice) -> Vec<ListenerError> {
        // Listeners may register further listeners, so call them without the lock
        let listeners = self.listeners.lock().clone();
        let mut failures = Vec::new();

        for (name, listener) in listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(device)))
                .unwrap_or_else(|_| Err(ListenerError::Panicked(name.clone())));
            if let Err(e) = result {
                error!("Device listener {} failed: {}", name, e);
                failures.push(e);
            }
        }
        failures
    }
}

#[derive(Clone, Debug)]
pub struct ArbitratorSettings {
    pub poll_interval: Duration,
    /// Upper bound for one wheel sample; slower samples count as inactive
    pub sample_timeout: Duration,
}

impl Default for ArbitratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            sample_timeout: Duration::from_millis(50),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArbitratorStats {
    pub samples: u64,
    pub wheel_failures: u64,
    pub wheel_timeouts: u64,
    pub changes: u64,
}

type SharedWheel = Arc<Mutex<Box<dyn WheelActivitySource>>>;

pub struct DeviceArbitrator {
    activity: DeviceActivity,
    tracker: SharedKeyTracker,
    wheel: SharedWheel,
    wheel_name: String,
    listeners: Arc<DeviceListeners>,
    device_tx: watch::Sender<InputDevice>,
    config_rx: Option<watch::Receiver<Arc<DriveConfig>>>,
    settings: ArbitratorSettings,
    stats: ArbitratorStats,
}

impl DeviceArbitrator {
    pub fn new(
        tracker: SharedKeyTracker,
        wheel: Box<dyn WheelActivitySource>,
        listeners: Arc<DeviceListeners>,
        settings: ArbitratorSettings,
        detection_threshold: Duration,
    ) -> Self {
        let wheel_name = wheel.name().to_string();
        info!(
            "Creating device arbitrator (wheel sampler: {}, threshold {:?})",
            wheel_name, detection_threshold
        );
        let (device_tx, _) = watch::channel(InputDevice::Unknown);
        Self {
            activity: DeviceActivity::new(detection_threshold),
            tracker,
            wheel: Arc::new(Mutex::new(wheel)),
            wheel_name,
            listeners,
            device_tx,
            config_rx: None,
            settings,
            stats: ArbitratorStats::default(),
        }
    }

    /// Follows `detection_threshold_secs` from the live configuration
    pub fn with_config(mut self, config_rx: watch::Receiver<Arc<DriveConfig>>) -> Self {
        self.activity.detection_threshold =
            Duration::from_secs_f32(config_rx.borrow().detection_threshold_secs);
        self.config_rx = Some(config_rx);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<InputDevice> {
        self.device_tx.subscribe()
    }

    pub fn current_device(&self) -> InputDevice {
        self.activity.current_device
    }

    pub fn activity(&self) -> &DeviceActivity {
        &self.activity
    }

    pub fn stats(&self) -> ArbitratorStats {
        self.stats
    }

    /// Any bound key down; a busy key table counts as no activity for this sample
    pub fn keyboard_active(&self) -> bool {
        match self.tracker.try_lock() {
            Some(tracker) => tracker.any_pressed(),
            None => {
                debug!("Key table busy, skipping keyboard activity for this sample");
                false
            }
        }
    }

    /// Samples the wheel on the blocking pool; errors and timeouts count as inactive
    pub async fn wheel_active(&mut self) -> bool {
        let wheel = Arc::clone(&self.wheel);
        let task = tokio::task::spawn_blocking(move || {
            // A sample still stuck from an earlier timeout keeps the lock
            match wheel.try_lock() {
                Some(mut source) => source.sample(),
                None => Err(SampleError::Failed("previous sample still running".to_string())),
            }
        });

        match timeout(self.settings.sample_timeout, task).await {
            Ok(Ok(Ok(active))) => active,
            Ok(Ok(Err(e))) => {
                self.stats.wheel_failures += 1;
                warn!("Wheel sampler {} failed: {}", self.wheel_name, e);
                false
            }
            Ok(Err(e)) => {
                self.stats.wheel_failures += 1;
                error!("Wheel sampler {} panicked: {}", self.wheel_name, e);
                false
            }
            Err(_) => {
                self.stats.wheel_timeouts += 1;
                warn!(
                    "Wheel sampler {} timed out after {:?}",
                    self.wheel_name, self.settings.sample_timeout
                );
                false
            }
        }
    }

    /// Applies one observation and notifies on change
    pub fn observe_at(
        &mut self,
        keyboard_active: bool,
        wheel_active: bool,
        now: Instant,
    ) -> Option<InputDevice> {
        self.stats.samples += 1;
        let previous = self.activity.current_device;
        let changed = self.activity.observe(keyboard_active, wheel_active, now)?;

        self.stats.changes += 1;
        info!("Active input device: {} -> {}", previous, changed);
        self.device_tx.send_replace(changed);
        self.listeners.notify(changed);
        Some(changed)
    }

    /// One full sample at the current time
    pub async fn sample(&mut self) -> Option<InputDevice> {
        self.refresh_threshold();
        let keyboard = self.keyboard_active();
        let wheel = self.wheel_active().await;
        self.observe_at(keyboard, wheel, Instant::now())
    }

    fn refresh_threshold(&mut self) {
        let Some(config_rx) = self.config_rx.as_mut() else {
            return;
        };
        if config_rx.has_changed().unwrap_or(false) {
            let secs = config_rx.borrow_and_update().detection_threshold_secs;
            let threshold = Duration::from_secs_f32(secs);
            if threshold != self.activity.detection_threshold {
                info!("Detection threshold changed to {:?}", threshold);
                self.activity.detection_threshold = threshold;
            }
        }
    }

    /// Samples until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Device arbitrator running every {:?}",
            self.settings.poll_interval
        );
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_stats_time = Local::now();
        let stats_interval = chrono::Duration::seconds(30);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.sample().await;

            let now = Local::now();
            if now - last_stats_time > stats_interval {
                info!(
                    "Arbitrator stats: {} samples, {} device changes, {} wheel failures, {} wheel timeouts",
                    self.stats.samples,
                    self.stats.changes,
                    self.stats.wheel_failures,
                    self.stats.wheel_timeouts
                );
                last_stats_time = now;
            }
        }
        info!("Device arbitrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::wheel_source::{NoWheel, ScriptedWheel};
    use crate::keyboard::KeyHoldTracker;
    use crate::persistence::KeyBindings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn arbitrator(wheel: Box<dyn WheelActivitySource>) -> (DeviceArbitrator, SharedKeyTracker) {
        let tracker = KeyHoldTracker::shared(&KeyBindings::default());
        let arbitrator = DeviceArbitrator::new(
            Arc::clone(&tracker),
            wheel,
            Arc::new(DeviceListeners::new()),
            ArbitratorSettings::default(),
            Duration::from_millis(500),
        );
        (arbitrator, tracker)
    }

    fn counting_listener(listeners: &DeviceListeners) -> Arc<Mutex<Vec<InputDevice>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        listeners.add(
            "recorder",
            Arc::new(move |device: InputDevice| -> Result<(), ListenerError> {
                sink.lock().push(device);
                Ok(())
            }),
        );
        seen
    }

    #[test]
    fn test_keyboard_times_out_after_threshold() {
        let (mut arbitrator, _) = arbitrator(Box::new(NoWheel));
        let seen = counting_listener(&arbitrator.listeners);
        let t0 = Instant::now();

        assert_eq!(
            arbitrator.observe_at(true, false, t0),
            Some(InputDevice::Keyboard)
        );
        assert_eq!(
            arbitrator.observe_at(false, false, t0 + Duration::from_millis(400)),
            None
        );
        assert_eq!(arbitrator.current_device(), InputDevice::Keyboard);

        assert_eq!(
            arbitrator.observe_at(false, false, t0 + Duration::from_millis(600)),
            Some(InputDevice::Unknown)
        );
        assert_eq!(
            arbitrator.observe_at(false, false, t0 + Duration::from_millis(700)),
            None
        );

        // One notification for entering Keyboard, exactly one for leaving it
        assert_eq!(
            *seen.lock(),
            vec![InputDevice::Keyboard, InputDevice::Unknown]
        );
        assert_eq!(*arbitrator.subscribe().borrow(), InputDevice::Unknown);
    }

    #[test]
    fn test_both_devices_active_is_unknown() {
        let mut activity = DeviceActivity::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert_eq!(activity.observe(false, true, t0), Some(InputDevice::SteeringWheel));
        assert_eq!(
            activity.observe(true, false, t0 + Duration::from_millis(100)),
            Some(InputDevice::Unknown)
        );
        // Wheel falls out of the window, keyboard is still inside
        assert_eq!(
            activity.observe(false, false, t0 + Duration::from_millis(550)),
            Some(InputDevice::Keyboard)
        );
    }

    #[test]
    fn test_failing_listener_is_isolated() {
        let listeners = DeviceListeners::new();
        listeners.add(
            "broken",
            Arc::new(|_: InputDevice| -> Result<(), ListenerError> {
                Err(ListenerError::Failed {
                    name: "broken".to_string(),
                    reason: "nope".to_string(),
                })
            }),
        );
        listeners.add(
            "panicking",
            Arc::new(|_: InputDevice| -> Result<(), ListenerError> { panic!("listener bug") }),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        listeners.add(
            "healthy",
            Arc::new(move |_: InputDevice| -> Result<(), ListenerError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let failures = listeners.notify(InputDevice::Keyboard);
        assert_eq!(failures.len(), 2);
        assert!(failures.contains(&ListenerError::Panicked("panicking".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keyboard_activity_reads_tracker() {
        let (arbitrator, tracker) = arbitrator(Box::new(NoWheel));
        assert!(!arbitrator.keyboard_active());
        tracker.lock().on_key_down("w", Instant::now());
        assert!(arbitrator.keyboard_active());

        // Never waits on a busy key table
        let guard = tracker.lock();
        assert!(!arbitrator.keyboard_active());
        drop(guard);
        assert!(arbitrator.keyboard_active());
    }

    #[tokio::test]
    async fn test_wheel_sample_errors_count_as_inactive() {
        let wheel = ScriptedWheel::new();
        let handle = wheel.clone();
        let (mut arbitrator, _) = arbitrator(Box::new(wheel));

        handle.set_active(true);
        assert!(arbitrator.wheel_active().await);

        handle.set_failing(true);
        assert!(!arbitrator.wheel_active().await);
        assert_eq!(arbitrator.stats().wheel_failures, 1);
    }

    #[tokio::test]
    async fn test_slow_wheel_sample_times_out() {
        let wheel = ScriptedWheel::new().with_delay(Duration::from_millis(300));
        wheel.set_active(true);
        let (mut arbitrator, _) = arbitrator(Box::new(wheel));

        let started = std::time::Instant::now();
        assert!(!arbitrator.wheel_active().await);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(arbitrator.stats().wheel_timeouts, 1);
    }

    #[tokio::test]
    async fn test_sample_switches_to_wheel() {
        let wheel = ScriptedWheel::new();
        wheel.set_active(true);
        let (mut arbitrator, _) = arbitrator(Box::new(wheel));
        let mut device_rx = arbitrator.subscribe();

        assert_eq!(arbitrator.sample().await, Some(InputDevice::SteeringWheel));
        assert!(device_rx.has_changed().unwrap());
        assert_eq!(*device_rx.borrow_and_update(), InputDevice::SteeringWheel);
    }

    #[tokio::test]
    async fn test_threshold_follows_config() {
        let portal = crate::persistence::ConfigPortal::default();
        let (arbitrator, _) = arbitrator(Box::new(NoWheel));
        let mut arbitrator = arbitrator.with_config(portal.subscribe());

        portal.apply_tunable("detection_threshold", "2").unwrap();
        arbitrator.sample().await;
        assert_eq!(
            arbitrator.activity().detection_threshold,
            Duration::from_secs(2)
        );
    }
}
