//! Drive Assist Handle - public API of the assist core
//!
//! Wires the subsystems together and owns their lifecycle:
//!
//! ```text
//! KeyEventSource ──► KeyHoldTracker ──► UpdateScheduler (60 Hz) ──► watch<DriveOutput>
//!                         │                    ▲                       │    │
//!                         ▼                    │ enabled               ▼    ▼
//! WheelActivitySource ► DeviceArbitrator (10 Hz) ──► listeners   ForceFeedback  InputRecorder
//! ```
//!
//! Everything periodic runs under one [`TaskSupervisor`]; [`DriveAssist::shutdown`]
//! unsubscribes from the key source first and then stops the tasks with a
//! bounded join timeout.

use crate::device::{
    ArbitratorSettings, DeviceArbitrator, DeviceListeners, InputDevice, ListenerError, NoWheel,
    WheelActivitySource,
};
use crate::feedback::catalog::DEFAULT_GAME;
use crate::feedback::{
    builtin_catalog, FeedbackEvent, FeedbackPattern, FeedbackSettings, FeedbackSink, ForceFeedback,
    VehicleCatalog, VehicleParams,
};
use crate::keyboard::{
    KeyEventSource, KeyHoldTracker, KeySourceError, KeyTransition, SharedKeyTracker,
};
use crate::persistence::{
    AssistConfig, ConfigError, ConfigPortal, DriveConfig, KeyBindings, SmoothingConfig,
    SteeringMode, TomlSettingsStore,
};
use crate::recorder::InputRecorder;
use crate::scheduler::{
    SchedulerSettings, ShutdownReport, SupervisorError, TaskSupervisor, UpdateScheduler,
};
use crate::shaping::{Axes, DriveOutput, VirtualAxes};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const TASK_AXIS_SHAPING: &str = "axis-shaping";
pub const TASK_DEVICE_ARBITRATION: &str = "device-arbitration";
pub const TASK_FORCE_FEEDBACK: &str = "force-feedback";
pub const TASK_INPUT_RECORDER: &str = "input-recorder";

/// Timing settings for every subsystem
#[derive(Clone, Debug)]
pub struct DriveAssistSettings {
    pub scheduler: SchedulerSettings,
    pub arbitrator: ArbitratorSettings,
    pub feedback: FeedbackSettings,
    /// How long shutdown waits for each task before abandoning it
    pub join_timeout: Duration,
}

impl Default for DriveAssistSettings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            arbitrator: ArbitratorSettings::default(),
            feedback: FeedbackSettings::default(),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// Errors that can occur while starting or reconfiguring the assist core
///
/// Only startup failures are fatal; everything at runtime is logged and
/// absorbed by the subsystem it happens in.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("No key event source configured")]
    MissingKeySource,

    #[error("Key source error: {0}")]
    KeySource(#[from] KeySourceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

pub struct DriveAssistBuilder {
    config: DriveConfig,
    key_source: Option<Box<dyn KeyEventSource>>,
    wheel: Box<dyn WheelActivitySource>,
    feedback_sink: Option<Box<dyn FeedbackSink>>,
    catalog: Arc<dyn VehicleCatalog>,
    recordings_dir: PathBuf,
    settings: DriveAssistSettings,
}

impl Default for DriveAssistBuilder {
    fn default() -> Self {
        Self {
            config: DriveConfig::default(),
            key_source: None,
            wheel: Box::new(NoWheel),
            feedback_sink: None,
            catalog: Arc::new(builtin_catalog()),
            recordings_dir: PathBuf::from("recordings"),
            settings: DriveAssistSettings::default(),
        }
    }
}

impl DriveAssistBuilder {
    pub fn config(mut self, config: DriveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn key_source(mut self, source: impl KeyEventSource + 'static) -> Self {
        self.key_source = Some(Box::new(source));
        self
    }

    pub fn wheel_source(mut self, wheel: impl WheelActivitySource) -> Self {
        self.wheel = Box::new(wheel);
        self
    }

    /// Force feedback only runs when a sink is set
    pub fn feedback_sink(mut self, sink: impl FeedbackSink) -> Self {
        self.feedback_sink = Some(Box::new(sink));
        self
    }

    pub fn catalog(mut self, catalog: impl VehicleCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recordings_dir = dir.into();
        self
    }

    pub fn settings(mut self, settings: DriveAssistSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Binds the key source and starts every task. Must run inside a tokio runtime
    pub fn spawn(self) -> Result<DriveAssist, DriveError> {
        let DriveAssistBuilder {
            config,
            key_source,
            wheel,
            feedback_sink,
            catalog,
            recordings_dir,
            settings,
        } = self;
        let mut key_source = key_source.ok_or(DriveError::MissingKeySource)?;
        info!(
            "Spawning drive assist (key source: {}, wheel: {})",
            key_source.name(),
            wheel.name()
        );

        let portal = ConfigPortal::new(config);
        let tracker = KeyHoldTracker::shared(&portal.current().key_bindings);

        let key_table = Arc::clone(&tracker);
        key_source.subscribe(Arc::new(move |transition: KeyTransition| {
            key_table
                .lock()
                .on_key_transition(&transition.key, transition.is_down, transition.timestamp);
        }))?;

        let scheduler = UpdateScheduler::new(
            Arc::clone(&tracker),
            portal.subscribe(),
            Some(settings.scheduler.clone()),
        );
        let output_rx = scheduler.subscribe();

        // Shaping pauses while the wheel is in charge
        let listeners = Arc::new(DeviceListeners::new());
        let enabled = scheduler.enabled_flag();
        listeners.add(
            TASK_AXIS_SHAPING,
            Arc::new(move |device: InputDevice| -> Result<(), ListenerError> {
                enabled.store(device != InputDevice::SteeringWheel, Ordering::Release);
                Ok(())
            }),
        );

        let threshold = Duration::from_secs_f32(portal.current().detection_threshold_secs);
        let arbitrator = DeviceArbitrator::new(
            Arc::clone(&tracker),
            wheel,
            Arc::clone(&listeners),
            settings.arbitrator.clone(),
            threshold,
        )
        .with_config(portal.subscribe());
        let device_rx = arbitrator.subscribe();

        let (vehicle_tx, vehicle_rx) = watch::channel(catalog.get_vehicle_for_game(DEFAULT_GAME));
        let (speed_tx, speed_rx) = watch::channel(0.0f32);
        let recorder = Arc::new(InputRecorder::new(recordings_dir));

        let mut supervisor = TaskSupervisor::new(settings.join_timeout);
        let mut pulse_tx = None;
        let started = (|| -> Result<(), SupervisorError> {
            supervisor.spawn(TASK_AXIS_SHAPING, move |cancel| scheduler.run(cancel))?;
            supervisor.spawn(TASK_DEVICE_ARBITRATION, move |cancel| arbitrator.run(cancel))?;

            if let Some(sink) = feedback_sink {
                let feedback = ForceFeedback::new(
                    sink,
                    portal.subscribe(),
                    vehicle_rx,
                    speed_rx,
                    settings.feedback.clone(),
                );
                pulse_tx = Some(feedback.pulse_sender());
                let outputs = output_rx.clone();
                supervisor.spawn(TASK_FORCE_FEEDBACK, move |cancel| feedback.run(outputs, cancel))?;
            }

            let task_recorder = Arc::clone(&recorder);
            let outputs = output_rx.clone();
            supervisor.spawn(TASK_INPUT_RECORDER, move |cancel| {
                task_recorder.run(outputs, cancel)
            })?;
            Ok(())
        })();

        if let Err(e) = started {
            warn!("Failed to start drive assist tasks: {}", e);
            key_source.unsubscribe();
            return Err(e.into());
        }

        info!("Drive assist running with tasks {:?}", supervisor.task_names());
        Ok(DriveAssist {
            portal,
            tracker,
            key_source,
            output_rx,
            device_rx,
            listeners,
            supervisor,
            recorder,
            catalog,
            vehicle_tx,
            speed_tx,
            pulse_tx,
        })
    }
}

/// Running assist core
pub struct DriveAssist {
    portal: ConfigPortal,
    tracker: SharedKeyTracker,
    key_source: Box<dyn KeyEventSource>,
    output_rx: watch::Receiver<DriveOutput>,
    device_rx: watch::Receiver<InputDevice>,
    listeners: Arc<DeviceListeners>,
    supervisor: TaskSupervisor,
    recorder: Arc<InputRecorder>,
    catalog: Arc<dyn VehicleCatalog>,
    vehicle_tx: watch::Sender<Option<VehicleParams>>,
    speed_tx: watch::Sender<f32>,
    pulse_tx: Option<mpsc::Sender<FeedbackEvent>>,
}

impl DriveAssist {
    pub fn builder() -> DriveAssistBuilder {
        DriveAssistBuilder::default()
    }

    /// Feeds a transition directly, bypassing the key source
    pub fn on_key_transition(&self, key: &str, is_down: bool, timestamp: Instant) {
        self.tracker.lock().on_key_transition(key, is_down, timestamp);
    }

    /// Axes of the latest committed tick
    pub fn get_axes(&self) -> Axes {
        self.output_rx.borrow().axes
    }

    pub fn output(&self) -> DriveOutput {
        *self.output_rx.borrow()
    }

    pub fn virtual_axes(&self) -> VirtualAxes {
        self.get_axes().to_virtual()
    }

    pub fn subscribe_output(&self) -> watch::Receiver<DriveOutput> {
        self.output_rx.clone()
    }

    /// Registers a listener for device changes; it only hears about changes
    pub fn on_device_changed<F>(&self, name: &str, listener: F)
    where
        F: Fn(InputDevice) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.listeners.add(name, Arc::new(listener));
    }

    pub fn current_device(&self) -> InputDevice {
        *self.device_rx.borrow()
    }

    pub fn subscribe_device(&self) -> watch::Receiver<InputDevice> {
        self.device_rx.clone()
    }

    pub fn config(&self) -> Arc<DriveConfig> {
        self.portal.current()
    }

    pub fn config_portal(&self) -> &ConfigPortal {
        &self.portal
    }

    /// Swaps bindings, smoothing and assists; new bindings apply to the next key event
    pub fn configure(
        &self,
        bindings: KeyBindings,
        smoothing: SmoothingConfig,
        assists: AssistConfig,
    ) -> Arc<DriveConfig> {
        let config = self.portal.configure(bindings, smoothing, assists);
        self.tracker.lock().rebind(&config.key_bindings);
        config
    }

    pub fn set_key_bindings(&self, bindings: KeyBindings) -> Arc<DriveConfig> {
        let config = self.portal.set_key_bindings(bindings);
        self.tracker.lock().rebind(&config.key_bindings);
        config
    }

    pub fn apply_tunable(&self, name: &str, raw: &str) -> Result<Arc<DriveConfig>, DriveError> {
        Ok(self.portal.apply_tunable(name, raw)?)
    }

    pub fn set_steering_mode(&self, mode: SteeringMode) -> Arc<DriveConfig> {
        self.portal.apply_steering_mode(mode)
    }

    /// Applies the game's profile, when there is one, and selects its vehicle
    pub fn set_active_game(&self, executable: &str) -> Option<VehicleParams> {
        match self.portal.apply_game_profile(executable) {
            Ok(_) => info!("Applied game profile for {}", executable),
            Err(e) => debug!("No profile applied for {}: {}", executable, e),
        }
        let vehicle = self.catalog.get_vehicle_for_game(executable);
        self.vehicle_tx.send_replace(vehicle);
        vehicle
    }

    pub fn set_vehicle_speed(&self, speed_kmh: f32) {
        self.speed_tx.send_replace(speed_kmh);
    }

    /// Queues a one-off feedback event; false when feedback is off or the queue is full
    pub fn trigger_feedback(&self, pattern: FeedbackPattern, intensity: f32) -> bool {
        match &self.pulse_tx {
            Some(tx) => tx.try_send(pattern.event(intensity)).is_ok(),
            None => false,
        }
    }

    pub fn recorder(&self) -> &Arc<InputRecorder> {
        &self.recorder
    }

    pub fn is_running(&self, task: &str) -> bool {
        self.supervisor.is_running(task)
    }

    pub async fn save_config(&self, store: &mut TomlSettingsStore) -> color_eyre::Result<()> {
        self.portal.save_to(store).await
    }

    /// Stops key delivery, then every task
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!("Shutting down drive assist");
        self.key_source.unsubscribe();
        self.supervisor.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_without_key_source_fails() {
        let result = DriveAssist::builder().spawn();
        assert!(matches!(result, Err(DriveError::MissingKeySource)));
    }
}
