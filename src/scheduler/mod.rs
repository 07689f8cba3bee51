//! Update scheduling
//!
//! 1. [`tick_processor`] - one shaping tick as a typestate machine
//! 2. [`UpdateScheduler`] - drives the processor at 60 Hz
//! 3. [`supervisor`] - owns the periodic tasks and their shutdown
//!
//! ```text
//!            ┌──────────── 16.7 ms ────────────┐
//! Waiting ──begin──► Shaping ──shape──► Publishing ──publish──► Waiting
//!    ▲                  │ error                                   │
//!    └──────────────────┴──────────── output held ◄───────────────┘
//! ```

pub mod supervisor;
pub mod tick_processor;

pub use supervisor::{ShutdownReport, SupervisorError, TaskSupervisor};
pub use tick_processor::{TickError, TickInput, TickProcessor, TickSettings, Waiting};

use crate::keyboard::SharedKeyTracker;
use crate::persistence::DriveConfig;
use crate::shaping::DriveOutput;
use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub tick: TickSettings,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_micros(16_667),
            tick: TickSettings::default(),
        }
    }
}

/// What happened on one scheduler tick
#[derive(Debug)]
pub enum TickOutcome {
    Committed(DriveOutput),
    /// The tick failed, the previous output stays published
    Held(TickError),
    /// Shaping is switched off because a wheel is in charge
    Disabled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub committed: u64,
    pub failed: u64,
    pub disabled: u64,
    /// Ticks dropped because the previous one ran late
    pub skipped: u64,
}

/// Runs the tick processor; shaping can be switched off from the device arbitrator
pub struct UpdateScheduler {
    processor: Option<TickProcessor<Waiting>>,
    output_rx: watch::Receiver<DriveOutput>,
    enabled: Arc<AtomicBool>,
    was_enabled: bool,
    settings: SchedulerSettings,
    stats: SchedulerStats,
}

impl UpdateScheduler {
    pub fn new(
        tracker: SharedKeyTracker,
        config_rx: watch::Receiver<Arc<DriveConfig>>,
        settings: Option<SchedulerSettings>,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        info!(
            "Creating update scheduler, tick interval {:?}",
            settings.tick_interval
        );
        let processor = TickProcessor::create(tracker, config_rx, Some(settings.tick.clone()));
        let output_rx = processor.subscribe();
        Self {
            processor: Some(processor),
            output_rx,
            enabled: Arc::new(AtomicBool::new(true)),
            was_enabled: true,
            settings,
            stats: SchedulerStats::default(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DriveOutput> {
        self.output_rx.clone()
    }

    /// Shared switch; cleared while another input device is in charge
    pub fn enabled_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.enabled)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Runs one tick at `now`. Taking `&mut self` rules out overlapping ticks
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let Some(mut processor) = self.processor.take() else {
            warn!("Tick processor missing, skipping tick");
            self.stats.skipped += 1;
            return TickOutcome::Disabled;
        };

        let enabled = self.enabled.load(Ordering::Acquire);
        if enabled != self.was_enabled {
            info!(
                "Keyboard shaping {}",
                if enabled { "enabled" } else { "disabled" }
            );
            // The keyboard takes over again from neutral, not from stale axes
            if enabled {
                processor = processor.reset();
            }
            self.was_enabled = enabled;
        }
        if !enabled {
            self.stats.disabled += 1;
            self.processor = Some(processor.hold(now));
            return TickOutcome::Disabled;
        }

        match processor.begin(now).and_then(|p| p.shape()) {
            Ok(publishing) => {
                let processor = publishing.publish();
                let output = processor.output();
                self.processor = Some(processor);
                self.stats.committed += 1;
                TickOutcome::Committed(output)
            }
            Err((processor, e)) => {
                warn!("Tick failed, holding previous output: {}", e);
                self.processor = Some(processor);
                self.stats.failed += 1;
                TickOutcome::Held(e)
            }
        }
    }

    /// Ticks until `cancel` fires. Late ticks are skipped, never queued
    pub async fn run(mut self, cancel: CancellationToken) {
        let period = self.settings.tick_interval;
        info!("Update scheduler running every {:?}", period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_tick: Option<Instant> = None;
        let mut last_stats_time = Local::now();
        let stats_interval = chrono::Duration::seconds(30);
        let mut window = SchedulerStats::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                instant = ticker.tick() => {
                    if let Some(last) = last_tick {
                        let missed = (instant - last).as_micros() / period.as_micros().max(1);
                        if missed > 1 {
                            let skipped = (missed - 1) as u64;
                            debug!("Skipped {} late ticks", skipped);
                            self.stats.skipped += skipped;
                        }
                    }
                    last_tick = Some(instant);
                }
            }

            self.tick(Instant::now());

            let now = Local::now();
            if now - last_stats_time > stats_interval {
                let elapsed_seconds = (now - last_stats_time).num_seconds().max(1);
                let committed = self.stats.committed - window.committed;
                info!(
                    "Scheduler stats: {} committed, {} failed, {} disabled, {} skipped in {} seconds ({:.1} ticks/sec)",
                    committed,
                    self.stats.failed - window.failed,
                    self.stats.disabled - window.disabled,
                    self.stats.skipped - window.skipped,
                    elapsed_seconds,
                    committed as f64 / elapsed_seconds as f64
                );
                window = self.stats;
                last_stats_time = now;
            }
        }
        info!(
            "Update scheduler stopped after {} committed ticks",
            self.stats.committed
        );
    }
}
