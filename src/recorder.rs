//! Input recorder
//!
//! Captures committed outputs while recording is on and stores them as TOML
//! files in the recordings directory:
//!
//! ```toml
//! name = "hotlap"
//! started_at = "2026-03-01T18:22:03.120+01:00"
//!
//! [[frames]]
//! timestamp = "2026-03-01T18:22:03.136+01:00"
//! [frames.axes]
//! steering = 0.12
//! throttle = 0.8
//! brake = 0.0
//! [frames.buttons]
//! gear_up = false
//! ...
//! ```

use crate::shaping::{Axes, Buttons, DriveOutput};
use chrono::{DateTime, Local};
use color_eyre::{eyre::eyre, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECORDING_EXTENSION: &str = "toml";
/// Ten minutes at 60 Hz
pub const DEFAULT_MAX_FRAMES: usize = 36_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub timestamp: DateTime<Local>,
    pub axes: Axes,
    pub buttons: Buttons,
}

impl RecordedFrame {
    pub fn from_output(output: &DriveOutput) -> Self {
        Self {
            timestamp: Local::now(),
            axes: output.axes,
            buttons: output.buttons,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub name: String,
    pub started_at: DateTime<Local>,
    pub frames: Vec<RecordedFrame>,
}

#[derive(Debug, Default)]
struct RecorderState {
    recording: bool,
    started_at: Option<DateTime<Local>>,
    current: Vec<RecordedFrame>,
    finished: Vec<Recording>,
    overflowed: bool,
}

pub struct InputRecorder {
    dir: PathBuf,
    max_frames: usize,
    state: Mutex<RecorderState>,
}

impl InputRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_frames: DEFAULT_MAX_FRAMES,
            state: Mutex::new(RecorderState::default()),
        }
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    /// Starts a new recording; a running one keeps going
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.recording {
            return false;
        }
        state.recording = true;
        state.started_at = Some(Local::now());
        state.current.clear();
        state.overflowed = false;
        info!("Input recording started");
        true
    }

    /// Stops recording and keeps the frames as an unnamed take
    pub fn stop(&self) -> Option<Recording> {
        let mut state = self.state.lock();
        if !state.recording {
            return None;
        }
        state.recording = false;
        let frames = std::mem::take(&mut state.current);
        let started_at = state.started_at.take().unwrap_or_else(Local::now);
        info!("Input recording stopped with {} frames", frames.len());
        if frames.is_empty() {
            return None;
        }

        let take = Recording {
            name: format!("take_{}", state.finished.len() + 1),
            started_at,
            frames,
        };
        state.finished.push(take.clone());
        Some(take)
    }

    pub fn record(&self, frame: RecordedFrame) -> bool {
        let mut state = self.state.lock();
        if !state.recording {
            return false;
        }
        if state.current.len() >= self.max_frames {
            if !state.overflowed {
                warn!(
                    "Recording reached {} frames, dropping further frames",
                    self.max_frames
                );
                state.overflowed = true;
            }
            return false;
        }
        state.current.push(frame);
        true
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().current.len()
    }

    /// Takes finished since the last clear
    pub fn takes(&self) -> Vec<Recording> {
        self.state.lock().finished.clone()
    }

    /// Drops the running recording and every finished take; files stay on disk
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.current.clear();
        state.finished.clear();
        debug!("Recorder cleared");
    }

    /// Writes the running recording, or the last finished take, as `name`
    pub async fn save(&self, name: &str) -> Result<PathBuf> {
        let path = self.recording_path(name)?;
        let recording = {
            let state = self.state.lock();
            if !state.current.is_empty() {
                Recording {
                    name: name.to_string(),
                    started_at: state.started_at.unwrap_or_else(Local::now),
                    frames: state.current.clone(),
                }
            } else if let Some(last) = state.finished.last() {
                Recording {
                    name: name.to_string(),
                    ..last.clone()
                }
            } else {
                return Err(eyre!("Nothing recorded to save"));
            }
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| eyre!("Failed to create recordings directory: {}", e))?;
        let content = toml::to_string_pretty(&recording)
            .map_err(|e| eyre!("Failed to serialize recording: {}", e))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| eyre!("Failed to write recording {}: {}", path.display(), e))?;

        info!(
            "Saved recording {} ({} frames) to {}",
            name,
            recording.frames.len(),
            path.display()
        );
        Ok(path)
    }

    pub async fn load(&self, name: &str) -> Result<Recording> {
        let path = self.recording_path(name)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| eyre!("Failed to read recording {}: {}", path.display(), e))?;
        let recording: Recording = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse recording {}: {}", path.display(), e))?;
        debug!("Loaded recording {} with {} frames", name, recording.frames.len());
        Ok(recording)
    }

    /// Recording names in the directory, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        if !tokio::fs::try_exists(&self.dir)
            .await
            .map_err(|e| eyre!("Failed to check recordings directory: {}", e))?
        {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| eyre!("Failed to read recordings directory: {}", e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| eyre!("Failed to read recordings directory entry: {}", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORDING_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn recording_path(&self, name: &str) -> Result<PathBuf> {
        let stem = name
            .strip_suffix(".toml")
            .unwrap_or(name)
            .trim();
        if stem.is_empty() || stem.contains(['/', '\\']) || stem.starts_with('.') {
            return Err(eyre!("Invalid recording name: {:?}", name));
        }
        Ok(self.dir.join(format!("{}.{}", stem, RECORDING_EXTENSION)))
    }

    /// Records every committed output while recording is on
    pub async fn run(
        self: Arc<Self>,
        mut output_rx: watch::Receiver<DriveOutput>,
        cancel: CancellationToken,
    ) {
        debug!("Input recorder listening for outputs");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = output_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let output = *output_rx.borrow_and_update();
                    if output.tick > 0 {
                        self.record(RecordedFrame::from_output(&output));
                    }
                }
            }
        }
        if self.stop().is_some() {
            info!("Recording in progress was stopped at shutdown");
        }
        debug!("Input recorder stopped");
    }
}
