//! Keyboard driving assist core
//!
//! Turns digital key holds into smoothed analog steering, throttle and brake
//! axes, corrects them with driving assists and yields to a physical wheel
//! when one is in use. [`DriveAssist`] is the entry point.

pub mod device;
pub mod drive_handle;
pub mod feedback;
pub mod keyboard;
pub mod persistence;
pub mod recorder;
pub mod scheduler;
pub mod shaping;

pub use drive_handle::{DriveAssist, DriveAssistBuilder, DriveAssistSettings, DriveError};
