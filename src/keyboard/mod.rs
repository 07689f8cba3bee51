//! Keyboard subsystem
//!
//! Two pieces:
//!
//! 1. [`event_source`] - where key transitions come from (OS poller or script)
//! 2. [`key_tracker`] - press/release timestamps and hold durations per control
//!
//! ```text
//! KeyEventSource ──► KeyHoldTracker ──► KeySnapshot (per tick)
//!   (transitions)     (Mutex-guarded)
//! ```

pub mod event_source;
pub mod key_tracker;

pub use event_source::{
    normalize_key_name, KeyEventSource, KeyHandler, KeyInjector, KeySourceError, KeyTransition,
    ScriptedKey, ScriptedKeySource,
};
#[cfg(feature = "os-keyboard")]
pub use event_source::DeviceQueryKeySource;
pub use key_tracker::{
    ControlSample, KeyHoldTracker, KeySnapshot, KeyState, LogicalControl, SharedKeyTracker,
};
