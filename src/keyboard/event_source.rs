//! Key event sources
//!
//! A [`KeyEventSource`] delivers key transitions to a single subscribed
//! handler. The production source wraps an OS keyboard poller
//! (`os-keyboard` feature); [`ScriptedKeySource`] replays a prepared
//! sequence and lets tests inject transitions directly.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A single key going down or up
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTransition {
    pub key: String,
    pub is_down: bool,
    pub timestamp: Instant,
}

/// Callback invoked for every transition, possibly from a foreign thread
pub type KeyHandler = Arc<dyn Fn(KeyTransition) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum KeySourceError {
    #[error("Failed to bind key event source: {0}")]
    BindError(String),

    #[error("Key event source is already subscribed")]
    AlreadySubscribed,
}

/// Injected capability for receiving key events
pub trait KeyEventSource: Send {
    /// Starts delivering transitions to `handler`
    fn subscribe(&mut self, handler: KeyHandler) -> Result<(), KeySourceError>;

    /// Stops delivery. Safe to call when not subscribed
    fn unsubscribe(&mut self);

    fn name(&self) -> &str;
}

/// One step of a replay script, timed relative to the replay start
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedKey {
    pub key: String,
    pub is_down: bool,
    pub offset: Duration,
}

impl ScriptedKey {
    pub fn down(key: &str, offset_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            is_down: true,
            offset: Duration::from_millis(offset_ms),
        }
    }

    pub fn up(key: &str, offset_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            is_down: false,
            offset: Duration::from_millis(offset_ms),
        }
    }
}

/// Key source fed by a script or by a [`KeyInjector`]
#[derive(Clone, Default)]
pub struct ScriptedKeySource {
    handler: Arc<Mutex<Option<KeyHandler>>>,
    script: Vec<ScriptedKey>,
}

impl ScriptedKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<ScriptedKey>) -> Self {
        Self {
            handler: Arc::default(),
            script,
        }
    }

    /// Handle for pushing transitions after the source was moved into the core
    pub fn injector(&self) -> KeyInjector {
        KeyInjector {
            handler: Arc::clone(&self.handler),
        }
    }

    /// Emits the whole script relative to `start`; returns the number of events delivered
    pub fn replay(&self, start: Instant) -> usize {
        let injector = self.injector();
        self.script
            .iter()
            .filter(|step| injector.emit(&step.key, step.is_down, start + step.offset))
            .count()
    }
}

impl KeyEventSource for ScriptedKeySource {
    fn subscribe(&mut self, handler: KeyHandler) -> Result<(), KeySourceError> {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(KeySourceError::AlreadySubscribed);
        }
        *slot = Some(handler);
        info!(
            "Scripted key source subscribed ({} scripted events)",
            self.script.len()
        );
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if self.handler.lock().take().is_some() {
            info!("Scripted key source unsubscribed");
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Cloneable sender side of a [`ScriptedKeySource`]
#[derive(Clone)]
pub struct KeyInjector {
    handler: Arc<Mutex<Option<KeyHandler>>>,
}

impl KeyInjector {
    /// Returns false when nobody is subscribed
    pub fn emit(&self, key: &str, is_down: bool, timestamp: Instant) -> bool {
        // Clone the handler out so it never runs under the slot lock
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(KeyTransition {
                    key: key.to_string(),
                    is_down,
                    timestamp,
                });
                true
            }
            None => {
                debug!("Dropping injected key {} (no subscriber)", key);
                false
            }
        }
    }

    pub fn press(&self, key: &str, timestamp: Instant) -> bool {
        self.emit(key, true, timestamp)
    }

    pub fn release(&self, key: &str, timestamp: Instant) -> bool {
        self.emit(key, false, timestamp)
    }
}

/// Maps an OS key name to the lower-case names used in key bindings
pub fn normalize_key_name(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let name = match lower.as_str() {
        "lshift" | "rshift" | "leftshift" | "rightshift" => "shift",
        "lcontrol" | "rcontrol" | "leftcontrol" | "rightcontrol" | "control" => "ctrl",
        "lalt" | "ralt" | "leftalt" | "rightalt" | "option" => "alt",
        "escape" => "esc",
        other => {
            // Digit keys come through as "key1" etc.
            if let Some(digit) = other.strip_prefix("key") {
                if digit.len() == 1 {
                    return digit.to_string();
                }
            }
            return other.to_string();
        }
    };
    if name != lower {
        debug!("Normalized key {} -> {}", raw, name);
    }
    name.to_string()
}

#[cfg(feature = "os-keyboard")]
pub use os_source::DeviceQueryKeySource;

#[cfg(feature = "os-keyboard")]
mod os_source {
    use super::{normalize_key_name, KeyEventSource, KeyHandler, KeySourceError, KeyTransition};
    use device_query::{DeviceQuery, DeviceState, Keycode};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread::JoinHandle;
    use std::time::Duration;
    use tokio::time::Instant;
    use tracing::{debug, error, info, warn};

    /// Polls the OS keyboard state and turns set differences into transitions
    pub struct DeviceQueryKeySource {
        poll_interval: Duration,
        running: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    }

    impl DeviceQueryKeySource {
        pub fn new(poll_interval: Duration) -> Self {
            Self {
                poll_interval,
                running: Arc::new(AtomicBool::new(false)),
                worker: None,
            }
        }
    }

    impl Default for DeviceQueryKeySource {
        fn default() -> Self {
            Self::new(Duration::from_millis(2))
        }
    }

    impl KeyEventSource for DeviceQueryKeySource {
        fn subscribe(&mut self, handler: KeyHandler) -> Result<(), KeySourceError> {
            if self.worker.is_some() {
                return Err(KeySourceError::AlreadySubscribed);
            }

            let running = Arc::clone(&self.running);
            running.store(true, Ordering::Release);
            let poll_interval = self.poll_interval;
            let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

            let worker = std::thread::Builder::new()
                .name("key-poller".to_string())
                .spawn(move || {
                    // DeviceState panics when no display is reachable
                    let state = match std::panic::catch_unwind(DeviceState::new) {
                        Ok(state) => state,
                        Err(_) => {
                            let _ = ready_tx.send(Err("keyboard device unavailable".to_string()));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    poll_keys(state, handler, running, poll_interval);
                })
                .map_err(|e| KeySourceError::BindError(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    info!(
                        "OS key source bound, polling every {:?}",
                        self.poll_interval
                    );
                    self.worker = Some(worker);
                    Ok(())
                }
                Ok(Err(reason)) => {
                    error!("Failed to bind OS key source: {}", reason);
                    self.running.store(false, Ordering::Release);
                    let _ = worker.join();
                    Err(KeySourceError::BindError(reason))
                }
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    Err(KeySourceError::BindError(e.to_string()))
                }
            }
        }

        fn unsubscribe(&mut self) {
            self.running.store(false, Ordering::Release);
            if let Some(worker) = self.worker.take() {
                if worker.join().is_err() {
                    warn!("Key poller thread panicked during shutdown");
                }
                info!("OS key source unsubscribed");
            }
        }

        fn name(&self) -> &str {
            "device_query"
        }
    }

    impl Drop for DeviceQueryKeySource {
        fn drop(&mut self) {
            self.unsubscribe();
        }
    }

    fn poll_keys(
        state: DeviceState,
        handler: KeyHandler,
        running: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        let mut previous: HashSet<Keycode> = HashSet::new();
        while running.load(Ordering::Acquire) {
            let current: HashSet<Keycode> = state.get_keys().into_iter().collect();
            let now = Instant::now();

            for key in current.difference(&previous) {
                let name = normalize_key_name(&format!("{:?}", key));
                debug!("OS key down: {}", name);
                handler(KeyTransition {
                    key: name,
                    is_down: true,
                    timestamp: now,
                });
            }
            for key in previous.difference(&current) {
                let name = normalize_key_name(&format!("{:?}", key));
                debug!("OS key up: {}", name);
                handler(KeyTransition {
                    key: name,
                    is_down: false,
                    timestamp: now,
                });
            }

            previous = current;
            std::thread::sleep(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_injector_without_subscriber_drops_events() {
        let source = ScriptedKeySource::new();
        assert!(!source.injector().press("w", Instant::now()));
    }

    #[test]
    fn test_replay_delivers_script_in_order() {
        let mut source = ScriptedKeySource::with_script(vec![
            ScriptedKey::down("w", 0),
            ScriptedKey::down("a", 100),
            ScriptedKey::up("w", 300),
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        source
            .subscribe(Arc::new(move |transition: KeyTransition| {
                sink.lock().push(transition)
            }))
            .unwrap();

        let start = Instant::now();
        assert_eq!(source.replay(start), 3);

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].key, "a");
        assert!(seen[1].is_down);
        assert_eq!(seen[2].timestamp, start + Duration::from_millis(300));
        assert!(!seen[2].is_down);
    }

    #[test]
    fn test_double_subscribe_is_rejected() {
        let mut source = ScriptedKeySource::new();
        source.subscribe(Arc::new(|_: KeyTransition| {})).unwrap();
        assert!(matches!(
            source.subscribe(Arc::new(|_: KeyTransition| {})),
            Err(KeySourceError::AlreadySubscribed)
        ));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut source = ScriptedKeySource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        source
            .subscribe(Arc::new(move |_: KeyTransition| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let injector = source.injector();
        assert!(injector.press("w", Instant::now()));
        source.unsubscribe();
        assert!(!injector.release("w", Instant::now()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_normalize_key_name() {
        assert_eq!(normalize_key_name("LShift"), "shift");
        assert_eq!(normalize_key_name("RControl"), "ctrl");
        assert_eq!(normalize_key_name("Space"), "space");
        assert_eq!(normalize_key_name("A"), "a");
        assert_eq!(normalize_key_name("Key1"), "1");
        assert_eq!(normalize_key_name("Escape"), "esc");
    }
}
