//! Global hotkey listener using Linux evdev
//!
//! Opens every keyboard-like device under the input directory and runs one
//! reader task per device. Readers maintain a shared, press-ordered list of
//! held keys and post a payload-free notification on every key press.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use evdev::{AttributeSetRef, Device, EventStream, EventType, KeyCode};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::lifecycle::CancelToken;

/// Capacity of the key press notification channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// evdev key event values
const KEY_RELEASED: i32 = 0;
const KEY_PRESSED: i32 = 1;

/// Errors that can occur while starting the listener
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener is already running")]
    AlreadyRunning,

    #[error("failed to read input directory {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no keyboards found - check permissions on the input devices")]
    NoKeyboardsFound,
}

/// Shared pressed-key state plus the notification sender.
///
/// Cloned into every device reader.
#[derive(Debug, Clone)]
struct KeyTracker {
    pressed: Arc<RwLock<Vec<u16>>>,
    notify_tx: mpsc::Sender<()>,
}

impl KeyTracker {
    /// Apply one key event to the pressed-key state
    async fn apply(&self, code: u16, value: i32) {
        match value {
            KEY_PRESSED => {
                {
                    let mut pressed = self.pressed.write().await;
                    if !pressed.contains(&code) {
                        pressed.push(code);
                    }
                }
                // Any pending notification already triggers a fresh check
                let _ = self.notify_tx.try_send(());
            }
            KEY_RELEASED => {
                let mut pressed = self.pressed.write().await;
                if let Some(idx) = pressed.iter().position(|held| *held == code) {
                    pressed.remove(idx);
                }
            }
            _ => {}
        }
    }
}

/// Global hotkey listener that tracks which keys are held down
pub struct HotkeyListener {
    input_dir: PathBuf,
    pressed: Arc<RwLock<Vec<u16>>>,
    notify_tx: Option<mpsc::Sender<()>>,
    events_rx: Option<mpsc::Receiver<()>>,
    readers: Vec<JoinHandle<()>>,
    stop: Option<CancelToken>,
}

impl HotkeyListener {
    /// Create a new listener for the devices under `input_dir`
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        let (notify_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            input_dir: input_dir.into(),
            pressed: Arc::new(RwLock::new(Vec::new())),
            notify_tx: Some(notify_tx),
            events_rx: Some(events_rx),
            readers: Vec::new(),
            stop: None,
        }
    }

    /// Open all keyboards and spawn one reader task per device.
    ///
    /// Readers run until `cancel` fires or [`stop`](Self::stop) is called.
    pub fn start(&mut self, cancel: &CancelToken) -> Result<(), ListenerError> {
        if self.stop.is_some() {
            return Err(ListenerError::AlreadyRunning);
        }
        let notify_tx = self.notify_tx.clone().ok_or(ListenerError::AlreadyRunning)?;

        let keyboards = find_keyboards(&self.input_dir)?;
        let stop = cancel.child();

        for (path, device) in keyboards {
            let name = device.name().unwrap_or("unknown").to_string();
            let stream = match device.into_event_stream() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(?path, ?e, "failed to open device event stream, skipping");
                    continue;
                }
            };

            info!(device = %name, ?path, "listening");

            let tracker = KeyTracker {
                pressed: Arc::clone(&self.pressed),
                notify_tx: notify_tx.clone(),
            };
            let stop = stop.clone();
            self.readers
                .push(tokio::spawn(read_device(name, stream, tracker, stop)));
        }

        if self.readers.is_empty() {
            stop.cancel();
            return Err(ListenerError::NoKeyboardsFound);
        }

        self.stop = Some(stop);
        Ok(())
    }

    /// Snapshot of the keys currently held, in press order
    pub async fn pressed_keys(&self) -> Vec<u16> {
        self.pressed.read().await.clone()
    }

    /// Take the key press notification receiver.
    ///
    /// Each notification means "re-check the pressed keys"; it carries no
    /// data. Returns `None` if the receiver was already taken.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<()>> {
        self.events_rx.take()
    }

    /// Stop all readers, close their devices and close the event channel
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }

        for reader in self.readers.drain(..) {
            if let Err(e) = reader.await {
                warn!(?e, "device reader panicked");
            }
        }

        self.notify_tx = None;
        info!("hotkey listener stopped");
    }

    /// Check if any device reader is still running
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.readers.iter().any(|reader| !reader.is_finished())
    }
}

/// Read one device until it fails or the listener stops
async fn read_device(
    name: String,
    mut stream: EventStream,
    tracker: KeyTracker,
    stop: CancelToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            result = stream.next_event() => match result {
                Ok(event) => {
                    if event.event_type() == EventType::KEY {
                        tracker.apply(event.code(), event.value()).await;
                    }
                }
                Err(e) => {
                    warn!(device = %name, ?e, "device read failed, reader exiting");
                    break;
                }
            },
        }
    }

    debug!(device = %name, "device reader stopped");
}

/// Open every `event*` node under `input_dir` that looks like a keyboard
fn find_keyboards(input_dir: &Path) -> Result<Vec<(PathBuf, Device)>, ListenerError> {
    let entries = std::fs::read_dir(input_dir).map_err(|source| ListenerError::Discovery {
        path: input_dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("event"))
        })
        .collect();
    paths.sort();

    let mut keyboards = Vec::new();
    for path in paths {
        match Device::open(&path) {
            Ok(device) => {
                if is_keyboard(device.name(), device.supported_keys()) {
                    keyboards.push((path, device));
                } else {
                    debug!(?path, name = ?device.name(), "not a keyboard, skipping");
                }
            }
            Err(e) => {
                debug!(?path, ?e, "failed to open device, skipping");
            }
        }
    }

    Ok(keyboards)
}

/// A device is a keyboard if it reports the whole `q..p` letter row and
/// is not named like a mouse
fn is_keyboard(name: Option<&str>, keys: Option<&AttributeSetRef<KeyCode>>) -> bool {
    if name.is_some_and(|name| name.to_lowercase().contains("mouse")) {
        return false;
    }

    keys.is_some_and(|keys| {
        (KeyCode::KEY_Q.code()..=KeyCode::KEY_P.code())
            .all(|code| keys.contains(KeyCode::new(code)))
    })
}
