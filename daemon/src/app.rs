//! Daemon control loop
//!
//! Wires the hotkey listener to the keybinding registry and the executor,
//! and reacts to reload and shutdown signals.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{self, ConfigError, Settings};
use crate::executor::Executor;
use crate::hotkey::HotkeyListener;
use crate::lifecycle::{CancelToken, LifecycleSignal, SignalListener};
use crate::registry::Registry;

/// The running daemon
pub struct Daemon {
    settings: Settings,
    registry: Arc<Registry>,
    executor: Executor,
    cancel: CancelToken,
}

impl Daemon {
    /// Load the keybindings named in `settings`
    pub fn load(settings: Settings) -> Result<Self, ConfigError> {
        let bindings = config::load_keybindings(&settings.config_path)?;
        info!(
            path = ?settings.config_path,
            count = bindings.len(),
            "configuration loaded"
        );

        Ok(Self {
            settings,
            registry: Arc::new(Registry::new(bindings)),
            executor: Executor::new(),
            cancel: CancelToken::new(),
        })
    }

    /// Run until a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        let mut listener = HotkeyListener::new(&self.settings.input_dir);
        listener
            .start(&self.cancel)
            .context("failed to start hotkey listener")?;

        let mut events = listener
            .take_events()
            .context("hotkey listener event channel unavailable")?;
        let mut signals = SignalListener::new().context("failed to register signal handlers")?;

        info!("daemon initialized, entering main loop");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(()) => {
                        drain_pending(&mut events);
                        let pressed = listener.pressed_keys().await;
                        self.dispatch(&pressed).await;
                    }
                    None => {
                        warn!("hotkey listener event channel closed");
                        break;
                    }
                },

                signal = signals.recv() => match signal {
                    LifecycleSignal::Reload => {
                        // Failures are logged and the previous bindings stay active
                        let _ = self.reload().await;
                    }
                    LifecycleSignal::Terminate => {
                        info!("shutdown signal received");
                        break;
                    }
                },

                _ = self.cancel.cancelled() => {
                    info!("daemon cancelled");
                    break;
                }
            }
        }

        info!(running = self.executor.running_count().await, "shutting down...");

        self.cancel.cancel();
        listener.stop().await;

        if let Err(e) = self.executor.shutdown().await {
            error!(%e, "failed to terminate running actions");
        }

        info!("hotkeyd stopped");
        Ok(())
    }

    /// Look up the pressed keys and start the matching action on its own task
    async fn dispatch(&self, pressed: &[u16]) -> Option<JoinHandle<()>> {
        if pressed.is_empty() {
            return None;
        }

        let binding = self.registry.find_match(pressed).await?;
        info!(name = %binding.name, combo = %binding.combo, "keybinding triggered");
        if self.executor.is_running(&binding.name).await {
            debug!(name = %binding.name, "previous run still active, starting another");
        }

        let executor = self.executor.clone();
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = executor.execute(&cancel, &binding).await {
                error!(%e, "failed to run action");
            }
        }))
    }

    /// Re-read the configuration file and swap in the new bindings.
    ///
    /// On failure the current bindings stay active.
    pub async fn reload(&self) -> Result<usize, ConfigError> {
        info!(path = ?self.settings.config_path, "reloading configuration");

        match config::load_keybindings(&self.settings.config_path) {
            Ok(bindings) => {
                let count = bindings.len();
                self.registry.update(bindings).await;
                info!(count, "configuration reloaded");
                Ok(count)
            }
            Err(e) => {
                let active = self.registry.len().await;
                error!(%e, active, "reload failed, keeping previous keybindings");
                Err(e)
            }
        }
    }
}

/// Discard notifications queued behind the one just received, so a burst
/// of presses leads to a single re-check
fn drain_pending(events: &mut mpsc::Receiver<()>) {
    while events.try_recv().is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use crate::hotkey::KeyCombo;

    const CONFIG: &str = r#"
        [[keybindings]]
        name = "term"
        keys = "ctrl+alt+t"
        run = "true"
    "#;

    fn codes(keys: &str) -> Vec<u16> {
        let combo = KeyCombo::parse(keys).unwrap();
        let mut codes = combo.modifiers().to_vec();
        codes.push(combo.key());
        codes
    }

    fn daemon_with(dir: &Path, text: &str) -> Daemon {
        let path = dir.join("config.toml");
        std::fs::write(&path, text).unwrap();
        let settings = Settings::new(path, Some(dir.to_path_buf()), Some(dir.join("hotkeyd.pid")));
        Daemon::load(settings).unwrap()
    }

    #[tokio::test]
    async fn test_press_sequence_triggers_binding() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon_with(dir.path(), CONFIG);

        let found = daemon.registry.find_match(&codes("ctrl+alt+t")).await.unwrap();
        assert_eq!(found.name, "term");

        let handle = daemon.dispatch(&codes("ctrl+alt+t")).await.unwrap();
        handle.await.unwrap();

        for _ in 0..250 {
            if !daemon.executor.is_running("term").await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("term still running");
    }

    #[tokio::test]
    async fn test_released_modifier_does_not_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon_with(dir.path(), CONFIG);

        // ctrl released before t was pressed
        let pressed = codes("alt+t");
        assert!(daemon.dispatch(&pressed).await.is_none());
        assert!(daemon.dispatch(&[]).await.is_none());
    }

    #[tokio::test]
    async fn test_burst_of_presses_dispatches_once() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon_with(dir.path(), CONFIG);

        // ctrl, alt and t all landed before the loop woke up
        let (tx, mut events) = mpsc::channel(100);
        for _ in 0..3 {
            tx.try_send(()).unwrap();
        }

        let pressed = codes("ctrl+alt+t");
        let mut dispatched = 0;
        while events.try_recv().is_ok() {
            drain_pending(&mut events);
            if let Some(handle) = daemon.dispatch(&pressed).await {
                handle.await.unwrap();
                dispatched += 1;
            }
        }

        assert_eq!(dispatched, 1);
    }

    #[tokio::test]
    async fn test_action_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon_with(
            dir.path(),
            r#"
            [[keybindings]]
            name = "missing"
            keys = "ctrl+alt+m"
            file = "/nonexistent/script.sh"
            "#,
        );

        let handle = daemon.dispatch(&codes("ctrl+alt+m")).await.unwrap();
        handle.await.unwrap();
        assert!(!daemon.executor.is_running("missing").await);
    }

    #[tokio::test]
    async fn test_reload_swaps_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon_with(dir.path(), CONFIG);

        std::fs::write(
            dir.path().join("config.toml"),
            r#"
            [[keybindings]]
            name = "browser"
            keys = "super+b"
            run = "true"

            [[keybindings]]
            name = "files"
            keys = "super+e"
            run = "true"
            "#,
        )
        .unwrap();

        assert_eq!(daemon.reload().await.unwrap(), 2);
        assert!(daemon.registry.find_match(&codes("ctrl+alt+t")).await.is_none());
        assert_eq!(
            daemon.registry.find_match(&codes("super+b")).await.unwrap().name,
            "browser"
        );
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_previous_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon_with(dir.path(), CONFIG);

        std::fs::write(
            dir.path().join("config.toml"),
            r#"
            [[keybindings]]
            name = "broken"
            keys = "ctrl+alt+nope"
            run = "true"
            "#,
        )
        .unwrap();

        tokio_test::assert_err!(daemon.reload().await);
        assert_eq!(daemon.registry.len().await, 1);
        assert_eq!(
            daemon.registry.find_match(&codes("ctrl+alt+t")).await.unwrap().name,
            "term"
        );
    }

    #[tokio::test]
    async fn test_run_fails_without_keyboards() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon_with(dir.path(), CONFIG);

        let err = daemon.run().await.unwrap_err();
        assert!(err.to_string().contains("hotkey listener"));
    }
}
