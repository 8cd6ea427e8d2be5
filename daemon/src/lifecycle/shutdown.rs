//! Signal handling for graceful shutdown and configuration reload

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// What the daemon was asked to do by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// SIGHUP: re-read the configuration
    Reload,
    /// SIGTERM or SIGINT: shut down
    Terminate,
}

/// Handles shutdown signals (SIGTERM, SIGINT) and reload requests (SIGHUP)
pub struct SignalListener {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl SignalListener {
    /// Register the signal handlers
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal
    pub async fn recv(&mut self) -> LifecycleSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                debug!("received SIGTERM");
                LifecycleSignal::Terminate
            }
            _ = self.sigint.recv() => {
                debug!("received SIGINT");
                LifecycleSignal::Terminate
            }
            _ = self.sighup.recv() => {
                debug!("received SIGHUP");
                LifecycleSignal::Reload
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::getpid;

    #[tokio::test]
    async fn test_sighup_requests_reload() {
        let mut signals = SignalListener::new().unwrap();
        kill(getpid(), NixSignal::SIGHUP).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .unwrap();
        assert_eq!(received, LifecycleSignal::Reload);
    }
}
