//! PID file used to detect and signal a running instance

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Errors that can occur while working with the PID file
#[derive(Debug, thiserror::Error)]
pub enum PidError {
    #[error("daemon not running (no pid file at {0})")]
    NotRunning(PathBuf),

    #[error("invalid pid file {0}")]
    Invalid(PathBuf),

    #[error("failed to access pid file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: Errno,
    },
}

/// PID file of the running daemon
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the current process ID
    pub fn write(&self) -> Result<(), PidError> {
        std::fs::write(&self.path, std::process::id().to_string()).map_err(|source| PidError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Remove the PID file, ignoring a file that is already gone
    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "pid file removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, ?e, "failed to remove pid file"),
        }
    }

    /// Read the recorded process ID
    pub fn read(&self) -> Result<i32, PidError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                PidError::NotRunning(self.path.clone())
            } else {
                PidError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        text.trim()
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| PidError::Invalid(self.path.clone()))
    }

    /// Check whether the recorded process is alive.
    ///
    /// A PID file pointing at a dead process is removed.
    pub fn is_running(&self) -> bool {
        let Ok(pid) = self.read() else {
            return false;
        };

        match kill(Pid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => {
                debug!(pid, "removing stale pid file");
                self.remove();
                false
            }
        }
    }

    /// Send a signal to the recorded process, returning its PID
    pub fn signal(&self, signal: Signal) -> Result<i32, PidError> {
        let pid = self.read()?;
        kill(Pid::from_raw(pid), signal).map_err(|source| PidError::Signal { pid, source })?;
        Ok(pid)
    }
}
