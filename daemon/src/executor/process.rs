//! Action execution and child process tracking
//!
//! Every triggered action becomes a child process. The executor records the
//! child under its keybinding name, and a watcher task removes the record
//! once the child exits.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::TempPath;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Action, Keybinding};
use crate::lifecycle::CancelToken;

/// A failed attempt to signal one tracked process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalFailure {
    pub name: String,
    pub pid: i32,
    pub errno: Errno,
}

/// Errors that can occur while executing an action
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("no action defined for keybinding: {0}")]
    NoActionDefined(String),

    #[error("{name}: file not found: {path}")]
    FileNotFound {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name}: failed to prepare script file: {source}")]
    TempFile {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name}: failed to start process: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}: not started, daemon is shutting down")]
    Cancelled(String),

    #[error("failed to signal {} process(es): {}", .0.len(), describe_failures(.0))]
    Signal(Vec<SignalFailure>),
}

fn describe_failures(failures: &[SignalFailure]) -> String {
    let mut out = String::new();
    for (i, failure) in failures.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        let _ = write!(out, "{} (pid {}): {}", failure.name, failure.pid, failure.errno);
    }
    out
}

/// Runs keybinding actions and supervises the resulting processes
#[derive(Debug, Clone, Default)]
pub struct Executor {
    /// Live child PIDs per keybinding name
    running: Arc<Mutex<HashMap<String, Vec<i32>>>>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the action for a keybinding.
    ///
    /// Returns as soon as the process is spawned; a background task waits
    /// for it to exit.
    pub async fn execute(
        &self,
        cancel: &CancelToken,
        binding: &Keybinding,
    ) -> Result<(), ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled(binding.name.clone()));
        }

        match &binding.action {
            Action::Run(command) if !command.trim().is_empty() => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                self.spawn(&binding.name, cmd, None).await
            }
            Action::Script { interpreter, body }
                if !interpreter.trim().is_empty() && !body.trim().is_empty() =>
            {
                self.execute_script(&binding.name, interpreter, body).await
            }
            Action::File(path) if !path.trim().is_empty() => {
                self.execute_file(&binding.name, path).await
            }
            _ => Err(ExecutorError::NoActionDefined(binding.name.clone())),
        }
    }

    /// Write an inline script to a temp file and run it with its interpreter
    async fn execute_script(
        &self,
        name: &str,
        interpreter: &str,
        body: &str,
    ) -> Result<(), ExecutorError> {
        let temp_error = |source| ExecutorError::TempFile {
            name: name.to_string(),
            source,
        };

        let mut file = tempfile::Builder::new()
            .prefix("hotkeyd-")
            .tempfile()
            .map_err(temp_error)?;
        file.write_all(body.as_bytes()).map_err(temp_error)?;
        file.flush().map_err(temp_error)?;

        // Dropping the path on any error below removes the file
        let path = file.into_temp_path();
        std::fs::set_permissions(&*path, std::fs::Permissions::from_mode(0o700))
            .map_err(temp_error)?;

        let mut cmd = Command::new(interpreter);
        cmd.arg(&*path);
        self.spawn(name, cmd, Some(path)).await
    }

    /// Run an external script file, directly if executable, else through `sh`
    async fn execute_file(&self, name: &str, path: &str) -> Result<(), ExecutorError> {
        let path = expand_home(path);
        let metadata = std::fs::metadata(&path).map_err(|source| ExecutorError::FileNotFound {
            name: name.to_string(),
            path: path.clone(),
            source,
        })?;

        let cmd = if metadata.permissions().mode() & 0o111 != 0 {
            Command::new(&path)
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg(&path);
            cmd
        };

        self.spawn(name, cmd, None).await
    }

    /// Spawn, track, and watch a child process
    async fn spawn(
        &self,
        name: &str,
        mut cmd: Command,
        script: Option<TempPath>,
    ) -> Result<(), ExecutorError> {
        cmd.stdin(Stdio::null());

        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            name: name.to_string(),
            source,
        })?;

        let pid = child.id().and_then(|id| i32::try_from(id).ok());
        if let Some(pid) = pid {
            self.track(name, pid).await;
        }
        info!(name = %name, ?pid, "action started");

        let executor = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(name = %name, ?pid, "action finished"),
                Ok(status) => warn!(name = %name, ?pid, %status, "action exited with failure"),
                Err(e) => warn!(name = %name, ?pid, ?e, "failed to wait for action"),
            }

            // The PID may be reused once reaped
            if let Some(pid) = pid {
                executor.untrack(&name, pid).await;
            }

            if let Some(script) = script {
                if let Err(e) = script.close() {
                    warn!(name = %name, ?e, "failed to remove script file");
                }
            }
        });

        Ok(())
    }

    async fn track(&self, name: &str, pid: i32) {
        let mut running = self.running.lock().await;
        running.entry(name.to_string()).or_default().push(pid);
    }

    async fn untrack(&self, name: &str, pid: i32) {
        let mut running = self.running.lock().await;
        if let Some(pids) = running.get_mut(name) {
            pids.retain(|tracked| *tracked != pid);
            if pids.is_empty() {
                running.remove(name);
            }
        }
    }

    /// Check if any process started by this keybinding is still running
    pub async fn is_running(&self, name: &str) -> bool {
        self.running.lock().await.contains_key(name)
    }

    /// Number of tracked processes across all keybindings
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.values().map(Vec::len).sum()
    }

    /// Send SIGTERM to every tracked process.
    ///
    /// Does not wait for the processes to exit. Every process is signalled
    /// even if some fail; all failures are reported together.
    pub async fn shutdown(&self) -> Result<(), ExecutorError> {
        let running = self.running.lock().await;
        if running.is_empty() {
            return Ok(());
        }

        info!(count = running.values().map(Vec::len).sum::<usize>(), "terminating running actions");

        let mut failures = Vec::new();
        for (name, pids) in running.iter() {
            for pid in pids {
                if let Err(errno) = kill(Pid::from_raw(*pid), Signal::SIGTERM) {
                    failures.push(SignalFailure {
                        name: name.clone(),
                        pid: *pid,
                        errno,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::Signal(failures))
        }
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::hotkey::KeyCombo;

    fn binding(name: &str, action: Action) -> Keybinding {
        Keybinding {
            name: name.to_string(),
            combo: KeyCombo::parse("ctrl+alt+t").unwrap(),
            action,
        }
    }

    async fn wait_until_stopped(executor: &Executor, name: &str) {
        for _ in 0..250 {
            if !executor.is_running(name).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{name} still running");
    }

    #[tokio::test]
    async fn test_run_tracks_until_exit() {
        let executor = Executor::new();
        let cancel = CancelToken::new();
        let term = binding("term", Action::Run("sleep 0.3".into()));

        executor.execute(&cancel, &term).await.unwrap();
        assert!(executor.is_running("term").await);

        wait_until_stopped(&executor, "term").await;
        assert_eq!(executor.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_true() {
        let executor = Executor::new();
        let term = binding("term", Action::Run("true".into()));

        tokio_test::assert_ok!(executor.execute(&CancelToken::new(), &term).await);
        wait_until_stopped(&executor, "term").await;
    }

    #[tokio::test]
    async fn test_failed_command_is_untracked() {
        let executor = Executor::new();
        let fail = binding("fail", Action::Run("exit 7".into()));

        executor.execute(&CancelToken::new(), &fail).await.unwrap();
        wait_until_stopped(&executor, "fail").await;
    }

    #[tokio::test]
    async fn test_script_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("script-path");
        let body = format!("echo \"$0\" > '{}'\nexit 3", out.display());

        let executor = Executor::new();
        let script = binding(
            "script",
            Action::Script {
                interpreter: "sh".into(),
                body,
            },
        );

        executor.execute(&CancelToken::new(), &script).await.unwrap();
        wait_until_stopped(&executor, "script").await;

        let script_path = std::fs::read_to_string(&out).unwrap();
        let script_path = std::path::Path::new(script_path.trim());
        assert!(script_path.to_string_lossy().contains("hotkeyd-"));

        // Removed by the watcher right after the process is untracked
        for _ in 0..250 {
            if !script_path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("script file {} not removed", script_path.display());
    }

    #[tokio::test]
    async fn test_exited_child_is_not_signalled() {
        let executor = Executor::new();
        let cancel = CancelToken::new();
        let term = binding("term", Action::Run("true".into()));

        executor.execute(&cancel, &term).await.unwrap();
        executor.execute(&cancel, &term).await.unwrap();
        wait_until_stopped(&executor, "term").await;

        assert_eq!(executor.running_count().await, 0);
        tokio_test::assert_ok!(executor.shutdown().await);
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_to_spawn() {
        let executor = Executor::new();
        let script = binding(
            "script",
            Action::Script {
                interpreter: "/nonexistent/interpreter".into(),
                body: "echo hi".into(),
            },
        );

        let result = executor.execute(&CancelToken::new(), &script).await;
        assert!(matches!(result, Err(ExecutorError::Spawn { .. })));
        assert!(!executor.is_running("script").await);
    }

    #[tokio::test]
    async fn test_file_not_found() {
        let executor = Executor::new();
        let file = binding("file", Action::File("/nonexistent/script.sh".into()));

        let result = executor.execute(&CancelToken::new(), &file).await;
        assert!(matches!(result, Err(ExecutorError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_non_executable_file_runs_through_sh() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("ran");
        let script = dir.path().join("script.sh");
        std::fs::write(&script, format!("touch '{}'\n", out.display())).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();

        let executor = Executor::new();
        let file = binding("file", Action::File(script.display().to_string()));

        executor.execute(&CancelToken::new(), &file).await.unwrap();
        wait_until_stopped(&executor, "file").await;
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_empty_action() {
        let executor = Executor::new();
        let empty = binding("empty", Action::Run("  ".into()));

        let result = executor.execute(&CancelToken::new(), &empty).await;
        assert!(matches!(result, Err(ExecutorError::NoActionDefined(name)) if name == "empty"));
    }

    #[tokio::test]
    async fn test_cancelled_token_refuses_to_start() {
        let executor = Executor::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = executor
            .execute(&cancel, &binding("term", Action::Run("true".into())))
            .await;
        assert!(matches!(result, Err(ExecutorError::Cancelled(_))));
        assert_eq!(executor.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_retrigger_tracks_every_process() {
        let executor = Executor::new();
        let cancel = CancelToken::new();
        let sleeper = binding("sleeper", Action::Run("sleep 30".into()));

        executor.execute(&cancel, &sleeper).await.unwrap();
        executor.execute(&cancel, &sleeper).await.unwrap();
        assert_eq!(executor.running_count().await, 2);

        executor.shutdown().await.unwrap();
        wait_until_stopped(&executor, "sleeper").await;
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_running() {
        tokio_test::assert_ok!(Executor::new().shutdown().await);
    }

    #[tokio::test]
    async fn test_shutdown_reports_every_failure() {
        let executor = Executor::new();
        // PIDs above the kernel's pid_max never exist
        executor.track("ghost-a", i32::MAX).await;
        executor.track("ghost-b", i32::MAX - 1).await;
        executor.track("ghost-b", i32::MAX - 2).await;

        let err = executor.shutdown().await.unwrap_err();
        match err {
            ExecutorError::Signal(failures) => {
                assert_eq!(failures.len(), 3);
                assert!(failures.iter().all(|f| f.errno == Errno::ESRCH));
                assert!(failures.iter().any(|f| f.name == "ghost-a"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~/bin/x.sh"), home.join("bin/x.sh"));
        assert_eq!(expand_home("/usr/bin/x"), PathBuf::from("/usr/bin/x"));
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
    }
}
