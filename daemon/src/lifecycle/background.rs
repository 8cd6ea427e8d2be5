//! Re-executing the daemon in the background

use std::ffi::{OsStr, OsString};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

const BACKGROUND_FLAGS: [&str; 2] = ["-b", "--background"];

/// Start a detached copy of the current executable without the background flag.
///
/// Returns the PID of the new process.
pub fn spawn_background<I>(args: I) -> Result<u32>
where
    I: IntoIterator<Item = OsString>,
{
    let exe = std::env::current_exe().context("failed to locate current executable")?;
    let child = Command::new(exe)
        .args(without_background_flag(args))
        .stdin(Stdio::null())
        .process_group(0)
        .spawn()
        .context("failed to start background process")?;

    Ok(child.id())
}

fn without_background_flag<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .filter(|arg| !BACKGROUND_FLAGS.iter().any(|flag| arg.as_os_str() == OsStr::new(flag)))
        .collect()
}
