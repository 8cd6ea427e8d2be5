//! hotkeyd: Background daemon that runs commands on global key combinations
//!
//! This daemon reads keyboard events straight from the Linux input devices
//! and provides:
//! - Global hotkey detection via evdev (works under X11, Wayland and the console)
//! - Commands, inline scripts and script files as actions
//! - Configuration reload on SIGHUP without restarting
//! - Graceful shutdown of running actions on SIGTERM/SIGINT

mod app;
mod config;
mod executor;
mod hotkey;
mod lifecycle;
mod registry;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::sys::signal::Signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::Daemon;
use crate::config::Settings;
use crate::lifecycle::PidFile;

#[derive(Parser, Debug)]
#[command(name = "hotkeyd")]
#[command(version)]
#[command(about = "Hotkey daemon for Linux input devices", long_about = None)]
struct Cli {
    /// Reads the config from a custom path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Runs hotkeyd in the background
    #[arg(short, long)]
    background: bool,

    /// Gracefully kills the running instance
    #[arg(short, long)]
    kill: bool,

    /// Reloads the configuration of the running instance
    #[arg(short, long)]
    reload: bool,

    /// Directory containing the input device nodes
    #[arg(long, value_name = "DIR")]
    input_dir: Option<PathBuf>,

    /// PID file used to find the running instance
    #[arg(long, value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter))
        )
        .init();

    let settings = Settings::new(cli.config, cli.input_dir, cli.pid_file);
    let pid_file = PidFile::new(&settings.pid_file);

    if cli.kill {
        let pid = pid_file
            .signal(Signal::SIGTERM)
            .context("error killing daemon")?;
        println!("Sent SIGTERM to hotkeyd daemon (PID {pid}).");
        return Ok(());
    }

    if cli.reload {
        let pid = pid_file
            .signal(Signal::SIGHUP)
            .context("error reloading daemon")?;
        println!("Sent SIGHUP to hotkeyd daemon (PID {pid}).");
        return Ok(());
    }

    if !settings.config_path.exists() {
        bail!(
            "config file not found at {} (use -c/--config to specify a valid path)",
            settings.config_path.display()
        );
    }

    if cli.background {
        let pid = lifecycle::spawn_background(std::env::args_os().skip(1))?;
        println!("hotkeyd started in background (PID: {pid})");
        return Ok(());
    }

    if pid_file.is_running() {
        bail!("hotkeyd is already running");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "hotkeyd starting"
    );

    if let Err(e) = pid_file.write() {
        warn!(%e, path = ?pid_file.path(), "could not write pid file");
    }

    let result = match Daemon::load(settings) {
        Ok(daemon) => daemon.run().await,
        Err(e) => Err(e).context("config error"),
    };

    pid_file.remove();
    result
}
