//! Executor module for running keybinding actions
//!
//! Spawns commands, inline scripts and script files as child processes and
//! keeps track of them until they exit.

mod process;

pub use process::Executor;
