//! Hotkey module for global keyboard event listening
//!
//! Reads key events from Linux input devices via evdev and matches the
//! held keys against configured key combinations.

mod combo;
mod keys;
mod listener;

pub use combo::KeyCombo;
pub use listener::HotkeyListener;
