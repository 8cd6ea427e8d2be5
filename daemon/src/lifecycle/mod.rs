//! Process lifecycle: signals, cancellation, PID file and backgrounding

mod background;
mod cancel;
mod pid;
mod shutdown;

pub use background::spawn_background;
pub use cancel::CancelToken;
pub use pid::PidFile;
pub use shutdown::{LifecycleSignal, SignalListener};
