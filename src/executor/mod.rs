//! Process executor module.
//!
//! Handles spawning service processes, signalling them and bounding waits.

mod subprocess;
mod timeout;

pub use subprocess::{signal_child, SubprocessBuilder};
pub use timeout::with_timeout;
