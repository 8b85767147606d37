//! Control-plane commands.
//!
//! Every request arriving on the control socket names one command. Commands
//! hold the handles they act on (the supervisor, the shell loop sender) and
//! are looked up by name in the `CommandRegistry`.
//!
//! ## Adding a New Command
//!
//! 1. Implement the `Command` trait in the matching submodule
//! 2. Register the command in `CommandRegistry::new()`

mod config;
mod registry;
mod service;
mod shell;
mod system;
mod traits;
mod types;

pub use config::{FullConfigCommand, ServiceConfigCommand};
pub use registry::CommandRegistry;
pub use service::{ListServicesCommand, ServiceLifecycleCommand, ServiceStatusCommand};
pub use shell::{QuitShellCommand, RestartShellCommand};
pub use system::PingCommand;
pub use traits::Command;
pub use types::{CommandParams, ExecutionContext};
