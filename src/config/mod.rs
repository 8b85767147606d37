//! Configuration module for the shell supervisor.
//!
//! One TOML file carries both the daemon settings and the service map.
//! Settings are read once at startup; the service map is reloadable.

mod services;
mod settings;

pub use services::*;
pub use settings::*;
