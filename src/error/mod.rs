//! Error types for the shell supervisor.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
