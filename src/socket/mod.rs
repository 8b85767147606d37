//! Unix socket server module.
//!
//! Handles the control socket and per-connection request handling.

mod connection;
mod listener;

pub use connection::{handle_connection, SUBSCRIBE_COMMAND};
pub use listener::{ConnectionMetrics, SocketListener};
