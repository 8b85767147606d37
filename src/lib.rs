//! Shell Init Library
//!
//! Per-session supervisor for the long-running programs of a desktop shell.
//! It starts each configured service, restarts the ones that crash when
//! asked to, and exposes start/stop/restart, configuration queries and
//! child output on a Unix control socket.

pub mod auth;
pub mod bus;
pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod services;
pub mod socket;
