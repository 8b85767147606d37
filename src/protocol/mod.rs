//! Wire protocol module.
//!
//! Defines request/response types and message framing for the control socket.
//!
//! ## Wire Format
//!
//! Messages are length-prefixed JSON:
//! ```text
//! [4 bytes: length (big-endian u32)][JSON payload]
//! ```
//!
//! A connection that sends `bus.subscribe` receives one `Response` and then
//! a stream of `BusEvent` frames until either side closes it.

mod event;
mod request;
mod response;
mod wire;

pub use event::BusEvent;
pub use request::Request;
pub use response::{ErrorResponse, Response};
pub use wire::{
    read_message, read_message_with_timeout, write_message, write_message_with_timeout,
    DEFAULT_MAX_MESSAGE_SIZE,
};
