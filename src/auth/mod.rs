//! Authentication module.
//!
//! Only processes running as an allowed UID may use the control socket.

mod peer_creds;

pub use peer_creds::{verify_peer, PeerInfo};
