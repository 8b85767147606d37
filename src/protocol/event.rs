//! Streamed bus events.

use serde::{Deserialize, Serialize};

use crate::bus::BusMessage;

/// One bus message as sent to a subscribed client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    pub topic: String,
    /// Payload decoded as UTF-8, invalid sequences replaced.
    pub data: String,
}

impl From<BusMessage> for BusEvent {
    fn from(msg: BusMessage) -> Self {
        Self {
            data: String::from_utf8_lossy(&msg.payload).into_owned(),
            topic: msg.topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bus_message_lossy() {
        let event = BusEvent::from(BusMessage {
            topic: "stdout.wm".to_string(),
            payload: vec![b'o', b'k', 0xff],
        });
        assert_eq!(event.topic, "stdout.wm");
        assert_eq!(event.data, "ok\u{fffd}");
    }
}
