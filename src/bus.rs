//! In-process publish/subscribe for child process output.
//!
//! Each running service's stdout and stderr are published as raw byte
//! chunks on `stdout.<name>`. Publishing is fire-and-forget: chunks are
//! dropped when nobody listens and slow subscribers lose the oldest chunks.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Topic prefix for forwarded process output.
pub const OUTPUT_TOPIC_PREFIX: &str = "stdout.";

/// One published payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Cheaply cloneable handle to the output bus.
#[derive(Debug, Clone)]
pub struct OutputBus {
    tx: broadcast::Sender<BusMessage>,
}

impl OutputBus {
    /// Create a bus keeping at most `capacity` unread messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Topic a service's output is published on.
    pub fn output_topic(service: &str) -> String {
        format!("{}{}", OUTPUT_TOPIC_PREFIX, service)
    }

    pub fn publish(&self, topic: impl Into<String>, payload: Vec<u8>) {
        // No receivers is not an error for a side channel.
        let _ = self.tx.send(BusMessage {
            topic: topic.into(),
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Copy everything read from `reader` onto `topic` until EOF.
    pub fn forward<R>(&self, topic: String, mut reader: R) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        trace!(topic = %topic, bytes = n, "Forwarding output");
                        bus.publish(topic.clone(), buf[..n].to_vec());
                    }
                    Err(e) => {
                        debug!(topic = %topic, error = %e, "Output stream closed with error");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for OutputBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_topic() {
        assert_eq!(OutputBus::output_topic("wm"), "stdout.wm");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = OutputBus::new(4);
        bus.publish("stdout.wm", b"dropped".to_vec());
    }

    #[tokio::test]
    async fn test_subscriber_receives_published() {
        let bus = OutputBus::new(4);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish("stdout.wm", b"hello".to_vec());

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "stdout.wm");
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn test_forward_copies_until_eof() {
        let bus = OutputBus::new(16);
        let mut rx = bus.subscribe();

        let reader: &'static [u8] = b"line one\nline two\n";
        bus.forward("stdout.bg".to_string(), reader).await.unwrap();

        let mut collected = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            assert_eq!(msg.topic, "stdout.bg");
            collected.extend(msg.payload);
        }
        assert_eq!(collected, b"line one\nline two\n");
    }
}
