//! Control socket framing.
//!
//! Every frame is a big-endian `u32` byte count followed by that many bytes
//! of JSON. Requests, responses and bus events all travel this way.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ProtocolErrorKind, ShellError};

/// Frame payload limit used when settings do not override it.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;

const HEADER_LEN: usize = 4;

fn closed_on_eof(e: io::Error) -> ShellError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ShellError::Protocol {
            kind: ProtocolErrorKind::ConnectionClosed,
        }
    } else {
        ShellError::Io(e)
    }
}

/// Read one frame and return its payload.
///
/// A peer that hangs up before or inside a frame yields `ConnectionClosed`.
/// The payload is not read when the header announces more than `max_size`.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, ShellError>
where
    R: AsyncReadExt + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(closed_on_eof)?;

    let size = u32::from_be_bytes(header) as usize;
    if size > max_size {
        return Err(ShellError::Protocol {
            kind: ProtocolErrorKind::MessageTooLarge {
                size,
                max: max_size,
            },
        });
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await.map_err(closed_on_eof)?;
    Ok(payload)
}

/// Write `payload` as one frame and flush.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> Result<(), ShellError>
where
    W: AsyncWriteExt + Unpin,
{
    let size = u32::try_from(payload.len()).map_err(|_| ShellError::Protocol {
        kind: ProtocolErrorKind::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        },
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn within<T>(
    limit: Duration,
    op: impl Future<Output = Result<T, ShellError>>,
) -> Result<T, ShellError> {
    tokio::time::timeout(limit, op)
        .await
        .unwrap_or(Err(ShellError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        }))
}

/// `read_message` that fails with `ConnectionTimeout` after `limit`.
pub async fn read_message_with_timeout<R>(
    reader: &mut R,
    max_size: usize,
    limit: Duration,
) -> Result<Vec<u8>, ShellError>
where
    R: AsyncReadExt + Unpin,
{
    within(limit, read_message(reader, max_size)).await
}

/// `write_message` that fails with `ConnectionTimeout` after `limit`.
pub async fn write_message_with_timeout<W>(
    writer: &mut W,
    payload: &[u8],
    limit: Duration,
) -> Result<(), ShellError>
where
    W: AsyncWriteExt + Unpin,
{
    within(limit, write_message(writer, payload)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, br#"{"command":"system.ping"}"#)
            .await
            .unwrap();

        assert_eq!(&buffer[0..4], &[0, 0, 0, 25]);

        let mut cursor = Cursor::new(buffer);
        let payload = read_message(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        let request: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(request["command"], "system.ping");
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let mut data = 2_000_000u32.to_be_bytes().to_vec();
        data.extend_from_slice(&[0u8; 16]);
        let mut cursor = Cursor::new(data);

        let result = read_message(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).await;
        assert!(matches!(
            result,
            Err(ShellError::Protocol {
                kind: ProtocolErrorKind::MessageTooLarge { size: 2_000_000, .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let mut cursor = Cursor::new(Vec::new());
        let result = read_message(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).await;
        assert!(matches!(
            result,
            Err(ShellError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_connection_closed() {
        let mut data = 10u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"{\"com");
        let mut cursor = Cursor::new(data);

        let result = read_message(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).await;
        assert!(matches!(
            result,
            Err(ShellError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed
            })
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (mut client, _server) = tokio::io::duplex(64);
        let result = read_message_with_timeout(
            &mut client,
            DEFAULT_MAX_MESSAGE_SIZE,
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(
            result,
            Err(ShellError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout
            })
        ));
    }
}
