//! Per-connection handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{verify_peer, PeerInfo};
use crate::bus::{OutputBus, OUTPUT_TOPIC_PREFIX};
use crate::config::Settings;
use crate::control::{CommandParams, CommandRegistry, ExecutionContext};
use crate::error::{ProtocolErrorKind, ShellError};
use crate::protocol::{
    read_message_with_timeout, write_message_with_timeout, BusEvent, Request, Response,
};

/// Switches the connection from request/reply to event streaming.
pub const SUBSCRIBE_COMMAND: &str = "bus.subscribe";

/// What the connection does after a request has been answered.
enum Next {
    Continue,
    Subscribe { prefix: String },
}

/// Handle a single client connection.
pub async fn handle_connection(
    stream: UnixStream,
    settings: Arc<Settings>,
    registry: Arc<CommandRegistry>,
    bus: OutputBus,
) -> Result<(), ShellError> {
    let peer = verify_peer(&stream, &settings.security.effective_peer_uids())?;
    debug!(uid = peer.uid, gid = peer.gid, pid = peer.pid, "Peer authenticated");

    let (mut reader, mut writer) = stream.into_split();
    let socket_timeout = Duration::from_secs(settings.limits.socket_timeout_seconds);

    loop {
        let result = process_request(
            &mut reader,
            &mut writer,
            &settings,
            &registry,
            &peer,
        )
        .await;

        match result {
            Ok(Next::Continue) => continue,
            Ok(Next::Subscribe { prefix }) => {
                return stream_events(&mut reader, &mut writer, &bus, &prefix, socket_timeout)
                    .await;
            }
            Err(ShellError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            }) => {
                debug!(uid = peer.uid, "Client disconnected");
                return Ok(());
            }
            Err(ShellError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout,
            }) => {
                debug!(uid = peer.uid, "Connection timed out");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read one request, execute it and write the response.
async fn process_request<R, W>(
    reader: &mut R,
    writer: &mut W,
    settings: &Settings,
    registry: &CommandRegistry,
    peer: &PeerInfo,
) -> Result<Next, ShellError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let socket_timeout = Duration::from_secs(settings.limits.socket_timeout_seconds);
    let request_id = Uuid::new_v4();

    let msg = match read_message_with_timeout(reader, settings.limits.max_message_size, socket_timeout).await {
        Ok(msg) => msg,
        Err(e @ ShellError::Protocol {
            kind: ProtocolErrorKind::MessageTooLarge { .. },
        }) => {
            // The stream cannot be resynchronised after an oversized frame.
            warn!(uid = peer.uid, error = %e, "Rejecting oversized request");
            send(writer, &Response::from_error(request_id, &e), socket_timeout).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let request: Request = match serde_json::from_slice(&msg) {
        Ok(request) => request,
        Err(e) => {
            let err = ShellError::Protocol {
                kind: ProtocolErrorKind::InvalidMessageFormat {
                    message: format!("Invalid JSON: {}", e),
                },
            };
            warn!(request_id = %request_id, uid = peer.uid, error = %err, "Malformed request");
            send(writer, &Response::from_error(request_id, &err), socket_timeout).await?;
            return Ok(Next::Continue);
        }
    };

    debug!(
        request_id = %request_id,
        command = %request.command,
        uid = peer.uid,
        "Received request"
    );

    if request.command == SUBSCRIBE_COMMAND {
        let prefix = CommandParams::new(request.params)
            .get_optional_string("prefix")
            .unwrap_or_else(|| OUTPUT_TOPIC_PREFIX.to_string());
        info!(request_id = %request_id, uid = peer.uid, prefix = %prefix, "Client subscribed");
        let response = Response::success_with_id(
            request_id,
            serde_json::json!({ "subscribed": prefix }),
        );
        send(writer, &response, socket_timeout).await?;
        return Ok(Next::Subscribe { prefix });
    }

    let ctx = ExecutionContext::new(request_id, *peer, request.command.clone());
    let params = CommandParams::new(request.params);

    let response = match registry.dispatch(&ctx, &request.command, params).await {
        Ok(data) => {
            debug!(request_id = %request_id, command = %request.command, "Command executed");
            Response::success_with_id(request_id, data)
        }
        Err(e) => {
            debug!(
                request_id = %request_id,
                command = %request.command,
                error = %e,
                "Command failed"
            );
            Response::from_error(request_id, &e)
        }
    };

    send(writer, &response, socket_timeout).await?;
    Ok(Next::Continue)
}

async fn send<W>(writer: &mut W, response: &Response, socket_timeout: Duration) -> Result<(), ShellError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(response)?;
    write_message_with_timeout(writer, &bytes, socket_timeout).await
}

/// Forward bus messages whose topic starts with `prefix` until the client
/// goes away or the bus closes.
async fn stream_events<R, W>(
    reader: &mut R,
    writer: &mut W,
    bus: &OutputBus,
    prefix: &str,
    socket_timeout: Duration,
) -> Result<(), ShellError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut rx = bus.subscribe();
    let mut probe = [0u8; 64];

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(msg) if msg.topic.starts_with(prefix) => {
                    let bytes = serde_json::to_vec(&BusEvent::from(msg))?;
                    if let Err(e) = write_message_with_timeout(writer, &bytes, socket_timeout).await {
                        debug!(error = %e, "Subscriber write failed");
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagging, output dropped");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            // Anything sent after subscribing is ignored; EOF ends the stream.
            read = reader.read(&mut probe) => match read {
                Ok(0) | Err(_) => {
                    debug!("Subscriber disconnected");
                    return Ok(());
                }
                Ok(_) => {}
            },
        }
    }
}
