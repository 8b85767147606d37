//! Unix socket listener.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::bus::OutputBus;
use crate::config::Settings;
use crate::control::CommandRegistry;
use crate::error::{ProtocolErrorKind, ShellError};

use super::handle_connection;

/// Connection metrics for monitoring.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    pub connections_total: AtomicU64,
    pub connections_failed: AtomicU64,
    pub active_connections: AtomicUsize,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self, success: bool) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    pub fn failed_connections(&self) -> u64 {
        self.connections_failed.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Control socket server.
pub struct SocketListener {
    listener: UnixListener,
    settings: Arc<Settings>,
    registry: Arc<CommandRegistry>,
    bus: OutputBus,
    metrics: Arc<ConnectionMetrics>,
    connection_semaphore: Arc<Semaphore>,
}

impl SocketListener {
    /// Create and bind the control socket.
    pub async fn bind(
        settings: Arc<Settings>,
        registry: Arc<CommandRegistry>,
        bus: OutputBus,
    ) -> Result<Self, ShellError> {
        let socket_path = &settings.socket.path;

        // Use symlink_metadata so a symlink is refused instead of followed.
        if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
            if metadata.file_type().is_symlink() {
                return Err(ShellError::Socket {
                    message: format!(
                        "Socket path {} is a symlink, refusing to remove it",
                        socket_path.display()
                    ),
                });
            }

            std::fs::remove_file(socket_path).map_err(|e| ShellError::Socket {
                message: format!(
                    "Failed to remove existing socket file {}: {}",
                    socket_path.display(),
                    e
                ),
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ShellError::Socket {
                message: format!(
                    "Failed to create socket directory {}: {}",
                    parent.display(),
                    e
                ),
            })?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| ShellError::Socket {
            message: format!("Failed to bind to socket {}: {}", socket_path.display(), e),
        })?;

        Self::set_socket_permissions(socket_path, &settings.socket.permissions)?;

        let connection_semaphore = Arc::new(Semaphore::new(settings.limits.max_concurrent_requests));
        info!(
            path = %socket_path.display(),
            max_connections = settings.limits.max_concurrent_requests,
            "Socket listener bound"
        );

        Ok(Self {
            listener,
            settings,
            registry,
            bus,
            metrics: Arc::new(ConnectionMetrics::new()),
            connection_semaphore,
        })
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    fn set_socket_permissions(path: &Path, permissions_str: &str) -> Result<(), ShellError> {
        let mode = u32::from_str_radix(permissions_str, 8).map_err(|e| ShellError::Socket {
            message: format!("Invalid socket permissions '{}': {}", permissions_str, e),
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            ShellError::Socket {
                message: format!(
                    "Failed to set socket permissions on {}: {}",
                    path.display(),
                    e
                ),
            }
        })
    }

    /// Accept connections until `shutdown` is notified.
    ///
    /// Active connections keep running; use `wait_for_drain` to wait for them.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), ShellError> {
        info!("Socket listener running, waiting for connections...");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => self.spawn_connection(stream),
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown.notified() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::UnixStream) {
        let permit = match Arc::clone(&self.connection_semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    max = self.settings.limits.max_concurrent_requests,
                    "Connection limit reached, rejecting connection"
                );
                return;
            }
        };

        let settings = Arc::clone(&self.settings);
        let registry = Arc::clone(&self.registry);
        let bus = self.bus.clone();
        let metrics = Arc::clone(&self.metrics);

        metrics.active_connections.fetch_add(1, Ordering::Relaxed);
        debug!(active = metrics.active(), "New connection accepted");

        tokio::spawn(async move {
            let _permit = permit;
            let success = match handle_connection(stream, settings, registry, bus).await {
                Ok(()) => true,
                Err(ShellError::Protocol {
                    kind: ProtocolErrorKind::ConnectionClosed,
                }) => true,
                Err(e @ ShellError::Auth { .. }) => {
                    warn!(error = %e, "Rejected connection");
                    false
                }
                Err(e) => {
                    error!(error = %e, "Connection handler error");
                    false
                }
            };

            metrics.record_connection(success);
            metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
            debug!(active = metrics.active(), success, "Connection closed");
        });
    }

    /// Wait for active connections to finish, giving up after `limit`.
    ///
    /// Streaming subscribers never finish on their own, hence the limit.
    pub async fn wait_for_drain(&self, limit: Duration) {
        let poll_interval = Duration::from_millis(100);
        let deadline = tokio::time::Instant::now() + limit;

        while self.metrics.active() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(active = self.metrics.active(), "Connections still open, not waiting longer");
                return;
            }
            debug!(active = self.metrics.active(), "Waiting for connections to drain");
            tokio::time::sleep(poll_interval).await;
        }

        info!("All connections drained");
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.settings.socket.path) {
            debug!(error = %e, "Socket file not removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = ConnectionMetrics::new();
        metrics.record_connection(true);
        metrics.record_connection(false);
        assert_eq!(metrics.total_connections(), 2);
        assert_eq!(metrics.failed_connections(), 1);
        assert_eq!(metrics.active(), 0);
    }
}
