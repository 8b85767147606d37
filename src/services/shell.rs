//! The session's main loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::ShellResult;

use super::supervisor::Supervisor;

/// Session-wide request delivered to [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellSignal {
    /// Stop everything, reload the configuration and bring it up again.
    Restart,
    /// Stop everything and end the loop.
    Quit,
}

/// Handle `ShellSignal`s until `Quit` arrives or every sender is gone,
/// then stop all services.
///
/// The returned result is that of the final teardown.
pub async fn run(
    supervisor: Arc<Supervisor>,
    mut signals: mpsc::Receiver<ShellSignal>,
) -> ShellResult<()> {
    while let Some(signal) = signals.recv().await {
        match signal {
            ShellSignal::Restart => {
                info!("Restarting shell");
                if let Err(e) = supervisor.reload().await {
                    error!(error = %e, "Shell restart failed");
                }
            }
            ShellSignal::Quit => {
                info!("Quit requested");
                break;
            }
        }
    }

    info!("Stopping all services");
    supervisor.stop_all().await
}
