//! Session-wide commands handed to the shell run loop.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{ControlErrorKind, ShellError};
use crate::services::ShellSignal;

use super::traits::Command;
use super::types::{CommandParams, ExecutionContext};

async fn send_signal(
    shell: &mpsc::Sender<ShellSignal>,
    signal: ShellSignal,
) -> Result<(), ShellError> {
    shell.send(signal).await.map_err(|_| ShellError::Control {
        kind: ControlErrorKind::ShellUnavailable,
    })
}

/// `shell.restart`: stop all services, reload the configuration, start again.
///
/// Replies once the request is queued; the restart itself runs on the
/// shell loop.
pub struct RestartShellCommand {
    shell: mpsc::Sender<ShellSignal>,
}

impl RestartShellCommand {
    pub fn new(shell: mpsc::Sender<ShellSignal>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl Command for RestartShellCommand {
    fn name(&self) -> &'static str {
        "shell.restart"
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        _params: CommandParams,
    ) -> Result<serde_json::Value, ShellError> {
        info!(request_id = %ctx.request_id, uid = ctx.peer.uid, "Shell restart requested");
        send_signal(&self.shell, ShellSignal::Restart).await?;
        Ok(serde_json::json!({ "action": "restart" }))
    }
}

/// `shell.quit`: stop all services and end the session.
pub struct QuitShellCommand {
    shell: mpsc::Sender<ShellSignal>,
}

impl QuitShellCommand {
    pub fn new(shell: mpsc::Sender<ShellSignal>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl Command for QuitShellCommand {
    fn name(&self) -> &'static str {
        "shell.quit"
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        _params: CommandParams,
    ) -> Result<serde_json::Value, ShellError> {
        info!(request_id = %ctx.request_id, uid = ctx.peer.uid, "Shell quit requested");
        send_signal(&self.shell, ShellSignal::Quit).await?;
        Ok(serde_json::json!({ "action": "quit" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::types::test_context;

    #[tokio::test]
    async fn test_signals_are_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let params = CommandParams::new(serde_json::json!({}));

        RestartShellCommand::new(tx.clone())
            .execute(&test_context("shell.restart"), params.clone())
            .await
            .unwrap();
        QuitShellCommand::new(tx)
            .execute(&test_context("shell.quit"), params)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(ShellSignal::Restart));
        assert_eq!(rx.recv().await, Some(ShellSignal::Quit));
    }

    #[tokio::test]
    async fn test_closed_loop() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let err = QuitShellCommand::new(tx)
            .execute(
                &test_context("shell.quit"),
                CommandParams::new(serde_json::json!({})),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShellError::Control {
                kind: ControlErrorKind::ShellUnavailable
            }
        ));
    }
}
