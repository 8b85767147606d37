//! Ping command for health checking.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::ShellError;

use super::traits::Command;
use super::types::{CommandParams, ExecutionContext};

/// Returns a pong so clients can check the supervisor is responsive.
pub struct PingCommand;

#[async_trait]
impl Command for PingCommand {
    fn name(&self) -> &'static str {
        "system.ping"
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        _params: CommandParams,
    ) -> Result<serde_json::Value, ShellError> {
        Ok(serde_json::json!({
            "pong": true,
            "timestamp": Utc::now().to_rfc3339(),
            "request_id": ctx.request_id.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::types::test_context;

    #[tokio::test]
    async fn test_ping_execute() {
        let ctx = test_context("system.ping");
        let data = PingCommand
            .execute(&ctx, CommandParams::new(serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(data["pong"], true);
        assert!(data["timestamp"].is_string());
        assert_eq!(data["request_id"], ctx.request_id.to_string());
    }
}
