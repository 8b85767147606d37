//! Start, stop and restart of a single service.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::control::traits::Command;
use crate::control::types::{CommandParams, ExecutionContext};
use crate::error::ShellError;
use crate::services::{ServiceOp, Supervisor};

/// Routes `service.start`, `service.stop` or `service.restart` to the supervisor.
pub struct ServiceLifecycleCommand {
    supervisor: Arc<Supervisor>,
    op: ServiceOp,
}

impl ServiceLifecycleCommand {
    pub fn new(supervisor: Arc<Supervisor>, op: ServiceOp) -> Self {
        Self { supervisor, op }
    }

    fn action(&self) -> &'static str {
        match self.op {
            ServiceOp::Start => "start",
            ServiceOp::Stop => "stop",
            ServiceOp::Restart => "restart",
        }
    }
}

#[async_trait]
impl Command for ServiceLifecycleCommand {
    fn name(&self) -> &'static str {
        match self.op {
            ServiceOp::Start => "service.start",
            ServiceOp::Stop => "service.stop",
            ServiceOp::Restart => "service.restart",
        }
    }

    fn validate(&self, params: &CommandParams) -> Result<(), ShellError> {
        params.require_string("service")
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<serde_json::Value, ShellError> {
        let service = params.get_string("service")?;

        match self.supervisor.dispatch(self.op, &service).await {
            Ok(()) => {
                info!(
                    request_id = %ctx.request_id,
                    service = %service,
                    action = self.action(),
                    "Service request completed"
                );
                Ok(serde_json::json!({
                    "service": service,
                    "action": self.action(),
                }))
            }
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    service = %service,
                    action = self.action(),
                    error = %e,
                    "Service request failed"
                );
                Err(e)
            }
        }
    }
}
