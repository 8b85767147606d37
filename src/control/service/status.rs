//! Service status queries.

use std::sync::Arc;

use async_trait::async_trait;

use crate::control::traits::Command;
use crate::control::types::{CommandParams, ExecutionContext};
use crate::error::ShellError;
use crate::services::Supervisor;

/// Status of one job.
pub struct ServiceStatusCommand {
    supervisor: Arc<Supervisor>,
}

impl ServiceStatusCommand {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Command for ServiceStatusCommand {
    fn name(&self) -> &'static str {
        "service.status"
    }

    fn validate(&self, params: &CommandParams) -> Result<(), ShellError> {
        params.require_string("service")
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<serde_json::Value, ShellError> {
        let service = params.get_string("service")?;
        let status = self.supervisor.status(&service).await?;
        Ok(serde_json::to_value(status)?)
    }
}

/// Status of every job, ordered by name.
pub struct ListServicesCommand {
    supervisor: Arc<Supervisor>,
}

impl ListServicesCommand {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Command for ListServicesCommand {
    fn name(&self) -> &'static str {
        "service.list"
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _params: CommandParams,
    ) -> Result<serde_json::Value, ShellError> {
        let statuses = self.supervisor.statuses().await;
        Ok(serde_json::json!({ "services": statuses }))
    }
}
