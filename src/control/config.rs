//! Read-only configuration queries.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ControlErrorKind, ShellError};
use crate::services::Supervisor;

use super::traits::Command;
use super::types::{CommandParams, ExecutionContext};

/// `config.service`: the definition of one service in the configuration in
/// effect. Services can look up their own entry through `SHELL_SERVICE_NAME`.
pub struct ServiceConfigCommand {
    supervisor: Arc<Supervisor>,
}

impl ServiceConfigCommand {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Command for ServiceConfigCommand {
    fn name(&self) -> &'static str {
        "config.service"
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
        let definition = self
            .supervisor
            .service_config(&service)
            .await
            .ok_or(ShellError::Control {
                kind: ControlErrorKind::NotFound { name: service },
            })?;
        Ok(serde_json::to_value(definition)?)
    }
}

/// `config.full`: the whole configuration in effect.
pub struct FullConfigCommand {
    supervisor: Arc<Supervisor>,
}

impl FullConfigCommand {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Command for FullConfigCommand {
    fn name(&self) -> &'static str {
        "config.full"
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _params: CommandParams,
    ) -> Result<serde_json::Value, ShellError> {
        let configuration = self.supervisor.configuration().await;
        Ok(serde_json::to_value(configuration.as_ref())?)
    }
}
