//! Command trait definition.

use async_trait::async_trait;

use crate::error::ShellError;

use super::types::{CommandParams, ExecutionContext};

/// Core trait for all control commands.
///
/// # Example
///
/// ```ignore
/// pub struct MyCommand;
///
/// #[async_trait]
/// impl Command for MyCommand {
///     fn name(&self) -> &'static str {
///         "my.command"
///     }
///
///     fn validate(&self, params: &CommandParams) -> Result<(), ShellError> {
///         params.require_string("service")
///     }
///
///     async fn execute(
///         &self,
///         ctx: &ExecutionContext,
///         params: CommandParams,
///     ) -> Result<serde_json::Value, ShellError> {
///         let service = params.get_string("service")?;
///         Ok(serde_json::json!({"service": service}))
///     }
/// }
/// ```
#[async_trait]
pub trait Command: Send + Sync {
    /// Name used in request messages to invoke this command.
    fn name(&self) -> &'static str;

    /// Check that all required parameters are present.
    ///
    /// Called before `execute()`; the default accepts anything.
    fn validate(&self, _params: &CommandParams) -> Result<(), ShellError> {
        Ok(())
    }

    /// Execute the command and return the response data.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<serde_json::Value, ShellError>;
}
