//! Command registry for dispatching requests to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{ControlErrorKind, ShellError};
use crate::services::{ServiceOp, ShellSignal, Supervisor};

use super::config::{FullConfigCommand, ServiceConfigCommand};
use super::service::{ListServicesCommand, ServiceLifecycleCommand, ServiceStatusCommand};
use super::shell::{QuitShellCommand, RestartShellCommand};
use super::system::PingCommand;
use super::traits::Command;
use super::types::{CommandParams, ExecutionContext};

/// Registry of all available commands.
#[derive(Clone)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
}

impl CommandRegistry {
    /// Create a registry with every built-in command bound to `supervisor`
    /// and the shell loop reached through `shell`.
    pub fn new(supervisor: Arc<Supervisor>, shell: mpsc::Sender<ShellSignal>) -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };

        registry.register(Arc::new(PingCommand));

        for op in [ServiceOp::Start, ServiceOp::Stop, ServiceOp::Restart] {
            registry.register(Arc::new(ServiceLifecycleCommand::new(
                Arc::clone(&supervisor),
                op,
            )));
        }
        registry.register(Arc::new(ServiceStatusCommand::new(Arc::clone(&supervisor))));
        registry.register(Arc::new(ListServicesCommand::new(Arc::clone(&supervisor))));

        registry.register(Arc::new(RestartShellCommand::new(shell.clone())));
        registry.register(Arc::new(QuitShellCommand::new(shell)));

        registry.register(Arc::new(ServiceConfigCommand::new(Arc::clone(&supervisor))));
        registry.register(Arc::new(FullConfigCommand::new(supervisor)));

        info!(
            count = registry.commands.len(),
            "Command registry initialized"
        );

        registry
    }

    fn register(&mut self, command: Arc<dyn Command>) {
        let name = command.name();
        debug!(command = name, "Registering command");
        self.commands.insert(name, command);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    /// Validate and execute `command_name`.
    pub async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        command_name: &str,
        params: CommandParams,
    ) -> Result<serde_json::Value, ShellError> {
        let command = self
            .get(command_name)
            .ok_or_else(|| ShellError::Control {
                kind: ControlErrorKind::UnknownCommand {
                    name: command_name.to_string(),
                },
            })?;

        command.validate(&params)?;
        command.execute(ctx, params).await
    }

    /// List all registered command names, sorted.
    pub fn list_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
