//! Command types: parameters and execution context.

use uuid::Uuid;

use crate::auth::PeerInfo;
use crate::error::{ControlErrorKind, ShellError};

/// Wrapper around command parameters with helper methods.
#[derive(Debug, Clone)]
pub struct CommandParams {
    inner: serde_json::Value,
}

impl CommandParams {
    pub fn new(value: serde_json::Value) -> Self {
        Self { inner: value }
    }

    /// Get a required string parameter.
    pub fn get_string(&self, key: &str) -> Result<String, ShellError> {
        self.get_optional_string(key)
            .ok_or_else(|| missing_parameter(key))
    }

    /// Get an optional string parameter.
    pub fn get_optional_string(&self, key: &str) -> Option<String> {
        self.inner.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    /// Require that a non-empty string parameter exists (for validation).
    pub fn require_string(&self, key: &str) -> Result<(), ShellError> {
        match self.inner.get(key).and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => Ok(()),
            _ => Err(missing_parameter(key)),
        }
    }
}

fn missing_parameter(key: &str) -> ShellError {
    ShellError::Control {
        kind: ControlErrorKind::MissingParameter {
            param: key.to_string(),
        },
    }
}

impl From<serde_json::Value> for CommandParams {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

/// Metadata about the request being executed.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: Uuid,
    pub peer: PeerInfo,
    pub command: String,
}

impl ExecutionContext {
    pub fn new(request_id: Uuid, peer: PeerInfo, command: String) -> Self {
        Self {
            request_id,
            peer,
            command,
        }
    }
}

/// Context for unit tests of individual commands.
#[cfg(test)]
pub(crate) fn test_context(command: &str) -> ExecutionContext {
    ExecutionContext::new(
        Uuid::new_v4(),
        PeerInfo {
            uid: 1000,
            gid: 1000,
            pid: 12345,
        },
        command.to_string(),
    )
}
