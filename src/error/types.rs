//! Error types for the shell supervisor.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for the supervisor.
#[derive(Error, Debug)]
pub enum ShellError {
    /// Configuration-related errors.
    #[error("Configuration error: {kind}")]
    Config { kind: ConfigErrorKind },

    /// A lifecycle operation on a single service failed.
    #[error("Service '{name}': {kind}")]
    Job { name: String, kind: JobErrorKind },

    /// A control request named a service absent from the current configuration.
    #[error("Service '{name}' is not configured")]
    ServiceNotConfigured { name: String },

    /// Several jobs failed to stop during a teardown.
    #[error("Teardown failed for {} service(s): {}", failures.len(), join_errors(failures))]
    Teardown { failures: Vec<ShellError> },

    /// Socket-related errors.
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Peer authentication errors.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// Control-plane errors.
    #[error("Control error: {kind}")]
    Control { kind: ControlErrorKind },

    /// Protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration error kinds.
#[derive(Error, Debug)]
pub enum ConfigErrorKind {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{message}")]
    Invalid { message: String },
}

/// Errors returned by a single service's lifecycle operations.
#[derive(Error, Debug)]
pub enum JobErrorKind {
    #[error("no executable configured")]
    NoExecutable,

    #[error("process is already running")]
    AlreadyRunning,

    #[error("process is not running")]
    NotRunning,

    #[error("failed to spawn process: {message}")]
    Spawn { message: String },

    #[error("stop failed: {causes}")]
    Stop { causes: StopCauses },

    #[error("job is no longer accepting commands")]
    Unavailable,
}

/// One reason a stop attempt did not cleanly confirm process death.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    #[error("failed to signal process: {message}")]
    Signal { message: String },

    #[error("failed to wait for process: {message}")]
    Wait { message: String },

    #[error("process did not exit within {}ms", after.as_millis())]
    Timeout { after: Duration },
}

/// Every failure observed by one stop attempt, in the order they happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopCauses(pub Vec<StopCause>);

impl StopCauses {
    pub fn push(&mut self, cause: StopCause) {
        self.0.push(cause);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StopCause> {
        self.0.iter()
    }

    /// Whether the deadline elapsed before the exit was confirmed.
    pub fn has_timeout(&self) -> bool {
        self.0.iter().any(|c| matches!(c, StopCause::Timeout { .. }))
    }

    /// Whether delivering the stop signal itself failed.
    pub fn has_signal_error(&self) -> bool {
        self.0.iter().any(|c| matches!(c, StopCause::Signal { .. }))
    }
}

impl fmt::Display for StopCauses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cause) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", cause)?;
        }
        Ok(())
    }
}

/// Authentication error kinds.
#[derive(Error, Debug)]
pub enum AuthErrorKind {
    #[error("Unauthorized peer: UID {uid} not in allowed list")]
    UnauthorizedPeer { uid: u32 },
}

/// Control-plane error kinds.
#[derive(Error, Debug)]
pub enum ControlErrorKind {
    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    #[error("Missing required parameter: {param}")]
    MissingParameter { param: String },

    #[error("No configuration found for service '{name}'")]
    NotFound { name: String },

    #[error("Shell run loop is not accepting signals")]
    ShellUnavailable,
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,
}

impl ShellError {
    /// Shorthand for a job error on `name`.
    pub fn job(name: impl Into<String>, kind: JobErrorKind) -> Self {
        ShellError::Job {
            name: name.into(),
            kind,
        }
    }

    /// Stable code reported to control-plane clients.
    pub fn code(&self) -> &'static str {
        match self {
            ShellError::Config { .. } => "CONFIG_ERROR",
            ShellError::Job { kind, .. } => match kind {
                JobErrorKind::NoExecutable => "NO_EXECUTABLE",
                JobErrorKind::AlreadyRunning => "ALREADY_RUNNING",
                JobErrorKind::NotRunning => "NOT_RUNNING",
                JobErrorKind::Spawn { .. } => "SPAWN_FAILURE",
                JobErrorKind::Stop { causes } if causes.has_timeout() => "STOP_TIMEOUT",
                JobErrorKind::Stop { .. } => "STOP_FAILED",
                JobErrorKind::Unavailable => "INTERNAL_ERROR",
            },
            ShellError::ServiceNotConfigured { .. } => "SERVICE_NOT_CONFIGURED",
            ShellError::Teardown { .. } => "TEARDOWN_FAILED",
            ShellError::Auth { .. } => "AUTH_ERROR",
            ShellError::Control { kind } => match kind {
                ControlErrorKind::UnknownCommand { .. } => "UNKNOWN_COMMAND",
                ControlErrorKind::MissingParameter { .. } => "INVALID_REQUEST",
                ControlErrorKind::NotFound { .. } => "NOT_FOUND",
                ControlErrorKind::ShellUnavailable => "INTERNAL_ERROR",
            },
            ShellError::Protocol { .. } | ShellError::Serialization(_) => "INVALID_REQUEST",
            ShellError::Socket { .. } | ShellError::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// The job error kind, if this is a per-service lifecycle failure.
    pub fn job_kind(&self) -> Option<&JobErrorKind> {
        match self {
            ShellError::Job { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

fn join_errors(errors: &[ShellError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for supervisor operations.
pub type ShellResult<T> = Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_causes_keep_every_failure() {
        let mut causes = StopCauses::default();
        causes.push(StopCause::Signal {
            message: "EPERM".to_string(),
        });
        causes.push(StopCause::Timeout {
            after: Duration::from_secs(3),
        });

        assert!(causes.has_signal_error());
        assert!(causes.has_timeout());
        assert_eq!(
            causes.to_string(),
            "failed to signal process: EPERM; process did not exit within 3000ms"
        );
    }

    #[test]
    fn test_stop_code_depends_on_timeout() {
        let timed_out = ShellError::job(
            "wm",
            JobErrorKind::Stop {
                causes: StopCauses(vec![StopCause::Timeout {
                    after: Duration::from_millis(10),
                }]),
            },
        );
        assert_eq!(timed_out.code(), "STOP_TIMEOUT");

        let wait_failed = ShellError::job(
            "wm",
            JobErrorKind::Stop {
                causes: StopCauses(vec![StopCause::Wait {
                    message: "ECHILD".to_string(),
                }]),
            },
        );
        assert_eq!(wait_failed.code(), "STOP_FAILED");
    }

    #[test]
    fn test_teardown_message_lists_failures() {
        let err = ShellError::Teardown {
            failures: vec![
                ShellError::job("a", JobErrorKind::Unavailable),
                ShellError::job("b", JobErrorKind::Unavailable),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("2 service(s)"));
        assert!(message.contains("Service 'a'"));
        assert!(message.contains("Service 'b'"));
    }

    #[test]
    fn test_not_configured_code() {
        let err = ShellError::ServiceNotConfigured {
            name: "ghost".to_string(),
        };
        assert_eq!(err.code(), "SERVICE_NOT_CONFIGURED");
        assert_eq!(err.to_string(), "Service 'ghost' is not configured");
    }
}
