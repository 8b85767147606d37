//! Daemon settings for the shell supervisor.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigErrorKind, ShellError};

/// Daemon-level settings, read from the same file as the service map.
///
/// Every section is optional so a file containing only `[services.*]`
/// tables is a valid configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Control socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Path to the Unix socket file.
    #[serde(default = "default_socket_path")]
    pub path: PathBuf,
    /// Socket file permissions (e.g., "0600").
    #[serde(default = "default_socket_permissions")]
    pub permissions: String,
}

/// Peer authorization.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// UIDs allowed to issue control requests. Empty means only the
    /// UID the supervisor itself runs as.
    #[serde(default)]
    pub allowed_peer_uids: Vec<u32>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Control-plane limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum concurrent control connections.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Socket read/write timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
}

/// Process supervision policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// How long `Stop` waits for a signalled process to exit.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Number of output chunks a slow bus subscriber may lag behind.
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
}

fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("shell-init.sock"),
        _ => PathBuf::from(format!("/tmp/shell-init-{}.sock", nix::unistd::getuid())),
    }
}

fn default_socket_permissions() -> String {
    "0600".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_max_message_size() -> usize {
    1_048_576 // 1MB
}

fn default_max_concurrent() -> usize {
    32
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_stop_timeout_ms() -> u64 {
    3000
}

fn default_output_buffer() -> usize {
    1024
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: default_socket_path(),
            permissions: default_socket_permissions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_concurrent_requests: default_max_concurrent(),
            socket_timeout_seconds: default_socket_timeout(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
            output_buffer: default_output_buffer(),
        }
    }
}

impl SupervisorConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl SecurityConfig {
    /// UIDs allowed to connect, falling back to our own UID.
    pub fn effective_peer_uids(&self) -> Vec<u32> {
        if self.allowed_peer_uids.is_empty() {
            vec![nix::unistd::getuid().as_raw()]
        } else {
            self.allowed_peer_uids.clone()
        }
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ShellError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ShellError::Config {
            kind: if e.kind() == std::io::ErrorKind::NotFound {
                ConfigErrorKind::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigErrorKind::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            },
        })?;

        Self::from_toml(path, &content)
    }

    /// Parse settings from TOML text; `path` is only used for messages.
    pub fn from_toml(path: &Path, content: &str) -> Result<Self, ShellError> {
        let settings: Settings = toml::from_str(content).map_err(|e| ShellError::Config {
            kind: ConfigErrorKind::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), ShellError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log level '{}'. Valid levels: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log format '{}'. Valid formats: {:?}",
                self.logging.format, valid_formats
            )));
        }

        if self.socket.permissions.is_empty()
            || !self.socket.permissions.chars().all(|c| ('0'..='7').contains(&c))
        {
            return Err(invalid(format!(
                "Invalid socket permissions '{}'. Must be octal (e.g., '0600')",
                self.socket.permissions
            )));
        }

        if self.limits.max_concurrent_requests == 0 {
            return Err(invalid("max_concurrent_requests must be at least 1".to_string()));
        }

        if self.supervisor.output_buffer == 0 {
            return Err(invalid("output_buffer must be at least 1".to_string()));
        }

        Ok(())
    }
}

fn invalid(message: String) -> ShellError {
    ShellError::Config {
        kind: ConfigErrorKind::Invalid { message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_socket_permissions(), "0600");
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_log_format(), "pretty");
        assert_eq!(default_stop_timeout_ms(), 3000);
    }

    #[test]
    fn test_services_only_file_uses_defaults() {
        let settings = Settings::from_toml(
            Path::new("shell.toml"),
            r#"
            [services.wm]
            executable = "/usr/bin/wm"
            "#,
        )
        .unwrap();

        assert_eq!(settings.supervisor.stop_timeout(), Duration::from_secs(3));
        assert_eq!(settings.logging.format, "pretty");
        assert_eq!(settings.limits.max_message_size, 1_048_576);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let result = Settings::from_toml(
            Path::new("shell.toml"),
            r#"
            [logging]
            level = "loud"
            "#,
        );
        assert!(matches!(
            result,
            Err(ShellError::Config {
                kind: ConfigErrorKind::Invalid { .. }
            })
        ));
    }

    #[test]
    fn test_non_octal_permissions_rejected() {
        let result = Settings::from_toml(
            Path::new("shell.toml"),
            r#"
            [socket]
            path = "/tmp/x.sock"
            permissions = "0689"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_effective_peer_uids_defaults_to_self() {
        let security = SecurityConfig::default();
        assert_eq!(
            security.effective_peer_uids(),
            vec![nix::unistd::getuid().as_raw()]
        );

        let security = SecurityConfig {
            allowed_peer_uids: vec![1000, 1001],
        };
        assert_eq!(security.effective_peer_uids(), vec![1000, 1001]);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = Settings::load("/nonexistent/shell-init/shell.toml");
        assert!(matches!(
            result,
            Err(ShellError::Config {
                kind: ConfigErrorKind::NotFound { .. }
            })
        ));
    }
}
