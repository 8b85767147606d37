//! Service definitions and the reloadable service configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigErrorKind, ShellError};

/// Name of the environment variable every child receives holding its own
/// service name, so it can ask the control plane for its configuration.
pub const SERVICE_ENV_KEY: &str = "SHELL_SERVICE_NAME";

/// Declarative description of one managed program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Program to execute. An empty value is accepted at load time but
    /// refused when the service is started.
    #[serde(default)]
    pub executable: String,

    /// Arguments passed verbatim.
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Working directory; resolved to the supervisor's directory at load
    /// time when left empty.
    #[serde(default)]
    pub working_directory: PathBuf,

    /// `KEY=VALUE` entries appended to the inherited environment.
    #[serde(default)]
    pub environment: Vec<String>,

    /// Unset means enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Unset means no restart after an unexpected exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_restart: Option<bool>,

    /// Whether the child may own a visible window. Passed through only.
    #[serde(default)]
    pub visible: bool,

    /// Signal delivered by `Stop`. Unset means SIGKILL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,

    /// Private settings for the service itself, never read by the supervisor.
    #[serde(default)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl ServiceDefinition {
    /// A definition running `executable` with default policy.
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.arguments = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = Some(auto_restart);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.environment.push(entry.into());
        self
    }

    pub fn with_stop_signal(mut self, signal: impl Into<String>) -> Self {
        self.stop_signal = Some(signal.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn auto_restart(&self) -> bool {
        self.auto_restart.unwrap_or(false)
    }

    /// The signal `Stop` sends; unparsable names fall back to SIGKILL.
    pub fn stop_signal(&self) -> Signal {
        self.stop_signal
            .as_deref()
            .and_then(|s| Signal::from_str(s).ok())
            .unwrap_or(Signal::SIGKILL)
    }

    /// Split the declared environment into key/value pairs.
    ///
    /// Entries without `=` are skipped; `validate` rejects them on load.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.environment
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .filter(|(key, _)| !key.is_empty())
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if let Some(signal) = &self.stop_signal {
            Signal::from_str(signal).map_err(|_| {
                format!("service '{}': unknown stop_signal '{}'", name, signal)
            })?;
        }
        for entry in &self.environment {
            match entry.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => {
                    return Err(format!(
                        "service '{}': environment entry '{}' is not KEY=VALUE",
                        name, entry
                    ))
                }
            }
        }
        Ok(())
    }
}

/// The full named set of service definitions plus the file it came from.
///
/// Values are never mutated after loading; `reload` and `with_service`
/// return new values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    pub path: PathBuf,
    pub services: BTreeMap<String, ServiceDefinition>,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    services: BTreeMap<String, ServiceDefinition>,
}

impl Configuration {
    /// Load and parse a configuration file.
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

    /// Parse TOML text as if it had been read from `path`.
    pub fn from_toml(path: &Path, content: &str) -> Result<Self, ShellError> {
        let parse_error = |message: String| ShellError::Config {
            kind: ConfigErrorKind::Parse {
                path: path.to_path_buf(),
                message,
            },
        };

        let file: ConfigFile = toml::from_str(content).map_err(|e| parse_error(e.to_string()))?;

        let cwd = std::env::current_dir().map_err(|e| parse_error(e.to_string()))?;
        let mut services = file.services;
        for (name, service) in services.iter_mut() {
            service.validate(name).map_err(parse_error)?;
            if service.working_directory.as_os_str().is_empty() {
                service.working_directory = cwd.clone();
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            services,
        })
    }

    /// Build a configuration in memory, applying the same defaulting as `load`.
    pub fn from_services<I>(path: impl Into<PathBuf>, services: I) -> Self
    where
        I: IntoIterator<Item = (String, ServiceDefinition)>,
    {
        let cwd = std::env::current_dir().unwrap_or_default();
        let services = services
            .into_iter()
            .map(|(name, mut service)| {
                if service.working_directory.as_os_str().is_empty() {
                    service.working_directory = cwd.clone();
                }
                (name, service)
            })
            .collect();
        Self {
            path: path.into(),
            services,
        }
    }

    /// Re-read the file this configuration was loaded from.
    ///
    /// `self` is left untouched whatever the outcome.
    pub fn reload(&self) -> Result<Self, ShellError> {
        Self::load(&self.path)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// A copy of this configuration with `name` set to `definition`.
    pub fn with_service(&self, name: &str, definition: ServiceDefinition) -> Self {
        let mut services = self.services.clone();
        services.insert(name.to_string(), definition);
        Self {
            path: self.path.clone(),
            services,
        }
    }
}
