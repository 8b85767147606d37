//! Service process spawning.
//!
//! Builds the child process for a service:
//! - No shell interpretation (direct exec)
//! - Inherited environment plus declared entries plus the service name
//! - Piped stdout/stderr for forwarding
//! - Killed when its owner drops it

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::{ServiceDefinition, SERVICE_ENV_KEY};

/// Builder for a supervised child process.
#[derive(Debug, Clone)]
pub struct SubprocessBuilder {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl SubprocessBuilder {
    /// Create a new subprocess builder.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    /// Builder for the service `name` as described by `definition`.
    pub fn for_service(name: &str, definition: &ServiceDefinition) -> Self {
        let mut builder = Self::new(&definition.executable).args(&definition.arguments);
        for (key, value) in definition.env_pairs() {
            builder = builder.env(key, value);
        }
        if !definition.working_directory.as_os_str().is_empty() {
            builder = builder.current_dir(definition.working_directory.clone());
        }
        builder.env(SERVICE_ENV_KEY, name)
    }

    /// Add arguments to the command.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args.extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Set an environment variable on top of the inherited environment.
    /// Later entries win over earlier ones with the same key.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: PathBuf) -> Self {
        self.current_dir = Some(dir);
        self
    }

    /// Spawn the process without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self) -> io::Result<Child> {
        debug!(
            program = %self.program,
            args = ?self.args,
            cwd = ?self.current_dir,
            "Spawning subprocess"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        cmd.spawn()
    }
}

/// Deliver `signal` to a child that has not been reaped yet.
///
/// A reaped child has no PID any more, so this never signals a recycled PID;
/// signalling an already-reaped child is a successful no-op.
pub fn signal_child(child: &Child, signal: Signal) -> io::Result<()> {
    match child.id() {
        Some(pid) => {
            let pid = i32::try_from(pid)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
            signal::kill(Pid::from_raw(pid), signal).map_err(io::Error::from)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn run_to_stdout(builder: SubprocessBuilder) -> String {
        let mut child = builder.spawn().unwrap();
        let mut stdout = child.stdout.take().unwrap();
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        child.wait().await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_spawn_echo() {
        let out = run_to_stdout(SubprocessBuilder::new("echo").arg("hello").arg("world")).await;
        assert_eq!(out.trim(), "hello world");
    }

    #[tokio::test]
    async fn test_service_env_and_cwd() {
        let mut definition = ServiceDefinition::new("sh")
            .with_args(["-c", "echo $GREETING $SHELL_SERVICE_NAME; pwd"])
            .with_env("GREETING=hi");
        definition.working_directory = PathBuf::from("/");

        let out = run_to_stdout(SubprocessBuilder::for_service("bg", &definition)).await;
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines, vec!["hi bg", "/"]);
    }

    #[tokio::test]
    async fn test_inherits_environment() {
        let path = std::env::var("PATH").unwrap_or_default();
        let out = run_to_stdout(SubprocessBuilder::new("sh").args(["-c", "echo $PATH"])).await;
        assert_eq!(out.trim(), path);
    }

    #[tokio::test]
    async fn test_nonexistent_program() {
        let result = SubprocessBuilder::new("nonexistent_program_12345").spawn();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_signal_child_terminates() {
        let mut child = SubprocessBuilder::new("sleep").arg("30").spawn().unwrap();
        signal_child(&child, Signal::SIGKILL).unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());

        // Reaped: no PID left to signal.
        assert!(signal_child(&child, Signal::SIGKILL).is_ok());
    }
}
