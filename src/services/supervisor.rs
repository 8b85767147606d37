//! Orchestration of all jobs of the session.
//!
//! The supervisor owns the configuration in effect and one `ProcessJob` per
//! configured service. Control requests for an existing job only clone its
//! handle under the read lock; bring-up, reload and single-service restart
//! replace jobs and are serialised against each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::bus::OutputBus;
use crate::config::{Configuration, ServiceDefinition};
use crate::error::{JobErrorKind, ShellError, ShellResult};

use super::job::{JobStatus, ProcessJob};

/// A named control request routed through [`Supervisor::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOp {
    Start,
    Stop,
    Restart,
}

pub struct Supervisor {
    configuration: RwLock<Arc<Configuration>>,
    jobs: RwLock<HashMap<String, ProcessJob>>,
    /// Held by apply, reload and restart.
    reload_lock: Mutex<()>,
    stop_timeout: Duration,
    bus: OutputBus,
}

impl Supervisor {
    /// Create a supervisor for `configuration` without starting anything.
    pub fn new(configuration: Configuration, stop_timeout: Duration, bus: OutputBus) -> Self {
        Self {
            configuration: RwLock::new(Arc::new(configuration)),
            jobs: RwLock::new(HashMap::new()),
            reload_lock: Mutex::new(()),
            stop_timeout,
            bus,
        }
    }

    /// Replace every job with a fresh one for `configuration` and start them.
    ///
    /// Start failures are logged per service and do not stop the others.
    pub async fn apply(&self, configuration: Configuration) {
        let _guard = self.reload_lock.lock().await;
        self.apply_locked(Arc::new(configuration)).await;
    }

    /// Bring up the configuration in effect with fresh jobs.
    pub async fn start_all(&self) {
        let configuration = self.configuration().await;
        self.apply(configuration.as_ref().clone()).await;
    }

    async fn apply_locked(&self, configuration: Arc<Configuration>) {
        let fresh: HashMap<String, ProcessJob> = configuration
            .services
            .iter()
            .map(|(name, definition)| (name.clone(), self.new_job(name, definition.clone(), 0)))
            .collect();
        let to_start: Vec<ProcessJob> = fresh.values().cloned().collect();

        *self.configuration.write().await = configuration;
        // Dropping the previous jobs kills anything they still own.
        *self.jobs.write().await = fresh;

        info!(services = to_start.len(), "Applying configuration");
        for job in to_start {
            if let Err(e) = job.start().await {
                error!(service = %job.name(), error = %e, "Failed to start service");
            }
        }
    }

    /// Stop every tracked job concurrently.
    ///
    /// Jobs that were not running are skipped; every other failure is
    /// collected into one `Teardown` error after all stops have finished.
    pub async fn stop_all(&self) -> ShellResult<()> {
        let jobs: Vec<ProcessJob> = self.jobs.read().await.values().cloned().collect();

        let results = join_all(jobs.iter().map(|job| job.stop())).await;
        let failures: Vec<ShellError> = results
            .into_iter()
            .filter_map(Result::err)
            .filter(|e| !matches!(e.job_kind(), Some(JobErrorKind::NotRunning)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            for failure in &failures {
                warn!(error = %failure, "Service did not stop cleanly");
            }
            Err(ShellError::Teardown { failures })
        }
    }

    /// Stop everything, re-read the configuration file and apply it.
    ///
    /// Start counts reset to zero. If the file cannot be loaded the
    /// previous configuration is applied again and the load error returned.
    pub async fn reload(&self) -> ShellResult<()> {
        let _guard = self.reload_lock.lock().await;

        if let Err(e) = self.stop_all().await {
            warn!(error = %e, "Continuing reload after incomplete teardown");
        }

        let previous = self.configuration().await;
        match previous.reload() {
            Ok(configuration) => {
                info!(path = %configuration.path.display(), "Configuration reloaded");
                self.apply_locked(Arc::new(configuration)).await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Reload failed, restoring previous configuration");
                self.apply_locked(previous).await;
                Err(e)
            }
        }
    }

    /// Route a control request to the job for `name`.
    pub async fn dispatch(&self, op: ServiceOp, name: &str) -> ShellResult<()> {
        match op {
            ServiceOp::Start => self.job(name).await?.start().await,
            ServiceOp::Stop => self.job(name).await?.stop().await,
            ServiceOp::Restart => self.restart(name).await,
        }
    }

    /// Replace the job for `name` with a new one built from a freshly read
    /// definition, carrying its start count over.
    ///
    /// When the file cannot be read or no longer names the service, the
    /// current definition is reused.
    pub async fn restart(&self, name: &str) -> ShellResult<()> {
        let _guard = self.reload_lock.lock().await;
        let old = self.job(name).await?;

        let current = self.configuration().await;
        let definition = self.fresh_definition(&current, &old);
        *self.configuration.write().await = Arc::new(current.with_service(name, definition.clone()));

        match old.stop().await {
            Ok(()) => {}
            Err(e) if matches!(e.job_kind(), Some(JobErrorKind::NotRunning)) => {}
            Err(e) => warn!(service = %name, error = %e, "Old process did not stop cleanly"),
        }
        let start_count = old.status().await?.start_count;

        let job = self.new_job(name, definition, start_count);
        self.jobs.write().await.insert(name.to_string(), job.clone());
        drop(old);

        info!(service = %name, start_count, "Restarting service");
        job.start().await
    }

    fn fresh_definition(&self, current: &Configuration, old: &ProcessJob) -> ServiceDefinition {
        match current.reload() {
            Ok(fresh) => match fresh.service(old.name()) {
                Some(definition) => definition.clone(),
                None => {
                    warn!(service = %old.name(), "Service missing from reloaded file, keeping its definition");
                    old.definition().clone()
                }
            },
            Err(e) => {
                warn!(service = %old.name(), error = %e, "Reload failed, keeping the current definition");
                old.definition().clone()
            }
        }
    }

    pub async fn status(&self, name: &str) -> ShellResult<JobStatus> {
        self.job(name).await?.status().await
    }

    /// Status of every job, ordered by name.
    pub async fn statuses(&self) -> Vec<JobStatus> {
        let jobs: Vec<ProcessJob> = self.jobs.read().await.values().cloned().collect();
        let mut statuses: Vec<JobStatus> = join_all(jobs.iter().map(|job| job.status()))
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Definition of `name` in the configuration in effect, if any.
    pub async fn service_config(&self, name: &str) -> Option<ServiceDefinition> {
        self.configuration.read().await.service(name).cloned()
    }

    pub async fn configuration(&self) -> Arc<Configuration> {
        Arc::clone(&*self.configuration.read().await)
    }

    async fn job(&self, name: &str) -> ShellResult<ProcessJob> {
        self.jobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ShellError::ServiceNotConfigured {
                name: name.to_string(),
            })
    }

    fn new_job(&self, name: &str, definition: ServiceDefinition, start_count: u64) -> ProcessJob {
        ProcessJob::spawn(
            name,
            definition,
            start_count,
            self.stop_timeout,
            self.bus.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::JobState;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tokio::time::sleep;

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn supervisor(configuration: Configuration) -> Supervisor {
        Supervisor::new(configuration, TIMEOUT, OutputBus::new(64))
    }

    fn in_memory(services: Vec<(&str, ServiceDefinition)>) -> Configuration {
        Configuration::from_services(
            "/nonexistent/shell.toml",
            services.into_iter().map(|(n, d)| (n.to_string(), d)),
        )
    }

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("shell.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn process_alive(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .map(|stat| !stat.rsplit(')').next().unwrap_or("").trim_start().starts_with('Z'))
            .unwrap_or(false)
    }

    async fn running_pid(supervisor: &Supervisor, name: &str) -> u32 {
        supervisor.status(name).await.unwrap().pid.unwrap()
    }

    #[tokio::test]
    async fn test_crashing_service_is_restarted() {
        let sup = supervisor(in_memory(vec![(
            "a",
            ServiceDefinition::new("true").with_auto_restart(true),
        )]));
        sup.start_all().await;
        sleep(Duration::from_millis(500)).await;

        assert!(sup.status("a").await.unwrap().start_count >= 2);
        let _ = sup.stop_all().await;
    }

    #[tokio::test]
    async fn test_exited_service_without_auto_restart_stays_down() {
        let sup = supervisor(in_memory(vec![("a", ServiceDefinition::new("true"))]));
        sup.start_all().await;
        sleep(Duration::from_millis(500)).await;

        let status = sup.status("a").await.unwrap();
        assert_eq!(status.start_count, 1);
        assert_eq!(status.state, JobState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_then_start_service() {
        let sup = supervisor(in_memory(vec![(
            "b",
            ServiceDefinition::new("sleep").with_args(["30"]),
        )]));
        sup.start_all().await;
        let pid = running_pid(&sup, "b").await;
        let before = sup.status("b").await.unwrap().start_count;

        sup.dispatch(ServiceOp::Stop, "b").await.unwrap();
        assert!(!process_alive(pid));

        sup.dispatch(ServiceOp::Start, "b").await.unwrap();
        assert_eq!(sup.status("b").await.unwrap().start_count, before + 1);
        sup.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let sup = supervisor(in_memory(vec![]));
        for op in [ServiceOp::Start, ServiceOp::Stop, ServiceOp::Restart] {
            let err = sup.dispatch(op, "ghost").await.unwrap_err();
            assert!(matches!(err, ShellError::ServiceNotConfigured { ref name } if name == "ghost"));
            assert_eq!(err.code(), "SERVICE_NOT_CONFIGURED");
        }
        assert!(sup.status("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_reload_removes_service() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[services.c]
executable = "sleep"
arguments = ["30"]

[services.d]
executable = "sleep"
arguments = ["30"]
"#,
        );
        let sup = supervisor(Configuration::load(&path).unwrap());
        sup.start_all().await;
        let pid = running_pid(&sup, "c").await;

        write_config(
            &dir,
            r#"
[services.d]
executable = "sleep"
arguments = ["30"]
"#,
        );
        sup.reload().await.unwrap();

        let err = sup.dispatch(ServiceOp::Start, "c").await.unwrap_err();
        assert!(matches!(err, ShellError::ServiceNotConfigured { .. }));
        assert!(!process_alive(pid));
        assert!(sup.service_config("c").await.is_none());
        assert_eq!(sup.status("d").await.unwrap().state, JobState::Running);
        sup.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_resets_start_count() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[services.e]\nexecutable = \"sleep\"\narguments = [\"30\"]\n",
        );
        let sup = supervisor(Configuration::load(&path).unwrap());
        sup.start_all().await;
        sup.dispatch(ServiceOp::Stop, "e").await.unwrap();
        sup.dispatch(ServiceOp::Start, "e").await.unwrap();
        assert_eq!(sup.status("e").await.unwrap().start_count, 2);

        sup.reload().await.unwrap();
        assert_eq!(sup.status("e").await.unwrap().start_count, 1);
        sup.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reload_restores_previous_configuration() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[services.f]\nexecutable = \"sleep\"\narguments = [\"30\"]\n",
        );
        let sup = supervisor(Configuration::load(&path).unwrap());
        sup.start_all().await;
        let old_pid = running_pid(&sup, "f").await;

        write_config(&dir, "[services.f\nexecutable = ");
        let err = sup.reload().await.unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let status = sup.status("f").await.unwrap();
        assert_eq!(status.state, JobState::Running);
        assert_ne!(status.pid, Some(old_pid));
        assert!(sup.service_config("f").await.is_some());
        sup.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_preserves_start_count_and_rereads_definition() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[services.g]\nexecutable = \"sleep\"\narguments = [\"30\"]\n",
        );
        let sup = supervisor(Configuration::load(&path).unwrap());
        sup.start_all().await;
        sup.dispatch(ServiceOp::Stop, "g").await.unwrap();
        sup.dispatch(ServiceOp::Start, "g").await.unwrap();
        let old_pid = running_pid(&sup, "g").await;

        write_config(
            &dir,
            "[services.g]\nexecutable = \"sleep\"\narguments = [\"31\"]\n",
        );
        sup.dispatch(ServiceOp::Restart, "g").await.unwrap();

        let status = sup.status("g").await.unwrap();
        assert_eq!(status.start_count, 3);
        assert_eq!(status.state, JobState::Running);
        assert!(!process_alive(old_pid));
        assert_eq!(
            sup.service_config("g").await.unwrap().arguments,
            vec!["31".to_string()]
        );
        sup.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_keeps_definition_when_file_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[services.h]\nexecutable = \"sleep\"\narguments = [\"30\"]\n",
        );
        let sup = supervisor(Configuration::load(&path).unwrap());
        sup.start_all().await;

        write_config(&dir, "not toml at all [");
        sup.dispatch(ServiceOp::Restart, "h").await.unwrap();

        let status = sup.status("h").await.unwrap();
        assert_eq!(status.start_count, 2);
        assert_eq!(
            sup.service_config("h").await.unwrap().arguments,
            vec!["30".to_string()]
        );
        sup.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_all_reports_timeouts() {
        let sup = supervisor(in_memory(vec![
            (
                "stubborn",
                ServiceDefinition::new("sh")
                    .with_args(["-c", "trap '' TERM; while true; do sleep 1; done"])
                    .with_stop_signal("SIGTERM"),
            ),
            ("fine", ServiceDefinition::new("sleep").with_args(["30"])),
            ("idle", ServiceDefinition::new("sleep").with_enabled(false)),
        ]));
        sup.start_all().await;
        sleep(Duration::from_millis(200)).await;

        let err = sup.stop_all().await.unwrap_err();
        match err {
            ShellError::Teardown { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].code(), "STOP_TIMEOUT");
            }
            other => panic!("expected teardown error, got {:?}", other),
        }

        let stubborn = sup.status("stubborn").await.unwrap();
        assert_eq!(stubborn.state, JobState::Running);
        let again = sup.dispatch(ServiceOp::Start, "stubborn").await.unwrap_err();
        assert_eq!(again.code(), "ALREADY_RUNNING");
        assert_eq!(sup.status("fine").await.unwrap().state, JobState::Stopped);
    }

    #[tokio::test]
    async fn test_disabled_service_is_configured_but_idle() {
        let sup = supervisor(in_memory(vec![(
            "off",
            ServiceDefinition::new("sleep").with_args(["30"]).with_enabled(false),
        )]));
        sup.start_all().await;

        sup.dispatch(ServiceOp::Start, "off").await.unwrap();
        let status = sup.status("off").await.unwrap();
        assert_eq!(status.state, JobState::Idle);
        assert_eq!(status.start_count, 0);
    }

    #[tokio::test]
    async fn test_configuration_queries() {
        let sup = supervisor(in_memory(vec![
            ("b", ServiceDefinition::new("sleep")),
            ("a", ServiceDefinition::new("sleep")),
        ]));
        assert!(sup.service_config("missing").await.is_none());
        assert_eq!(sup.service_config("a").await.unwrap().executable, "sleep");

        let configuration = sup.configuration().await;
        assert_eq!(configuration.path, Path::new("/nonexistent/shell.toml"));
        assert_eq!(configuration.names().collect::<Vec<_>>(), vec!["a", "b"]);

        sup.apply(configuration.as_ref().clone()).await;
        let names: Vec<_> = sup.statuses().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        let _ = sup.stop_all().await;
    }
}
