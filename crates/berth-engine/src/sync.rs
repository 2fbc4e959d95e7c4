//! Mutagen file-sync sessions.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use berth_config::Project;
use berth_runner::{CommandSpec, ProcessRunner};
use berth_utils::error::{BerthError, ContainerError};

use crate::compose::CONTAINER_APPROOT;

const SYNC_TIMEOUT: Duration = Duration::from_secs(600);

/// Session name of a project.
#[must_use]
pub fn session_name(project: &Project) -> String {
    project.name().replace('.', "")
}

/// Controller for the `mutagen` CLI.
#[derive(Clone)]
pub struct MutagenSync {
    runner: Arc<dyn ProcessRunner>,
}

impl MutagenSync {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    fn run(&self, spec: &CommandSpec, ignore: &[&str]) -> Result<(), BerthError> {
        debug!(command = %spec, "mutagen");
        let out = self.runner.run(spec, SYNC_TIMEOUT)?;
        if out.success() {
            return Ok(());
        }
        let output = out.combined_output();
        if ignore.iter().any(|needle| output.contains(needle)) {
            return Ok(());
        }
        Err(ContainerError::CommandFailed {
            command: spec.to_string(),
            output: output.trim().to_string(),
        }
        .into())
    }

    /// Create (or replace) the session syncing the approot into the web container.
    pub fn create(&self, project: &Project) -> Result<(), BerthError> {
        let name = session_name(project);
        self.terminate(project)?;
        let spec = CommandSpec::new("mutagen")
            .args(["sync", "create", "--name", &name, "--sync-mode", "two-way-resolved"])
            .args(["--ignore-vcs", "--label"])
            .arg(format!("com.ddev.site-name={}", project.name()))
            .arg(project.approot.as_os_str())
            .arg(format!("docker://{}{CONTAINER_APPROOT}", project.container_name("web")));
        self.run(&spec, &[])?;
        info!(project = %project.name(), session = %name, "mutagen sync created");
        Ok(())
    }

    pub fn flush(&self, project: &Project) -> Result<(), BerthError> {
        let spec = CommandSpec::new("mutagen").args(["sync", "flush", &session_name(project)]);
        self.run(&spec, &[])
    }

    pub fn pause(&self, project: &Project) -> Result<(), BerthError> {
        let spec = CommandSpec::new("mutagen").args(["sync", "pause", &session_name(project)]);
        self.run(&spec, &["unable to locate"])
    }

    pub fn resume(&self, project: &Project) -> Result<(), BerthError> {
        let spec = CommandSpec::new("mutagen").args(["sync", "resume", &session_name(project)]);
        self.run(&spec, &["unable to locate"])
    }

    pub fn terminate(&self, project: &Project) -> Result<(), BerthError> {
        let spec = CommandSpec::new("mutagen").args(["sync", "terminate", &session_name(project)]);
        self.run(&spec, &["unable to locate", "no matching sessions"])
    }

    pub fn stop_daemon(&self) -> Result<(), BerthError> {
        let spec = CommandSpec::new("mutagen").args(["daemon", "stop"]);
        self.run(&spec, &["not running", "unable to connect"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_config::{GlobalConfig, ProjectConfig};
    use berth_runner::FakeRunner;

    fn project() -> Project {
        Project::new("/srv/my.site", ProjectConfig::with_name("my-site"), GlobalConfig::default())
    }

    #[test]
    fn test_create_replaces_session() {
        let fake = Arc::new(FakeRunner::new());
        let sync = MutagenSync::new(fake.clone());
        sync.create(&project()).unwrap();
        let cmds = fake.commands();
        assert!(cmds[0].contains("sync terminate my-site"));
        assert!(cmds[1].contains("sync create --name my-site"));
        assert!(cmds[1].ends_with("/srv/my.site docker://ddev-my-site-web/var/www/html"));
    }

    #[test]
    fn test_missing_session_is_not_an_error_on_terminate() {
        let fake = Arc::new(FakeRunner::new());
        fake.fail(&["sync", "terminate"], 1, "Error: unable to locate requested sessions");
        MutagenSync::new(fake.clone()).terminate(&project()).unwrap();
    }

    #[test]
    fn test_flush_failure_is_reported() {
        let fake = Arc::new(FakeRunner::new());
        fake.fail(&["sync", "flush"], 1, "Error: session halted");
        let err = MutagenSync::new(fake).flush(&project()).unwrap_err();
        assert!(err.to_string().contains("session halted"));
    }
}
