//! Thin wrapper over the container engine CLI.
//!
//! Every `docker` and `docker compose` invocation berth makes is built here
//! as a [`CommandSpec`] and executed through the injected [`ProcessRunner`],
//! so tests can script the engine with a fake runner.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use berth_runner::{CommandSpec, ProcessOutput, ProcessRunner};
use berth_utils::error::{BerthError, ContainerError};

/// Ceiling for short engine calls (inspect, ps, network and volume management).
pub const ENGINE_TIMEOUT: Duration = Duration::from_secs(120);

/// Ceiling for calls that may build images.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(1800);

pub const LABEL_SITE_NAME: &str = "com.ddev.site-name";
pub const LABEL_APPROOT: &str = "com.ddev.approot";
pub const LABEL_PLATFORM: &str = "com.ddev.platform";
pub const PLATFORM: &str = "ddev";

/// External network shared by the router, the SSH agent and every project.
pub const GLOBAL_NETWORK: &str = "ddev_default";

/// Shared volume carrying router config, certs and other cross-project state.
pub const GLOBAL_CACHE_VOLUME: &str = "ddev-global-cache";

/// `.State` of `docker inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
    pub paused: bool,
    pub health: Option<Health>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Health {
    pub status: String,
    pub log: Vec<HealthLog>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HealthLog {
    pub output: String,
}

impl ContainerState {
    /// Health status, or `None` when the container has no health check.
    #[must_use]
    pub fn health_status(&self) -> Option<&str> {
        self.health.as_ref().map(|h| h.status.as_str()).filter(|s| !s.is_empty())
    }

    /// Running and either healthy or without a health check.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.running && !self.paused && self.health_status().is_none_or(|s| s == "healthy")
    }

    /// Output of the most recent health probe.
    #[must_use]
    pub fn last_health_output(&self) -> String {
        self.health
            .as_ref()
            .and_then(|h| h.log.last())
            .map(|l| l.output.trim().to_string())
            .unwrap_or_default()
    }
}

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerSummary {
    pub names: String,
    pub state: String,
    pub labels: String,
}

impl ContainerSummary {
    /// Value of `key` in the comma-separated `k=v` label list.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.split(',').find_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Container engine client.
#[derive(Clone)]
pub struct Docker {
    runner: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for Docker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Docker").finish_non_exhaustive()
    }
}

impl Docker {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    #[must_use]
    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    #[must_use]
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new("docker")
    }

    /// `docker compose -p <project> -f <file>...`
    #[must_use]
    pub fn compose(&self, project: &str, files: &[PathBuf]) -> CommandSpec {
        let mut spec = self.command().args(["compose", "-p", project]);
        for f in files {
            spec = spec.arg("-f").arg(f.as_os_str());
        }
        spec
    }

    /// Run and return the raw output without judging the exit status.
    pub fn try_capture(&self, spec: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, BerthError> {
        debug!(command = %spec, "container engine");
        Ok(self.runner.run(spec, timeout)?)
    }

    /// Run and return stdout; a non-zero exit is an error carrying the output.
    pub fn capture(&self, spec: &CommandSpec) -> Result<String, BerthError> {
        let out = self.try_capture(spec, ENGINE_TIMEOUT)?;
        check(spec, &out)?;
        Ok(out.stdout_string())
    }

    /// Run with inherited stdio.
    pub fn stream(&self, spec: &CommandSpec, timeout: Duration) -> Result<(), BerthError> {
        debug!(command = %spec, "container engine (streaming)");
        let out = self.runner.run_streaming(spec, timeout)?;
        check(spec, &out)
    }

    /// State of `container`, or `None` if it does not exist.
    pub fn inspect_state(&self, container: &str) -> Result<Option<ContainerState>, BerthError> {
        let spec = self
            .command()
            .args(["inspect", "--format", "{{json .State}}", container]);
        let out = self.try_capture(&spec, ENGINE_TIMEOUT)?;
        if !out.success() {
            let stderr = out.stderr_string();
            if stderr.contains("No such") {
                return Ok(None);
            }
            return Err(command_failed(&spec, &out));
        }
        let stdout = out.stdout_string();
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        serde_json::from_str(trimmed).map(Some).map_err(|e| {
            ContainerError::CommandFailed {
                command: spec.to_string(),
                output: format!("unexpected inspect output: {e}"),
            }
            .into()
        })
    }

    /// Environment of a running container as `KEY=value` lines.
    pub fn container_env(&self, container: &str) -> Result<Vec<String>, BerthError> {
        let spec = self
            .command()
            .args(["inspect", "--format", "{{json .Config.Env}}", container]);
        let stdout = self.capture(&spec)?;
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }
        serde_json::from_str(trimmed).map_err(|e| {
            ContainerError::CommandFailed {
                command: spec.to_string(),
                output: e.to_string(),
            }
            .into()
        })
    }

    /// All containers, running or not, carrying `label` (`key` or `key=value`).
    pub fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, BerthError> {
        let spec = self.command().args([
            "ps",
            "-a",
            "--filter",
            &format!("label={label}"),
            "--format",
            "{{json .}}",
        ]);
        let stdout = self.capture(&spec)?;
        stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                serde_json::from_str(l).map_err(|e| {
                    ContainerError::CommandFailed {
                        command: spec.to_string(),
                        output: e.to_string(),
                    }
                    .into()
                })
            })
            .collect()
    }

    /// `docker exec [-u user] <container> <argv>...`
    #[must_use]
    pub fn exec(&self, container: &str, argv: &[String], user: Option<&str>) -> CommandSpec {
        let mut spec = self.command().arg("exec");
        if let Some(u) = user {
            spec = spec.args(["-u", u]);
        }
        spec.arg(container).args(argv)
    }

    /// Remove `container` if present.
    pub fn remove_container(&self, container: &str) -> Result<(), BerthError> {
        let spec = self.command().args(["rm", "-f", container]);
        let out = self.try_capture(&spec, ENGINE_TIMEOUT)?;
        if out.success() || out.stderr_string().contains("No such") {
            return Ok(());
        }
        Err(command_failed(&spec, &out))
    }

    /// Create `name` unless it already exists.
    pub fn ensure_network(&self, name: &str) -> Result<(), BerthError> {
        let inspect = self.command().args(["network", "inspect", name]);
        if self.try_capture(&inspect, ENGINE_TIMEOUT)?.success() {
            return Ok(());
        }
        let create = self.command().args([
            "network",
            "create",
            "--label",
            &format!("{LABEL_PLATFORM}={PLATFORM}"),
            name,
        ]);
        self.capture(&create)?;
        debug!(network = %name, "created network");
        Ok(())
    }

    pub fn remove_network(&self, name: &str) -> Result<(), BerthError> {
        let spec = self.command().args(["network", "rm", name]);
        let out = self.try_capture(&spec, ENGINE_TIMEOUT)?;
        let stderr = out.stderr_string();
        if out.success() || stderr.contains("not found") || stderr.contains("No such") {
            return Ok(());
        }
        Err(command_failed(&spec, &out))
    }

    pub fn volume_exists(&self, name: &str) -> Result<bool, BerthError> {
        let spec = self.command().args(["volume", "inspect", name]);
        Ok(self.try_capture(&spec, ENGINE_TIMEOUT)?.success())
    }

    pub fn create_volume(&self, name: &str) -> Result<(), BerthError> {
        if self.volume_exists(name)? {
            return Ok(());
        }
        let spec = self.command().args([
            "volume",
            "create",
            "--label",
            &format!("{LABEL_PLATFORM}={PLATFORM}"),
            name,
        ]);
        self.capture(&spec)?;
        Ok(())
    }

    pub fn remove_volume(&self, name: &str) -> Result<(), BerthError> {
        let spec = self.command().args(["volume", "rm", "-f", name]);
        let out = self.try_capture(&spec, ENGINE_TIMEOUT)?;
        if out.success() || out.stderr_string().contains("No such") {
            return Ok(());
        }
        Err(command_failed(&spec, &out))
    }

    /// Copy `src` on the host to `container:dest`.
    pub fn copy_into(&self, src: &Path, container: &str, dest: &str) -> Result<(), BerthError> {
        let spec = self
            .command()
            .arg("cp")
            .arg(src.as_os_str())
            .arg(format!("{container}:{dest}"));
        self.capture(&spec)?;
        Ok(())
    }

    /// Copy `container:src` to `dest` on the host.
    pub fn copy_out(&self, container: &str, src: &str, dest: &Path) -> Result<(), BerthError> {
        let spec = self
            .command()
            .arg("cp")
            .arg(format!("{container}:{src}"))
            .arg(dest.as_os_str());
        self.capture(&spec)?;
        Ok(())
    }

    /// Published `(container_port, host_port)` pairs of `container`.
    pub fn exposed_host_ports(&self, container: &str) -> Result<Vec<(u16, u16)>, BerthError> {
        let spec = self.command().args(["port", container]);
        let stdout = self.capture(&spec)?;
        Ok(parse_port_lines(&stdout))
    }

    /// Wait until every container is ready, or fail with the last health output.
    pub fn wait_healthy(
        &self,
        containers: &[String],
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), BerthError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut pending = None;
            for name in containers {
                match self.inspect_state(name)? {
                    Some(state) if state.is_ready() => {}
                    Some(state) => {
                        pending = Some((name.clone(), describe_state(&state)));
                        break;
                    }
                    None => {
                        pending = Some((name.clone(), "container does not exist".to_string()));
                        break;
                    }
                }
            }
            let Some((container, detail)) = pending else {
                return Ok(());
            };
            if Instant::now() >= deadline {
                return Err(ContainerError::Unhealthy { container, detail }.into());
            }
            debug!(container = %container, detail = %detail, "waiting for container");
            std::thread::sleep(poll);
        }
    }
}

fn describe_state(state: &ContainerState) -> String {
    let last = state.last_health_output();
    match state.health_status() {
        Some(h) if !last.is_empty() => format!("{} ({h}): {last}", state.status),
        Some(h) => format!("{} ({h})", state.status),
        None => state.status.clone(),
    }
}

fn parse_port_lines(stdout: &str) -> Vec<(u16, u16)> {
    let mut pairs: Vec<(u16, u16)> = stdout
        .lines()
        .filter_map(|line| {
            let (left, right) = line.split_once("->")?;
            let container = left.trim().split('/').next()?.parse().ok()?;
            let host = right.trim().rsplit(':').next()?.parse().ok()?;
            Some((container, host))
        })
        .collect();
    pairs.sort_unstable();
    pairs.dedup();
    pairs
}

fn check(spec: &CommandSpec, out: &ProcessOutput) -> Result<(), BerthError> {
    if out.success() {
        Ok(())
    } else {
        Err(command_failed(spec, out))
    }
}

pub(crate) fn command_failed(spec: &CommandSpec, out: &ProcessOutput) -> BerthError {
    ContainerError::CommandFailed {
        command: spec.to_string(),
        output: out.combined_output().trim().to_string(),
    }
    .into()
}
