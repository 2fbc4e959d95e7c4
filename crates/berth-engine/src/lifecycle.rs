//! Project lifecycle: start, stop, pause, restart, power-off and the
//! status/describe views.
//!
//! ```text
//!  not-found --config--> stopped --start--> starting --healthy--> running
//!                           ^                  |                     |
//!                           |              unhealthy                 |
//!                           +------ paused <-------- pause ----------+
//!                           +------------------------ stop ----------+
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use berth_config::project::{ROUTER_CONTAINER, SSH_AGENT_CONTAINER};
use berth_config::{GlobalConfig, Project, apptypes, validate_project};
use berth_utils::error::{BerthError, ConfigError, PortError};
use berth_utils::logging::{OperationTimer, operation_span};
use berth_utils::paths;

use crate::compose::{self, ComposeOptions, FULL_FILE, load_compose_full};
use crate::docker::{
    BUILD_TIMEOUT, ContainerState, ENGINE_TIMEOUT, GLOBAL_CACHE_VOLUME, GLOBAL_NETWORK, LABEL_SITE_NAME,
    command_failed,
};
use crate::engine::Engine;
use crate::probe;
use crate::router::RouterState;

/// Host ports handed out when an inherited router port is taken.
const EPHEMERAL_ROUTER_PORTS: RangeInclusive<u16> = 50080..=50442;

/// Observable state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SiteStatus {
    Running,
    Starting,
    Paused,
    Stopped,
    Unhealthy,
    NotFound,
    DirMissing,
    ConfigMissing,
}

fn container_status(state: Option<&ContainerState>) -> SiteStatus {
    match state {
        None => SiteStatus::Stopped,
        Some(s) if s.paused => SiteStatus::Paused,
        Some(s) if !s.running => SiteStatus::Stopped,
        Some(s) => match s.health_status() {
            Some("starting") => SiteStatus::Starting,
            Some("unhealthy") => SiteStatus::Unhealthy,
            _ => SiteStatus::Running,
        },
    }
}

/// Worst state across the project's containers; `Running` only when all are.
fn aggregate_status(states: &[Option<ContainerState>]) -> SiteStatus {
    if states.iter().all(Option::is_none) {
        return SiteStatus::Stopped;
    }
    states
        .iter()
        .map(|s| container_status(s.as_ref()))
        .max()
        .unwrap_or(SiteStatus::Stopped)
}

/// Outcome of [`Engine::poweroff`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PowerOffReport {
    pub stopped: Vec<String>,
    /// Project name and rendered error.
    pub failed: Vec<(String, String)>,
}

/// One row of [`Engine::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub approot: PathBuf,
    pub status: SiteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescription {
    pub container: String,
    pub status: String,
    pub shell: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_ports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub describe_url_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub describe_info: Option<String>,
}

/// What `describe` reports about a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Description {
    pub name: String,
    pub approot: PathBuf,
    #[serde(rename = "type")]
    pub app_type: String,
    pub docroot: String,
    pub status: SiteStatus,
    pub primary_url: String,
    pub urls: Vec<String>,
    pub database: String,
    pub router: RouterState,
    pub services: BTreeMap<String, ServiceDescription>,
}

fn state_label(state: Option<&ContainerState>) -> String {
    match state {
        None => "absent".to_string(),
        Some(s) => match s.health_status() {
            Some(h) if s.running && !s.paused => format!("{} ({h})", s.status),
            _ => s.status.clone(),
        },
    }
}

impl Engine {
    /// Run `f` inside the operation span, timing it and tagging any error with `op`.
    pub(crate) fn run_op<T>(
        &self,
        project: &Project,
        op: &'static str,
        f: impl FnOnce() -> Result<T, BerthError>,
    ) -> Result<T, BerthError> {
        let span = operation_span(project.name(), op);
        let _entered = span.enter();
        let timer = OperationTimer::start(project.name(), op);
        match f() {
            Ok(v) => {
                timer.finish();
                Ok(v)
            }
            Err(e) => {
                timer.fail(&e);
                Err(e.in_op(op))
            }
        }
    }

    /// Status of a loaded project.
    pub fn status(&self, project: &Project) -> Result<SiteStatus, BerthError> {
        if !project.approot.is_dir() {
            return Ok(SiteStatus::DirMissing);
        }
        if !project.config_path().is_file() {
            return Ok(SiteStatus::ConfigMissing);
        }
        let containers = match load_compose_full(project)? {
            Some(doc) => doc.container_names(),
            None => {
                let mut names = vec![project.container_name("web")];
                if !project.omits("db") {
                    names.push(project.container_name("db"));
                }
                names
            }
        };
        let mut states = Vec::with_capacity(containers.len());
        for c in &containers {
            states.push(self.docker.inspect_state(c)?);
        }
        Ok(aggregate_status(&states))
    }

    /// Status of a catalogued project by name.
    pub fn status_by_name(&self, name: &str, global: &GlobalConfig) -> Result<SiteStatus, BerthError> {
        let Some(entry) = self.registry.get(name)? else {
            return Ok(SiteStatus::NotFound);
        };
        if !entry.approot.is_dir() {
            return Ok(SiteStatus::DirMissing);
        }
        if !paths::project_config_dir(&entry.approot).join("config.yaml").is_file() {
            return Ok(SiteStatus::ConfigMissing);
        }
        let project = Project::load(&entry.approot, true, global.clone())?;
        self.status(&project)
    }

    /// Every catalogued project with its status.
    pub fn list(&self, global: &GlobalConfig) -> Result<Vec<ProjectSummary>, BerthError> {
        let mut out = Vec::new();
        for (name, entry) in self.registry.list()? {
            let status = self.status_by_name(&name, global)?;
            let url = match status {
                SiteStatus::DirMissing | SiteStatus::ConfigMissing | SiteStatus::NotFound => None,
                _ => Project::load(&entry.approot, true, global.clone())
                    .ok()
                    .map(|p| p.primary_url(None)),
            };
            out.push(ProjectSummary {
                name,
                approot: entry.approot,
                status,
                url,
            });
        }
        Ok(out)
    }

    /// Copy of `project` whose inherited router ports are swapped for
    /// ephemeral ones when something other than the router holds them.
    pub fn with_ephemeral_router_ports(&self, project: &Project) -> Result<Project, BerthError> {
        let mut effective = project.clone();
        if project.is_router_disabled() {
            return Ok(effective);
        }
        let mut taken = BTreeSet::new();
        let candidates = [
            (project.config.router_http_port.is_none(), project.router_http_port(), false),
            (project.config.router_https_port.is_none(), project.router_https_port(), true),
        ];
        for (inherited, port, https) in candidates {
            if !inherited || self.busy_router_ports(&[port])?.is_empty() {
                continue;
            }
            let Some(ephemeral) = EPHEMERAL_ROUTER_PORTS
                .clone()
                .find(|p| !taken.contains(p) && !self.ports.is_active(*p))
            else {
                return Err(PortError::Busy { port }.into());
            };
            taken.insert(ephemeral);
            if https {
                effective.global.router_https_port = ephemeral;
            } else {
                effective.global.router_http_port = ephemeral;
            }
            info!(
                project = %project.name(),
                port,
                ephemeral,
                "router port is busy; using an ephemeral port for this run"
            );
        }
        Ok(effective)
    }

    /// Fail when the data volume was written by a different engine or version.
    fn check_database_volume(&self, project: &Project) -> Result<(), BerthError> {
        let found = probe::probe(&self.docker, project)?;
        let configured = project.database().to_string();
        if !found.is_empty() && found != configured {
            return Err(ConfigError::invalid(
                "database",
                format!(
                    "the existing database volume holds {found} but the project is configured for {configured}; \
                     set database to {found} or delete the project data first"
                ),
            )
            .into());
        }
        Ok(())
    }

    fn create_volumes(&self, project: &Project) -> Result<(), BerthError> {
        let mut volumes = vec![GLOBAL_CACHE_VOLUME.to_string()];
        if !project.omits("db") {
            volumes.push(compose::db_volume(project));
            if project.no_bind_mounts() {
                volumes.push(compose::snapshot_volume(project));
            }
        }
        if project.is_mutagen_enabled() || project.no_bind_mounts() {
            volumes.push(compose::mutagen_volume(project));
        }
        for v in &volumes {
            self.docker.create_volume(v)?;
        }
        Ok(())
    }

    /// Start the project and wait until every container is healthy.
    pub fn start(&self, project: &Project) -> Result<(), BerthError> {
        self.start_with(project, &ComposeOptions::default())
    }

    /// [`Engine::start`] with rendering knobs, used by snapshot restore.
    pub fn start_with(&self, project: &Project, opts: &ComposeOptions) -> Result<(), BerthError> {
        self.run_op(project, "start", || self.start_inner(project, opts))
    }

    fn start_inner(&self, project: &Project, opts: &ComposeOptions) -> Result<(), BerthError> {
        validate_project(project)?;
        self.registry
            .reserve(project.name(), &project.approot, &project.reserved_ports())?;
        let project = &self.with_ephemeral_router_ports(project)?;

        if project.is_mutagen_enabled() {
            if let Some(dir) = project.host_upload_dir() {
                paths::ensure_dir_all(&dir)?;
            }
        }
        self.process_hooks(project, "pre-start")?;

        if !project.omits("db") {
            self.check_database_volume(project)?;
        }
        self.create_volumes(project)?;
        self.docker.ensure_network(GLOBAL_NETWORK)?;
        if !project.omits(SSH_AGENT_CONTAINER) {
            self.ensure_ssh_agent()?;
        }

        let bundle = apptypes::lookup(&project.config.app_type);
        if let Some(bundle) = bundle {
            if let Some(path) = bundle.write_settings(project)? {
                debug!(project = %project.name(), settings = %path.display(), "settings written");
            }
        }

        let doc = compose::synthesize(&self.docker, project, &self.user, opts)?;
        let up = self
            .docker
            .compose(&project.compose_project(), &[project.config_file(FULL_FILE)])
            .args(["up", "-d", "--build"])
            .cwd(project.config_dir());
        self.docker.stream(&up, BUILD_TIMEOUT)?;
        self.docker
            .wait_healthy(&doc.container_names(), project.container_timeout(), self.poll_interval)?;

        if !project.is_router_disabled() {
            self.refresh_router(&project.global)?;
        }
        if project.is_mutagen_enabled() {
            let sync = self.mutagen();
            sync.create(project)?;
            sync.flush(project)?;
        }
        if let Some(bundle) = bundle {
            bundle.post_start(project)?;
        }

        self.process_hooks(project, "post-start")?;
        info!(project = %project.name(), url = %project.primary_url(None), "project is running");
        Ok(())
    }

    /// Stop the project; with `remove_data` its containers, volumes and
    /// catalogue entry are removed as well.
    pub fn stop(&self, project: &Project, remove_data: bool, remove_images: bool) -> Result<(), BerthError> {
        self.run_op(project, "stop", || {
            self.process_hooks(project, "pre-stop")?;
            self.stop_containers(project, remove_data, remove_images)?;
            if remove_data {
                self.registry.remove(project.name())?;
            }
            self.refresh_router(&project.global)?;
            self.stop_router_if_idle()?;
            self.process_hooks(project, "post-stop")
        })
    }

    fn stop_containers(&self, project: &Project, remove_data: bool, remove_images: bool) -> Result<(), BerthError> {
        if project.is_mutagen_enabled() {
            let sync = self.mutagen();
            if remove_data {
                sync.terminate(project)?;
            } else {
                sync.pause(project)?;
            }
        }

        let full = project.config_file(FULL_FILE);
        if full.is_file() {
            let spec = self
                .docker
                .compose(&project.compose_project(), &[full])
                .cwd(project.config_dir());
            let spec = if remove_data {
                spec.args(["down", "-v"])
            } else {
                spec.arg("stop")
            };
            self.docker.stream(&spec, BUILD_TIMEOUT)?;
        } else {
            debug!(project = %project.name(), "no compose document; nothing to stop");
        }

        if remove_data {
            let mut volumes = vec![
                compose::db_volume(project),
                compose::snapshot_volume(project),
                compose::mutagen_volume(project),
            ];
            if project.is_nfs_enabled() {
                volumes.push(compose::nfs_volume(project));
            }
            for v in &volumes {
                self.docker.remove_volume(v)?;
            }
            info!(project = %project.name(), "project data removed");
        }
        if remove_images {
            self.remove_built_images(project)?;
        }
        Ok(())
    }

    fn remove_built_images(&self, project: &Project) -> Result<(), BerthError> {
        let images = [
            compose::built_image(&compose::web_image(project), project),
            compose::built_image(&compose::db_image(project), project),
        ];
        let spec = self.docker.command().args(["image", "rm", "-f"]).args(&images);
        let out = self.docker.try_capture(&spec, ENGINE_TIMEOUT)?;
        if !out.success() && !out.stderr_string().contains("No such image") {
            return Err(command_failed(&spec, &out));
        }
        Ok(())
    }

    /// Pause the project's containers, leaving its routes in place.
    pub fn pause(&self, project: &Project) -> Result<(), BerthError> {
        self.run_op(project, "pause", || {
            self.process_hooks(project, "pre-pause")?;
            if project.is_mutagen_enabled() {
                self.mutagen().pause(project)?;
            }
            let full = project.config_file(FULL_FILE);
            if full.is_file() {
                let spec = self
                    .docker
                    .compose(&project.compose_project(), &[full])
                    .arg("pause")
                    .cwd(project.config_dir());
                self.docker.stream(&spec, BUILD_TIMEOUT)?;
            }
            self.stop_router_if_idle()?;
            self.process_hooks(project, "post-pause")
        })
    }

    pub fn restart(&self, project: &Project) -> Result<(), BerthError> {
        self.stop(project, false, false)?;
        self.start(project)
    }

    /// Stop every catalogued project, then tear down the shared containers
    /// and network. Per-project failures are collected, not fatal.
    pub fn poweroff(&self, global: &GlobalConfig) -> Result<PowerOffReport, BerthError> {
        let mut report = PowerOffReport::default();
        for (name, entry) in self.registry.list()? {
            if !entry.approot.is_dir() {
                warn!(project = %name, approot = %entry.approot.display(), "project directory is missing; skipping");
                continue;
            }
            let result = Project::load(&entry.approot, true, global.clone()).and_then(|project| {
                self.run_op(&project, "poweroff", || self.stop_containers(&project, false, false))
            });
            match result {
                Ok(()) => report.stopped.push(name),
                Err(e) => {
                    error!(project = %name, error = %e, "failed to stop project");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        for c in self.docker.list_containers(LABEL_SITE_NAME)? {
            warn!(container = %c.names, "removing leftover project container");
            if let Err(e) = self.docker.remove_container(&c.names) {
                error!(container = %c.names, error = %e, "failed to remove container");
            }
        }
        if let Err(e) = self.mutagen().stop_daemon() {
            warn!(error = %e, "failed to stop the mutagen daemon");
        }
        self.remove_ssh_agent()?;
        if self.docker.inspect_state(ROUTER_CONTAINER)?.is_some() {
            self.remove_router()?;
        }
        self.docker.remove_network(GLOBAL_NETWORK)?;
        info!(stopped = report.stopped.len(), failed = report.failed.len(), "power off complete");
        Ok(report)
    }

    /// Name, status, URLs, database and per-service state.
    pub fn describe(&self, project: &Project) -> Result<Description, BerthError> {
        let status = self.status(project)?;
        let mut services = BTreeMap::new();
        if let Some(doc) = load_compose_full(project)? {
            for svc in doc.service_names() {
                let container = doc.container_name(&svc);
                let state = self.docker.inspect_state(&container)?;
                let host_ports = match &state {
                    Some(s) if s.running => self
                        .docker
                        .exposed_host_ports(&container)?
                        .into_iter()
                        .map(|(c, h)| format!("{c}->{h}"))
                        .collect(),
                    _ => Vec::new(),
                };
                let x = doc.x_project.get(&svc);
                services.insert(
                    svc.clone(),
                    ServiceDescription {
                        status: state_label(state.as_ref()),
                        container,
                        shell: x.map_or_else(|| "sh".to_string(), |x| x.shell.clone()),
                        host_ports,
                        describe_url_port: x.and_then(|x| x.describe_url_port.clone()),
                        describe_info: x.and_then(|x| x.describe_info.clone()),
                    },
                );
            }
        }
        Ok(Description {
            name: project.name().to_string(),
            approot: project.approot.clone(),
            app_type: project.config.app_type.clone(),
            docroot: project.config.docroot.clone(),
            status,
            primary_url: project.primary_url(None),
            urls: project.all_urls(),
            database: project.database().to_string(),
            router: self.router_state()?,
            services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netutil::StaticPortProbe;
    use crate::testutil::{RUNNING_HEALTHY, canonical_compose, configured_project, fake_engine, ps_line, script_start};
    use berth_config::Task;
    use berth_runner::ProcessOutput;
    use berth_utils::ErrorKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_aggregate_status() {
        let running: ContainerState = serde_json::from_str(RUNNING_HEALTHY).unwrap();
        let paused = ContainerState {
            paused: true,
            ..running.clone()
        };
        assert_eq!(aggregate_status(&[None, None]), SiteStatus::Stopped);
        assert_eq!(aggregate_status(&[Some(running.clone()), Some(running.clone())]), SiteStatus::Running);
        assert_eq!(aggregate_status(&[Some(running.clone()), None]), SiteStatus::Stopped);
        assert_eq!(aggregate_status(&[Some(running), Some(paused)]), SiteStatus::Paused);
        assert_eq!(SiteStatus::DirMissing.to_string(), "dir-missing");
    }

    #[test]
    fn test_status_of_missing_dir_and_config() {
        let (_fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let project = crate::testutil::project_at(root.path(), "alpha");
        assert_eq!(engine.status(&project).unwrap(), SiteStatus::ConfigMissing);
        let gone = crate::testutil::project_at(&root.path().join("gone"), "alpha");
        assert_eq!(engine.status(&gone).unwrap(), SiteStatus::DirMissing);
        assert_eq!(
            engine.status_by_name("nobody", &GlobalConfig::default()).unwrap(),
            SiteStatus::NotFound
        );
    }

    #[test]
    fn test_start_runs_full_sequence() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let mut project = configured_project(root.path(), "alpha");
        project.config.hooks.insert("post-start".into(), vec![Task::exec("echo ready")]);
        script_start(&fake, "alpha");
        fake.on(&["ps", "-a"], ProcessOutput::ok(ps_line("alpha", root.path(), "running")));

        engine.start(&project).unwrap();

        let cmds = fake.commands();
        let pos = |needle: &str| cmds.iter().position(|c| c.contains(needle)).unwrap();
        assert!(pos("network") < pos("up -d --build"));
        assert!(pos(" config") < pos("up -d --build"));
        assert!(pos("up -d --build") < pos("-p ddev-router"));
        assert!(pos("-p ddev-router") < pos("echo ready"));
        assert!(project.config_file(FULL_FILE).is_file());
        assert!(engine.registry().get("alpha").unwrap().is_some());
    }

    #[test]
    fn test_explicit_port_conflict_blocks_second_start() {
        let (fake, engine, _home) = fake_engine();
        let r1 = TempDir::new().unwrap();
        let r2 = TempDir::new().unwrap();
        let mut p1 = configured_project(r1.path(), "p1");
        let mut p2 = configured_project(r2.path(), "p2");
        p1.config.router_http_port = Some(80);
        p2.config.router_http_port = Some(80);
        script_start(&fake, "p1");

        engine.start(&p1).unwrap();
        fake.clear_calls();
        let err = engine.start(&p2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortInUse);
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_unhealthy_container_fails_start() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let project = configured_project(root.path(), "alpha");
        script_start(&fake, "alpha");
        fake.on(
            &["inspect", "ddev-alpha-db"],
            ProcessOutput::ok(
                r#"{"Status":"running","Running":true,"Health":{"Status":"unhealthy","Log":[{"Output":"mysqld is down"}]}}"#,
            ),
        );
        let mut project = project;
        project.config.default_container_timeout = 0;
        let err = engine.start(&project).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerUnhealthy);
        assert!(err.to_string().contains("mysqld is down"));
    }

    #[test]
    fn test_probe_mismatch_is_config_invalid() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let project = configured_project(root.path(), "alpha");
        script_start(&fake, "alpha");
        fake.on(&["run", "--rm", "busybox"], ProcessOutput::ok("mysql_8.0\n"));
        let err = engine.start(&project).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert!(!fake.was_run(&["up -d --build"]));
    }

    #[test]
    fn test_inherited_busy_port_gets_ephemeral_port() {
        let (fake, engine, _home) = fake_engine();
        let engine = engine.with_port_probe(Arc::new(StaticPortProbe::busy(&[80, 50080])));
        fake.fail(&["inspect", ROUTER_CONTAINER], 1, "No such object");
        let root = TempDir::new().unwrap();
        let project = configured_project(root.path(), "alpha");
        let effective = engine.with_ephemeral_router_ports(&project).unwrap();
        assert_eq!(effective.router_http_port(), 50081);
        assert_eq!(effective.router_https_port(), 443);
        assert!(effective.reserved_ports().is_empty());

        let mut pinned = project;
        pinned.config.router_http_port = Some(80);
        assert_eq!(engine.with_ephemeral_router_ports(&pinned).unwrap().router_http_port(), 80);
    }

    #[test]
    fn test_post_start_hook_failure_leaves_containers_running() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let mut project = configured_project(root.path(), "alpha");
        project.config.fail_on_hook_fail = true;
        project.config.hooks.insert("post-start".into(), vec![Task::exec("false")]);
        script_start(&fake, "alpha");
        fake.fail(&["bash", "-c", "false"], 1, "boom");

        let err = engine.start(&project).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HookFailed);
        assert!(!fake.was_run(&["stop"]));
        assert!(!fake.was_run(&["down"]));
    }

    #[test]
    fn test_stop_remove_data_drops_volumes_and_entry() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let project = configured_project(root.path(), "alpha");
        script_start(&fake, "alpha");
        engine.start(&project).unwrap();

        fake.clear_calls();
        engine.stop(&project, true, false).unwrap();
        assert!(fake.was_run(&["compose", "-p", "ddev-alpha", "down -v"]));
        assert!(fake.was_run(&["volume", "rm", "-f", "alpha-mariadb"]));
        assert!(engine.registry().get("alpha").unwrap().is_none());
    }

    #[test]
    fn test_stop_withdraws_routes_and_idle_router() {
        let (fake, engine, home) = fake_engine();
        let root = TempDir::new().unwrap();
        let project = configured_project(root.path(), "alpha");
        script_start(&fake, "alpha");
        fake.on(&["ps", "-a"], ProcessOutput::ok(ps_line("alpha", root.path(), "running")));
        engine.start(&project).unwrap();
        let volume = home.path().join("router-volume");
        assert!(volume.join("config/alpha.yaml").is_file());

        fake.on(&["ps", "-a"], ProcessOutput::ok(ps_line("alpha", root.path(), "exited")));
        engine.stop(&project, false, false).unwrap();
        assert!(fake.was_run(&["compose", "-p", "ddev-alpha", "stop"]));
        let left = crate::router::publish::staged_files(&volume).unwrap();
        assert!(left.iter().all(|f| !f.contains("alpha")), "{left:?}");
        assert!(fake.was_run(&["rm", "-f", ROUTER_CONTAINER]));
    }

    #[test]
    fn test_poweroff_continues_past_failures() {
        let (fake, engine, _home) = fake_engine();
        let good = TempDir::new().unwrap();
        let bad = TempDir::new().unwrap();
        for (root, name) in [(&good, "good"), (&bad, "bad")] {
            let p = configured_project(root.path(), name);
            std::fs::write(p.config_file(FULL_FILE), canonical_compose(name)).unwrap();
            engine.registry().reserve(name, root.path(), &[]).unwrap();
        }
        fake.fail(&["compose", "-p", "ddev-bad", "stop"], 1, "engine exploded");

        let report = engine.poweroff(&GlobalConfig::default()).unwrap();
        assert_eq!(report.stopped, vec!["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
        assert!(fake.was_run(&["network", "rm", GLOBAL_NETWORK]));
    }

    #[test]
    fn test_describe_reports_services() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let project = configured_project(root.path(), "alpha");
        std::fs::write(project.config_file(FULL_FILE), canonical_compose("alpha")).unwrap();
        fake.on(&["inspect"], ProcessOutput::ok(RUNNING_HEALTHY));
        fake.on(&["port", "ddev-alpha-db"], ProcessOutput::ok("3306/tcp -> 127.0.0.1:32768\n"));

        let d = engine.describe(&project).unwrap();
        assert_eq!(d.status, SiteStatus::Running);
        assert_eq!(d.primary_url, "http://alpha.ddev.site");
        assert_eq!(d.services["db"].host_ports, vec!["3306->32768"]);
        assert_eq!(d.services["web"].status, "running (healthy)");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["status"], "running");
    }
}
