//! The shared edge router.
//!
//! One `ddev-router` container terminates TLS and forwards requests to the
//! running projects by hostname and host port. [`Engine::refresh_router`]
//! re-derives the routing table from every running project, rebuilds the
//! staging tree and publishes it, starting the router when any route exists.
//!
//! Per-project sources live in `<approot>/.project-config/traefik` and the
//! global ones in `<global>/traefik`; both follow the signature policy, so a
//! user can pin any fragment or certificate by removing its signature line.

pub mod certs;
pub mod publish;
pub mod routing;
pub mod traefik;

pub use publish::{DirRouterStore, RouterStore, VolumeRouterStore};
pub use routing::{RoutingEntry, RunningProject, Upstream};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use berth_config::GlobalConfig;
use berth_config::project::ROUTER_CONTAINER;
use berth_lock::FileLock;
use berth_utils::atomic_write::write_file_atomic;
use berth_utils::error::{BerthError, ComposeError, PortError};
use berth_utils::paths;
use berth_utils::signature::{with_signature, write_if_owned};

use crate::compose::IMAGE_TAG;
use crate::docker::{BUILD_TIMEOUT, ENGINE_TIMEOUT, GLOBAL_CACHE_VOLUME, GLOBAL_NETWORK, LABEL_PLATFORM, PLATFORM};
use crate::engine::Engine;
use certs::{CertOutcome, DEFAULT_CERT_BASE, pair_names};
use routing::{derive_routes, router_ports, skipped_container_port};

pub const ROUTER_IMAGE: &str = "ddev/ddev-traefik-router";
pub const ROUTER_COMPOSE_FILE: &str = ".router-compose.yaml";
pub const ROUTER_COMPOSE_FULL_FILE: &str = ".router-compose-full.yaml";

const ROUTER_WAIT: Duration = Duration::from_secs(60);
const ROUTER_WAIT_ACME: Duration = Duration::from_secs(180);
const STAGING_LOCK_WAIT: Duration = Duration::from_secs(30);

/// Observable router state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RouterState {
    Absent,
    Starting,
    Healthy,
    Unhealthy,
}

/// Routes of every running project and the host ports they need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    pub routes: BTreeMap<String, Vec<RoutingEntry>>,
    pub ports: Vec<u16>,
}

impl RoutingTable {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.values().all(Vec::is_empty)
    }

    /// Every entry across projects.
    pub fn entries(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.routes.values().flatten()
    }
}

/// `<global>/traefik`, the signature-respecting source of global router files.
#[must_use]
pub fn global_source_dir() -> PathBuf {
    paths::global_dir().join("traefik")
}

/// `<approot>/.project-config/traefik`
#[must_use]
pub fn project_source_dir(approot: &Path) -> PathBuf {
    paths::project_config_dir(approot).join("traefik")
}

fn ensure_dirs(dirs: &[&Path]) -> Result<(), BerthError> {
    for d in dirs {
        paths::ensure_dir_all(d)?;
    }
    Ok(())
}

fn copy_files(src: &Path, dest: &Path) -> Result<(), BerthError> {
    if !src.is_dir() {
        return Ok(());
    }
    paths::ensure_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        if entry.path().is_file() {
            std::fs::copy(entry.path(), dest.join(entry.file_name()))?;
        }
    }
    Ok(())
}

fn copy_pair(src_dir: &Path, base: &str, dest: &Path) -> Result<bool, BerthError> {
    let (crt, key) = pair_names(base);
    if !(src_dir.join(&crt).is_file() && src_dir.join(&key).is_file()) {
        return Ok(false);
    }
    for f in [crt, key] {
        std::fs::copy(src_dir.join(&f), dest.join(&f))?;
    }
    Ok(true)
}

impl Engine {
    /// Current state of the router container.
    pub fn router_state(&self) -> Result<RouterState, BerthError> {
        let Some(state) = self.docker.inspect_state(ROUTER_CONTAINER)? else {
            return Ok(RouterState::Absent);
        };
        Ok(if state.is_ready() {
            RouterState::Healthy
        } else if state.running && state.health_status() == Some("starting") {
            RouterState::Starting
        } else {
            RouterState::Unhealthy
        })
    }

    /// Routing table over every running project.
    pub fn routing_table(&self, global: &GlobalConfig) -> Result<(RoutingTable, Vec<RunningProject>), BerthError> {
        let skip = skipped_container_port(global);
        let running = self.running_projects()?;
        let mut table = RoutingTable::default();
        let mut extra = Vec::new();
        for p in &running {
            table.routes.insert(p.name.clone(), derive_routes(&p.doc, skip));
            extra.extend(p.router_ports());
        }
        table.ports = router_ports(table.entries(), &extra);
        Ok((table, running))
    }

    /// Regenerate the global sources: default cert pair, default fragment
    /// and static configuration.
    fn write_global_sources(&self, global: &GlobalConfig, ports: &[u16]) -> Result<(), BerthError> {
        let src = global_source_dir();
        let (certs_dir, config_dir) = (src.join("certs"), src.join("config"));
        ensure_dirs(&[&certs_dir, &config_dir])?;
        certs::ensure_pair(
            self.docker.runner().as_ref(),
            global,
            &certs_dir,
            DEFAULT_CERT_BASE,
            &global.project_tld,
            &[],
        )?;
        write_if_owned(config_dir.join("default_config.yaml"), &traefik::render_default_config()?)?;
        write_if_owned(src.join("static_config.yaml"), &traefik::render_static_config(ports, global)?)?;
        Ok(())
    }

    /// Regenerate one running project's fragment and cert pair.
    fn write_project_sources(
        &self,
        project: &RunningProject,
        routes: &[RoutingEntry],
        global: &GlobalConfig,
    ) -> Result<(), BerthError> {
        let src = project_source_dir(&project.approot);
        let (certs_dir, config_dir) = (src.join("certs"), src.join("config"));
        ensure_dirs(&[&certs_dir, &config_dir])?;

        let hostnames: BTreeSet<String> = routes.iter().flat_map(|r| r.hostnames.iter().cloned()).collect();
        let hostnames: Vec<String> = hostnames.into_iter().collect();
        let outcome = certs::ensure_pair(
            self.docker.runner().as_ref(),
            global,
            &certs_dir,
            &project.name,
            &project.project_tld(global),
            &hostnames,
        )?;
        let (crt, key) = pair_names(&project.name);
        let has_cert = outcome != CertOutcome::Skipped || (certs_dir.join(crt).is_file() && certs_dir.join(key).is_file());

        let yaml = traefik::render_project_config(
            &project.name,
            routes,
            |svc| project.doc.container_name(svc),
            global,
            has_cert,
        )?;
        write_if_owned(config_dir.join(format!("{}.yaml", project.name)), &yaml)?;
        Ok(())
    }

    /// Rebuild `<global>/router` from scratch.
    fn stage(&self, table: &RoutingTable, running: &[RunningProject], global: &GlobalConfig) -> Result<PathBuf, BerthError> {
        self.write_global_sources(global, &table.ports)?;
        for p in running {
            let routes = table.routes.get(&p.name).map(Vec::as_slice).unwrap_or_default();
            self.write_project_sources(p, routes, global)?;
        }

        let staging = paths::router_dir();
        match std::fs::remove_dir_all(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let (certs_dir, config_dir) = (staging.join("certs"), staging.join("config"));
        ensure_dirs(&[&certs_dir, &config_dir])?;

        let src = global_source_dir();
        std::fs::copy(src.join("static_config.yaml"), staging.join("static_config.yaml"))?;
        copy_pair(&src.join("certs"), DEFAULT_CERT_BASE, &certs_dir)?;
        copy_files(&src.join("config"), &config_dir)?;
        copy_files(&paths::router_custom_config_dir(), &config_dir)?;

        for p in running {
            let psrc = project_source_dir(&p.approot);
            copy_pair(&psrc.join("certs"), &p.name, &certs_dir)?;
            let fragment = psrc.join("config").join(format!("{}.yaml", p.name));
            if fragment.is_file() {
                std::fs::copy(&fragment, config_dir.join(format!("{}.yaml", p.name)))?;
            }
        }
        Ok(staging)
    }

    /// Re-derive, stage and publish the router configuration, starting the
    /// router when there is anything to route.
    ///
    /// Serialized within the process by a mutex and across processes by a
    /// file lock on the staging directory.
    pub fn refresh_router(&self, global: &GlobalConfig) -> Result<RoutingTable, BerthError> {
        let _guard = publish::publish_guard();
        let _lock = FileLock::acquire(
            &paths::global_dir().join("router.lock"),
            "router-staging",
            STAGING_LOCK_WAIT,
        )?;

        let (table, running) = self.routing_table(global)?;
        let staging = self.stage(&table, &running, global)?;
        publish::publish(self.router_store().as_ref(), &staging)?;
        if !table.is_empty() {
            self.start_router(global, &table.ports)?;
        }
        info!(
            projects = table.routes.len(),
            ports = ?table.ports,
            "router configuration refreshed"
        );
        Ok(table)
    }

    fn render_router_compose(&self, global: &GlobalConfig, ports: &[u16]) -> String {
        let ip = global.router_bind_ip();
        let mut yaml = format!(
            "name: {ROUTER_CONTAINER}\nservices:\n  {ROUTER_CONTAINER}:\n    \
             image: {ROUTER_IMAGE}:{IMAGE_TAG}\n    \
             container_name: {ROUTER_CONTAINER}\n    \
             restart: \"no\"\n    \
             user: \"{uid}:{gid}\"\n    \
             labels:\n      {LABEL_PLATFORM}: {PLATFORM}\n    \
             command: --configFile={root}/static_config.yaml\n    \
             volumes:\n      - {GLOBAL_CACHE_VOLUME}:/mnt/ddev-global-cache\n    \
             healthcheck:\n      \
               test: [\"CMD\", \"traefik\", \"healthcheck\", \"--ping\", \"--configFile={root}/static_config.yaml\"]\n      \
               interval: 1s\n      retries: 120\n      start_period: 10s\n      timeout: 120s\n    \
             ports:\n",
            uid = self.user.uid,
            gid = self.user.gid,
            root = traefik::TRAEFIK_ROOT,
        );
        for p in ports {
            yaml.push_str(&format!("      - \"{ip}:{p}:{p}\"\n"));
        }
        yaml.push_str(&format!(
            "networks:\n  default:\n    name: {GLOBAL_NETWORK}\n    external: true\n\
             volumes:\n  {GLOBAL_CACHE_VOLUME}:\n    name: {GLOBAL_CACHE_VOLUME}\n    external: true\n"
        ));
        with_signature(&yaml)
    }

    /// Write the router's base and canonical compose files; returns the
    /// canonical path.
    fn write_router_compose(&self, global: &GlobalConfig, ports: &[u16]) -> Result<PathBuf, BerthError> {
        let dir = paths::global_dir();
        paths::ensure_dir_all(&dir)?;
        let base = dir.join(ROUTER_COMPOSE_FILE);
        write_if_owned(&base, &self.render_router_compose(global, ports))?;

        let mut overlays: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("router-compose.") && n.ends_with(".yaml"))
            })
            .collect();
        overlays.sort();
        let mut files = vec![base];
        files.extend(overlays);

        let spec = self.docker.compose(ROUTER_CONTAINER, &files).arg("config").cwd(&dir);
        let out = self.docker.try_capture(&spec, ENGINE_TIMEOUT)?;
        if !out.success() {
            return Err(ComposeError::Invalid {
                stderr: out.stderr_string().trim().to_string(),
            }
            .into());
        }
        let full = dir.join(ROUTER_COMPOSE_FULL_FILE);
        write_file_atomic(&full, &with_signature(&out.stdout_string()))?;
        Ok(full)
    }

    /// Host ports among `ports` that are busy with something other than the router.
    pub fn busy_router_ports(&self, ports: &[u16]) -> Result<Vec<u16>, BerthError> {
        let held: BTreeSet<u16> = if self.docker.inspect_state(ROUTER_CONTAINER)?.is_some() {
            self.docker
                .exposed_host_ports(ROUTER_CONTAINER)?
                .into_iter()
                .map(|(_, host)| host)
                .collect()
        } else {
            BTreeSet::new()
        };
        Ok(ports
            .iter()
            .copied()
            .filter(|p| !held.contains(p) && self.ports.is_active(*p))
            .collect())
    }

    /// Bring the router up bound to `ports` and wait until it is healthy.
    pub fn start_router(&self, global: &GlobalConfig, ports: &[u16]) -> Result<(), BerthError> {
        if let Some(state) = self.docker.inspect_state(ROUTER_CONTAINER)? {
            if !state.running {
                debug!("removing stopped router before restart");
                self.docker.remove_container(ROUTER_CONTAINER)?;
            }
        }
        self.docker.ensure_network(GLOBAL_NETWORK)?;
        self.docker.create_volume(GLOBAL_CACHE_VOLUME)?;
        let full = self.write_router_compose(global, ports)?;

        if let Some(port) = self.busy_router_ports(ports)?.first() {
            return Err(PortError::Busy { port: *port }.into());
        }

        let up = self
            .docker
            .compose(ROUTER_CONTAINER, &[full])
            .args(["up", "--build", "-d"]);
        self.docker.stream(&up, BUILD_TIMEOUT)?;

        let wait = if global.use_letsencrypt {
            ROUTER_WAIT_ACME
        } else {
            ROUTER_WAIT
        };
        self.docker
            .wait_healthy(&[ROUTER_CONTAINER.to_string()], wait, self.poll_interval)?;
        debug!(ports = ?ports, "router is healthy");
        Ok(())
    }

    /// Remove the router when no project container is running.
    pub fn stop_router_if_idle(&self) -> Result<bool, BerthError> {
        let any_running = self
            .docker
            .list_containers(crate::docker::LABEL_SITE_NAME)?
            .iter()
            .any(|c| c.is_running());
        if any_running {
            return Ok(false);
        }
        if self.docker.inspect_state(ROUTER_CONTAINER)?.is_none() {
            return Ok(false);
        }
        info!("stopping router because no project containers are running");
        self.docker.remove_container(ROUTER_CONTAINER)?;
        Ok(true)
    }

    pub fn remove_router(&self) -> Result<(), BerthError> {
        if let Err(e) = self.docker.remove_container(ROUTER_CONTAINER) {
            warn!(error = %e, "failed to remove router");
            return Err(e);
        }
        Ok(())
    }
}
