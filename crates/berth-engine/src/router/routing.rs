//! Routing-table derivation.
//!
//! Routes come from the `VIRTUAL_HOST`, `HTTP_EXPOSE` and `HTTPS_EXPOSE`
//! environment of every service in the canonical compose documents of the
//! running projects. An expose pair is `host:container` or a bare `port`
//! meaning `port:port`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, warn};

use berth_config::GlobalConfig;
use berth_utils::error::BerthError;
use berth_utils::paths;

use crate::compose::{ComposeDocument, FULL_FILE, load_compose_full_at};
use crate::docker::{LABEL_APPROOT, LABEL_SITE_NAME};
use crate::engine::Engine;

static EXPOSE_PAIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(:\d+)?$").unwrap());

/// Where the router forwards a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upstream {
    /// `<service>-<container-port>`
    pub name: String,
    pub service: String,
    pub port: u16,
}

/// One `{hostnames, host port, upstream, https}` route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingEntry {
    pub hostnames: Vec<String>,
    pub external_port: u16,
    pub service: Upstream,
    pub https: bool,
}

/// Container port never routed in hardened or ACME mode.
#[must_use]
pub fn skipped_container_port(global: &GlobalConfig) -> Option<u16> {
    (global.use_hardened_images || global.use_letsencrypt).then_some(global.mailpit_container_port)
}

fn parse_pair(pair: &str) -> Option<(u16, u16)> {
    if !EXPOSE_PAIR.is_match(pair) {
        return None;
    }
    match pair.split_once(':') {
        Some((host, container)) => Some((host.parse().ok()?, container.parse().ok()?)),
        None => {
            let port = pair.parse().ok()?;
            Some((port, port))
        }
    }
}

/// Routes declared by the services of one compose document.
#[must_use]
pub fn derive_routes(doc: &ComposeDocument, skip_container_port: Option<u16>) -> Vec<RoutingEntry> {
    let mut table = Vec::new();
    for service in doc.service_names() {
        let env = doc.service_env(&service);
        let hostnames: Vec<String> = env
            .get("VIRTUAL_HOST")
            .map(|h| {
                h.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if hostnames.is_empty() {
            continue;
        }
        for (var, https) in [("HTTP_EXPOSE", false), ("HTTPS_EXPOSE", true)] {
            let Some(value) = env.get(var) else {
                continue;
            };
            for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((host, container)) = parse_pair(pair) else {
                    warn!(service = %service, pair, var, "skipping malformed expose pair");
                    continue;
                };
                if skip_container_port == Some(container) {
                    debug!(service = %service, port = container, "not routing mail catcher");
                    continue;
                }
                table.push(RoutingEntry {
                    hostnames: hostnames.clone(),
                    external_port: host,
                    service: Upstream {
                        name: format!("{service}-{container}"),
                        service: service.clone(),
                        port: container,
                    },
                    https,
                });
            }
        }
    }
    table
}

/// Host ports the router must bind: every routed port plus `extra`, ascending.
#[must_use]
pub fn router_ports<'a>(entries: impl IntoIterator<Item = &'a RoutingEntry>, extra: &[u16]) -> Vec<u16> {
    let ports: BTreeSet<u16> = entries
        .into_iter()
        .map(|e| e.external_port)
        .chain(extra.iter().copied())
        .collect();
    ports.into_iter().collect()
}

/// A project with running containers and its canonical compose document.
#[derive(Debug, Clone)]
pub struct RunningProject {
    pub name: String,
    pub approot: PathBuf,
    pub doc: ComposeDocument,
}

impl RunningProject {
    /// Router ports the project was started with.
    #[must_use]
    pub fn router_ports(&self) -> Vec<u16> {
        let env = self.doc.service_env("web");
        ["DDEV_ROUTER_HTTP_PORT", "DDEV_ROUTER_HTTPS_PORT"]
            .iter()
            .filter_map(|k| env.get(*k)?.parse().ok())
            .collect()
    }

    /// TLD the project was started with, falling back to the global one.
    #[must_use]
    pub fn project_tld(&self, global: &GlobalConfig) -> String {
        self.doc
            .service_env("web")
            .remove("DDEV_TLD")
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| global.project_tld.clone())
    }
}

impl Engine {
    /// Every project with at least one running container, by name.
    pub fn running_projects(&self) -> Result<Vec<RunningProject>, BerthError> {
        let mut roots = BTreeMap::new();
        for c in self.docker.list_containers(LABEL_SITE_NAME)? {
            if !c.is_running() {
                continue;
            }
            let (Some(name), Some(approot)) = (c.label(LABEL_SITE_NAME), c.label(LABEL_APPROOT)) else {
                continue;
            };
            roots
                .entry(name.to_string())
                .or_insert_with(|| PathBuf::from(approot));
        }

        let mut running = Vec::with_capacity(roots.len());
        for (name, approot) in roots {
            let path = paths::project_config_dir(&approot).join(FULL_FILE);
            match load_compose_full_at(&path)? {
                Some(doc) => running.push(RunningProject { name, approot, doc }),
                None => warn!(project = %name, path = %path.display(), "running project has no compose manifest"),
            }
        }
        Ok(running)
    }
}
