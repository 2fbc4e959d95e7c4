//! Compose manifest synthesis.
//!
//! A project's containers are described by two generated files in its config
//! directory:
//!
//! - `.compose-base.yaml`, rendered from the [`Project`] and signed so users can
//!   take it over by removing the signature line;
//! - `.compose-full.yaml`, the engine's `config` rendering of the base file plus
//!   every `compose*.yaml` overlay, post-processed so that all services can be
//!   reached by the router.
//!
//! Overlay merging is left to the engine. Only the canonical output is
//! interpreted here.

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use berth_config::{DbEngine, Project};
use berth_config::project::SSH_AGENT_CONTAINER;
use berth_utils::error::{BerthError, ComposeError};
use berth_utils::paths;
use berth_utils::signature::{WriteOutcome, with_signature, write_if_owned};

use crate::docker::{
    Docker, ENGINE_TIMEOUT, GLOBAL_CACHE_VOLUME, GLOBAL_NETWORK, LABEL_APPROOT, LABEL_PLATFORM,
    LABEL_SITE_NAME, PLATFORM,
};
use crate::hostuser::HostUser;

pub const BASE_FILE: &str = ".compose-base.yaml";
pub const FULL_FILE: &str = ".compose-full.yaml";
pub const OVERRIDE_FILE: &str = "compose.override.yaml";

pub const IMAGE_TAG: &str = "v1.24.6";
pub const WEB_IMAGE: &str = "ddev/ddev-webserver";
pub const WEB_IMAGE_HARDENED: &str = "ddev/ddev-webserver-prod";

/// Project root as seen from inside the web container.
pub const CONTAINER_APPROOT: &str = "/var/www/html";

/// Socket volume published by the shared SSH agent.
pub const SSH_AGENT_VOLUME: &str = "ddev-ssh-agent_socket_dir";

/// Knobs that change the rendering for one start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Replaces the db service's main process, used by snapshot restore.
    pub db_command: Option<String>,
}

/// Introspection fields a service declares under `x-project`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XProject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub describe_url_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub describe_info: Option<String>,
    pub shell: String,
}

/// Canonical compose document plus the `x-project` view of its services.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeDocument {
    pub raw: Value,
    pub x_project: BTreeMap<String, XProject>,
}

impl ComposeDocument {
    pub fn from_value(raw: Value) -> Result<Self, ComposeError> {
        if !raw.get("services").is_some_and(Value::is_mapping) {
            return Err(ComposeError::Malformed {
                reason: "document has no services mapping".to_string(),
            });
        }
        let mut doc = Self {
            raw,
            x_project: BTreeMap::new(),
        };
        doc.x_project = doc
            .service_names()
            .into_iter()
            .map(|name| {
                let x = doc.service(&name).and_then(|s| s.get("x-project"));
                let field = |key: &str| {
                    x.and_then(|x| x.get(key))
                        .and_then(scalar_string)
                        .filter(|s| !s.is_empty())
                };
                let default_shell = if name == "web" || name == "db" { "bash" } else { "sh" };
                let info = XProject {
                    describe_url_port: field("describe-url-port"),
                    describe_info: field("describe-info"),
                    shell: field("shell").unwrap_or_else(|| default_shell.to_string()),
                };
                (name, info)
            })
            .collect();
        Ok(doc)
    }

    pub fn parse(yaml: &str) -> Result<Self, ComposeError> {
        let raw: Value = serde_yaml::from_str(yaml).map_err(|e| ComposeError::Malformed {
            reason: e.to_string(),
        })?;
        Self::from_value(raw)
    }

    /// Service names, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .raw
            .get("services")
            .and_then(Value::as_mapping)
            .map(|m| m.keys().filter_map(scalar_string).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Value> {
        self.raw.get("services")?.get(name)
    }

    /// Environment of `service`, from either the mapping or the list form.
    #[must_use]
    pub fn service_env(&self, service: &str) -> BTreeMap<String, String> {
        let Some(env) = self.service(service).and_then(|s| s.get("environment")) else {
            return BTreeMap::new();
        };
        match env {
            Value::Mapping(m) => m
                .iter()
                .filter_map(|(k, v)| {
                    Some((scalar_string(k)?, scalar_string(v).unwrap_or_default()))
                })
                .collect(),
            Value::Sequence(items) => items
                .iter()
                .filter_map(scalar_string)
                .map(|kv| match kv.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (kv, String::new()),
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Container name of `service`, explicit or as compose would assign it.
    #[must_use]
    pub fn container_name(&self, service: &str) -> String {
        if let Some(name) = self
            .service(service)
            .and_then(|s| s.get("container_name"))
            .and_then(scalar_string)
        {
            return name;
        }
        let project = self.raw.get("name").and_then(scalar_string).unwrap_or_default();
        format!("{project}-{service}-1")
    }

    /// Container names of every service.
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        self.service_names()
            .iter()
            .map(|s| self.container_name(s))
            .collect()
    }

    pub fn to_yaml(&self) -> Result<String, ComposeError> {
        serde_yaml::to_string(&self.raw).map_err(|e| ComposeError::Malformed {
            reason: e.to_string(),
        })
    }
}

pub(crate) fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Base rendering
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ComposeFile {
    name: String,
    services: BTreeMap<String, Service>,
    networks: BTreeMap<String, NetworkDecl>,
    volumes: BTreeMap<String, VolumeDecl>,
}

#[derive(Debug, Serialize)]
struct Service {
    container_name: String,
    build: Build,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<String>,
    restart: &'static str,
    environment: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    volumes: Vec<Mount>,
    ports: Vec<PortMapping>,
    healthcheck: Healthcheck,
    networks: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct Build {
    context: String,
    args: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Mount {
    #[serde(rename = "type")]
    kind: &'static str,
    source: String,
    target: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    read_only: bool,
}

impl Mount {
    fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: "bind",
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    fn volume(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: "volume",
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Debug, Serialize)]
struct PortMapping {
    target: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    published: Option<String>,
    host_ip: String,
    protocol: &'static str,
}

impl PortMapping {
    fn new(target: u16, published: Option<u16>, host_ip: &str) -> Self {
        Self {
            target,
            published: published.map(|p| p.to_string()),
            host_ip: host_ip.to_string(),
            protocol: "tcp",
        }
    }
}

#[derive(Debug, Serialize)]
struct Healthcheck {
    test: Vec<String>,
    interval: &'static str,
    retries: u32,
    start_period: String,
    timeout: &'static str,
}

impl Healthcheck {
    fn shell(command: &str, project: &Project) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), command.to_string()],
            interval: "1s",
            retries: 120,
            start_period: format!("{}s", project.config.default_container_timeout),
            timeout: "70s",
        }
    }
}

#[derive(Debug, Serialize)]
struct NetworkDecl {
    name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    external: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct VolumeDecl {
    name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    external: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    driver: Option<&'static str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    driver_opts: BTreeMap<String, String>,
}

impl VolumeDecl {
    fn external(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external: true,
            driver: None,
            driver_opts: BTreeMap::new(),
        }
    }
}

/// Host address ports are published on.
#[must_use]
pub fn bind_ip(project: &Project) -> &'static str {
    if project.config.bind_all_interfaces { "0.0.0.0" } else { "127.0.0.1" }
}

#[must_use]
pub fn web_image(project: &Project) -> String {
    let repo = if project.global.use_hardened_images { WEB_IMAGE_HARDENED } else { WEB_IMAGE };
    format!("{repo}:{IMAGE_TAG}")
}

#[must_use]
pub fn db_image(project: &Project) -> String {
    let db = project.database();
    match db.engine {
        DbEngine::Postgres => format!("postgres:{}", db.version),
        engine => format!("ddev/ddev-dbserver-{engine}-{}:{IMAGE_TAG}", db.version),
    }
}

/// Tag of the per-project image built on top of `base`.
#[must_use]
pub fn built_image(base: &str, project: &Project) -> String {
    format!("{base}-{}-built", project.name())
}

/// Data volume of the project's database.
#[must_use]
pub fn db_volume(project: &Project) -> String {
    match project.database().engine {
        DbEngine::Postgres => format!("{}-postgres", project.name()),
        _ => format!("{}-mariadb", project.name()),
    }
}

#[must_use]
pub fn snapshot_volume(project: &Project) -> String {
    format!("ddev-{}-snapshots", project.name())
}

#[must_use]
pub fn mutagen_volume(project: &Project) -> String {
    format!("{}_project_mutagen", project.name())
}

#[must_use]
pub fn nfs_volume(project: &Project) -> String {
    format!("ddev-{}_nfsmount", project.name())
}

#[must_use]
pub fn default_network_name(project: &Project) -> String {
    format!("{}_default", project.compose_project())
}

/// Postgres data directory; the image layout changed with major 18.
#[must_use]
pub fn postgres_data_dir(version: &str) -> &'static str {
    match version.split('.').next().and_then(|m| m.parse::<u32>().ok()) {
        Some(major) if major >= 18 => "/var/lib/postgresql",
        _ => "/var/lib/postgresql/data",
    }
}

/// Container-side mount point of the snapshot directory.
pub const SNAPSHOT_MOUNT: &str = "/mnt/snapshots";

fn labels(project: &Project) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_SITE_NAME.to_string(), project.name().to_string()),
        (LABEL_APPROOT.to_string(), project.approot.display().to_string()),
        (LABEL_PLATFORM.to_string(), PLATFORM.to_string()),
    ])
}

fn build_args(base: &str, user: &HostUser) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("BASE_IMAGE".to_string(), base.to_string()),
        ("username".to_string(), user.username.clone()),
        ("uid".to_string(), user.uid.to_string()),
        ("gid".to_string(), user.gid.to_string()),
    ])
}

fn expose_list(pairs: impl IntoIterator<Item = (u16, u16)>) -> String {
    pairs
        .into_iter()
        .map(|(host, container)| format!("{host}:{container}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Host upload dir and its in-container path, when the host dir exists.
fn upload_mount(project: &Project) -> Option<(PathBuf, String)> {
    let host = project.host_upload_dir()?;
    if !host.is_dir() {
        return None;
    }
    let rel: Vec<String> = host
        .strip_prefix(&project.approot)
        .ok()?
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let container = format!("{CONTAINER_APPROOT}/{}", rel.join("/"));
    Some((host, container))
}

fn web_service(project: &Project, user: &HostUser, volumes: &mut BTreeMap<String, VolumeDecl>) -> Service {
    let name = project.name();
    let base = web_image(project);
    let ip = bind_ip(project);
    let mailpit = project.global.mailpit_container_port;

    let mut env = BTreeMap::new();
    for (k, v) in [
        ("DDEV_SITENAME", name.to_string()),
        ("DDEV_PROJECT", name.to_string()),
        ("DDEV_PROJECT_TYPE", project.config.app_type.clone()),
        ("DDEV_DOCROOT", project.config.docroot.clone()),
        ("DDEV_PHP_VERSION", project.config.php_version.clone()),
        ("DDEV_WEBSERVER_TYPE", project.webserver_type().to_string()),
        ("DDEV_DATABASE", project.database().to_string()),
        ("DDEV_COMPOSER_VERSION", project.config.composer_version.clone()),
        ("DDEV_NODEJS_VERSION", project.config.nodejs_version.clone()),
        ("DDEV_HOSTNAME", project.hostnames().join(",")),
        ("DDEV_PRIMARY_URL", project.primary_url(None)),
        ("DDEV_TLD", project.project_tld().to_string()),
        ("DDEV_ROUTER_HTTP_PORT", project.router_http_port().to_string()),
        ("DDEV_ROUTER_HTTPS_PORT", project.router_https_port().to_string()),
        ("DDEV_MAILPIT_PORT", mailpit.to_string()),
        ("DDEV_USER", user.username.clone()),
        ("TZ", project.config.timezone.clone().unwrap_or_default()),
        ("VIRTUAL_HOST", project.hostnames().join(",")),
    ] {
        env.insert(k.to_string(), v);
    }
    let extras = &project.config.web_extra_exposed_ports;
    env.insert(
        "HTTP_EXPOSE".to_string(),
        expose_list(
            [(project.router_http_port(), 80), (project.mailpit_http_port(), mailpit)]
                .into_iter()
                .chain(extras.iter().map(|p| (p.http_port, p.container_port))),
        ),
    );
    env.insert(
        "HTTPS_EXPOSE".to_string(),
        expose_list(
            [(project.router_https_port(), 80), (project.mailpit_https_port(), mailpit)]
                .into_iter()
                .chain(extras.iter().map(|p| (p.https_port, p.container_port))),
        ),
    );
    for kv in project.web_environment() {
        match kv.split_once('=') {
            Some((k, v)) => env.insert(k.to_string(), v.to_string()),
            None => env.insert(kv, String::new()),
        };
    }

    let mut mounts = Vec::new();
    if project.is_mutagen_enabled() || project.no_bind_mounts() {
        let vol = mutagen_volume(project);
        mounts.push(Mount::volume(&vol, CONTAINER_APPROOT));
        volumes.insert(vol.clone(), VolumeDecl::external(vol));
    } else if project.is_nfs_enabled() {
        let vol = nfs_volume(project);
        mounts.push(Mount::volume(&vol, CONTAINER_APPROOT));
        volumes.insert(
            vol.clone(),
            VolumeDecl {
                name: vol,
                external: false,
                driver: Some("local"),
                driver_opts: BTreeMap::from([
                    ("type".to_string(), "nfs".to_string()),
                    ("o".to_string(), "addr=host.docker.internal,hard,nolock,rw".to_string()),
                    ("device".to_string(), format!(":{}", project.approot.display())),
                ]),
            },
        );
    } else {
        mounts.push(Mount::bind("../", CONTAINER_APPROOT));
    }
    if !project.no_bind_mounts() {
        mounts.push(Mount::bind("./", "/mnt/ddev_config").read_only());
        if project.has_git_dir() {
            mounts.push(Mount::bind("../.git", format!("{CONTAINER_APPROOT}/.git")));
        }
        if let Some((host, container)) = upload_mount(project) {
            mounts.push(Mount::bind(host.display().to_string(), container));
        }
    }
    mounts.push(Mount::volume(GLOBAL_CACHE_VOLUME, "/mnt/ddev-global-cache"));
    if !project.omits(SSH_AGENT_CONTAINER) {
        mounts.push(Mount::volume(SSH_AGENT_VOLUME, "/home/.ssh-agent"));
        volumes.insert(SSH_AGENT_VOLUME.to_string(), VolumeDecl::external(SSH_AGENT_VOLUME));
    }

    let ports = vec![
        PortMapping::new(80, project.config.host_webserver_port, ip),
        PortMapping::new(443, project.config.host_https_port, ip),
    ];

    Service {
        container_name: project.container_name("web"),
        build: Build {
            context: "./web-build".to_string(),
            args: build_args(&base, user),
        },
        image: built_image(&base, project),
        command: None,
        user: Some(user.uid_gid()),
        working_dir: Some(CONTAINER_APPROOT.to_string()),
        restart: "no",
        environment: env,
        labels: labels(project),
        volumes: mounts,
        ports,
        healthcheck: Healthcheck::shell("/healthcheck.sh", project),
        networks: vec![GLOBAL_NETWORK, "default"],
    }
}

fn db_service(
    project: &Project,
    user: &HostUser,
    opts: &ComposeOptions,
    volumes: &mut BTreeMap<String, VolumeDecl>,
) -> Service {
    let db = project.database();
    let base = db_image(project);
    let data = db_volume(project);
    volumes.insert(data.clone(), VolumeDecl::external(&data));

    let mut env = BTreeMap::from([
        ("DDEV_DATABASE".to_string(), db.to_string()),
        ("DDEV_SITENAME".to_string(), project.name().to_string()),
        ("TZ".to_string(), project.config.timezone.clone().unwrap_or_default()),
    ]);
    let (data_target, healthcheck, user_spec) = match db.engine {
        DbEngine::Postgres => {
            let dir = postgres_data_dir(&db.version);
            for (k, v) in [
                ("POSTGRES_USER", "db"),
                ("POSTGRES_PASSWORD", "db"),
                ("POSTGRES_DB", "db"),
                ("PGDATA", dir),
            ] {
                env.insert(k.to_string(), v.to_string());
            }
            (dir, Healthcheck::shell("pg_isready -q -U db", project), None)
        }
        _ => (
            "/var/lib/mysql",
            Healthcheck::shell("/healthcheck.sh", project),
            Some(user.uid_gid()),
        ),
    };

    let mut mounts = vec![Mount::volume(&data, data_target)];
    if project.no_bind_mounts() {
        let vol = snapshot_volume(project);
        mounts.push(Mount::volume(&vol, SNAPSHOT_MOUNT));
        volumes.insert(vol.clone(), VolumeDecl::external(vol));
    } else {
        mounts.push(Mount::bind("./db_snapshots", SNAPSHOT_MOUNT));
        mounts.push(Mount::bind("./", "/mnt/ddev_config").read_only());
    }
    mounts.push(Mount::volume(GLOBAL_CACHE_VOLUME, "/mnt/ddev-global-cache"));

    Service {
        container_name: project.container_name("db"),
        build: Build {
            context: "./db-build".to_string(),
            args: build_args(&base, user),
        },
        image: built_image(&base, project),
        command: opts.db_command.clone(),
        user: user_spec,
        working_dir: None,
        restart: "no",
        environment: env,
        labels: labels(project),
        volumes: mounts,
        ports: vec![PortMapping::new(
            db.engine.container_port(),
            project.config.host_db_port,
            bind_ip(project),
        )],
        healthcheck,
        networks: vec![GLOBAL_NETWORK, "default"],
    }
}

/// Render the signed base document.
pub fn render_base(project: &Project, user: &HostUser, opts: &ComposeOptions) -> Result<String, ComposeError> {
    let mut volumes = BTreeMap::from([(
        GLOBAL_CACHE_VOLUME.to_string(),
        VolumeDecl::external(GLOBAL_CACHE_VOLUME),
    )]);
    let mut services = BTreeMap::new();
    services.insert("web".to_string(), web_service(project, user, &mut volumes));
    if !project.omits("db") {
        services.insert("db".to_string(), db_service(project, user, opts, &mut volumes));
    }
    let networks = BTreeMap::from([
        (
            GLOBAL_NETWORK.to_string(),
            NetworkDecl {
                name: GLOBAL_NETWORK.to_string(),
                external: true,
                labels: BTreeMap::new(),
            },
        ),
        (
            "default".to_string(),
            NetworkDecl {
                name: default_network_name(project),
                external: false,
                labels: BTreeMap::from([(LABEL_PLATFORM.to_string(), PLATFORM.to_string())]),
            },
        ),
    ]);
    let file = ComposeFile {
        name: project.compose_project(),
        services,
        networks,
        volumes,
    };
    let yaml = serde_yaml::to_string(&file).map_err(|e| ComposeError::Malformed {
        reason: e.to_string(),
    })?;
    Ok(with_signature(&yaml))
}

// ---------------------------------------------------------------------------
// Build contexts
// ---------------------------------------------------------------------------

fn dockerfile(extra_packages: &[String], extra_tail: &str, supervisor: bool) -> String {
    let mut out = String::from(
        "ARG BASE_IMAGE\nFROM $BASE_IMAGE\n\
         ARG username\nARG uid\nARG gid\n\
         RUN (groupadd --gid $gid \"$username\" || groupadd \"$username\" || true) && \\\n    \
         (useradd -l -m -s /bin/bash --gid \"$username\" --comment '' --uid $uid \"$username\" || \\\n     \
         useradd -l -m -s /bin/bash --gid \"$username\" --comment '' \"$username\" || true)\n",
    );
    if !extra_packages.is_empty() {
        out.push_str(&format!(
            "RUN apt-get -qq update && DEBIAN_FRONTEND=noninteractive apt-get -qq install -y \
             -o Dpkg::Options::=\"--force-confold\" --no-install-recommends --no-install-suggests {}\n",
            extra_packages.join(" ")
        ));
    }
    if supervisor {
        out.push_str("COPY supervisor/ /etc/supervisor/conf.d/\n");
    }
    out.push_str(extra_tail);
    with_signature(&out)
}

/// User snippets `Dockerfile.*` in a build context, appended in lexical order.
fn dockerfile_snippets(dir: &Path) -> Result<String, BerthError> {
    let mut names = Vec::new();
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("Dockerfile.") && entry.path().is_file() {
                names.push(name);
            }
        }
    }
    names.sort();
    let mut tail = String::new();
    for name in names {
        tail.push_str(&format!("\n### {name}\n"));
        tail.push_str(&std::fs::read_to_string(dir.join(&name))?);
        if !tail.ends_with('\n') {
            tail.push('\n');
        }
    }
    Ok(tail)
}

fn supervisor_program(project: &Project, user: &HostUser, daemon: &berth_config::model::ExtraDaemon) -> String {
    let dir = if daemon.directory.is_empty() {
        CONTAINER_APPROOT.to_string()
    } else {
        format!("{CONTAINER_APPROOT}/{}", daemon.directory.trim_start_matches('/'))
    };
    with_signature(&format!(
        "[program:{name}]\ncommand={command}\ndirectory={dir}\nuser={user}\n\
         environment=DDEV_SITENAME=\"{site}\"\nautorestart=true\nstartretries=15\n\
         stdout_logfile=/proc/self/fd/2\nstdout_logfile_maxbytes=0\nredirect_stderr=true\n",
        name = daemon.name,
        command = daemon.command,
        user = user.username,
        site = project.name(),
    ))
}

/// Write `web-build/` and `db-build/` for the project.
pub fn write_build_contexts(project: &Project, user: &HostUser) -> Result<(), BerthError> {
    let web = project.config_file("web-build");
    paths::ensure_dir_all(&web)?;
    let daemons = &project.config.web_extra_daemons;
    if !daemons.is_empty() {
        let sup = web.join("supervisor");
        paths::ensure_dir_all(&sup)?;
        for daemon in daemons {
            write_if_owned(
                sup.join(format!("{}.conf", daemon.name)),
                &supervisor_program(project, user, daemon),
            )?;
        }
    }
    write_if_owned(
        web.join("Dockerfile"),
        &dockerfile(
            &project.config.webimage_extra_packages,
            &dockerfile_snippets(&web)?,
            !daemons.is_empty(),
        ),
    )?;

    if !project.omits("db") {
        let db = project.config_file("db-build");
        paths::ensure_dir_all(&db)?;
        write_if_owned(
            db.join("Dockerfile"),
            &dockerfile(
                &project.config.dbimage_extra_packages,
                &dockerfile_snippets(&db)?,
                false,
            ),
        )?;
    }
    if !project.no_bind_mounts() {
        paths::ensure_dir_all(project.config_file("db_snapshots"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

/// The base file followed by `compose*.yaml`/`compose*.yml` overlays in
/// lexical order, with `compose.override.yaml` last.
pub fn compose_files(project: &Project) -> Result<Vec<PathBuf>, BerthError> {
    let dir = project.config_dir();
    let mut overlays = Vec::new();
    let mut has_override = false;
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.path().is_file() || !name.starts_with("compose") {
            continue;
        }
        if name == OVERRIDE_FILE {
            has_override = true;
        } else if name.ends_with(".yaml") || name.ends_with(".yml") {
            overlays.push(name);
        }
    }
    overlays.sort();
    let mut files = vec![dir.join(BASE_FILE)];
    files.extend(overlays.into_iter().map(|n| dir.join(n)));
    if has_override {
        files.push(dir.join(OVERRIDE_FILE));
    }
    Ok(files)
}

fn same_path(a: &str, approot: &Path) -> bool {
    let trimmed = a.trim_end_matches('/');
    let root = approot.to_string_lossy();
    if trimmed == root.trim_end_matches('/') {
        return true;
    }
    if !Path::new(trimmed).is_absolute() {
        return false;
    }
    match (std::fs::canonicalize(trimmed), std::fs::canonicalize(approot)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

fn rewrite_volume(volume: &mut Value, approot: &Path) {
    match volume {
        Value::Mapping(m) => {
            let matches = m
                .get("source")
                .and_then(Value::as_str)
                .is_some_and(|s| same_path(s, approot));
            if matches {
                m.insert(Value::from("source"), Value::from("../"));
            }
        }
        Value::String(s) => {
            if let Some((host, rest)) = s.split_once(':') {
                if same_path(host, approot) {
                    *s = format!("../:{rest}");
                }
            }
        }
        _ => {}
    }
}

/// Rewrite the engine's canonical output.
///
/// Every service ends up on exactly the global and default networks, approot
/// bind sources become `../`, and published ports gain `host_ip`.
pub fn post_process(
    canonical: &str,
    project: &Project,
) -> Result<ComposeDocument, ComposeError> {
    let mut raw: Value = serde_yaml::from_str(canonical).map_err(|e| ComposeError::Malformed {
        reason: e.to_string(),
    })?;
    let ip = bind_ip(project);

    let services = raw
        .get_mut("services")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| ComposeError::Malformed {
            reason: "document has no services mapping".to_string(),
        })?;
    for (_, service) in services.iter_mut() {
        let Some(service) = service.as_mapping_mut() else {
            continue;
        };
        if let Some(Value::Sequence(volumes)) = service.get_mut("volumes") {
            for v in volumes.iter_mut() {
                rewrite_volume(v, &project.approot);
            }
        }
        if let Some(Value::Sequence(ports)) = service.get_mut("ports") {
            for p in ports.iter_mut() {
                if let Value::Mapping(pm) = p {
                    let missing = pm
                        .get("host_ip")
                        .and_then(Value::as_str)
                        .is_none_or(str::is_empty);
                    if missing {
                        pm.insert(Value::from("host_ip"), Value::from(ip));
                    }
                }
            }
        }
        service.remove("network_mode");
        let mut nets = Mapping::new();
        nets.insert(Value::from(GLOBAL_NETWORK), Value::Null);
        nets.insert(Value::from("default"), Value::Null);
        service.insert(Value::from("networks"), Value::Mapping(nets));
    }

    let root = raw.as_mapping_mut().ok_or_else(|| ComposeError::Malformed {
        reason: "document is not a mapping".to_string(),
    })?;
    let networks = root
        .entry(Value::from("networks"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !networks.is_mapping() {
        *networks = Value::Mapping(Mapping::new());
    }
    if let Some(networks) = networks.as_mapping_mut() {
        let mut global = Mapping::new();
        global.insert(Value::from("name"), Value::from(GLOBAL_NETWORK));
        global.insert(Value::from("external"), Value::Bool(true));
        networks.insert(Value::from(GLOBAL_NETWORK), Value::Mapping(global));

        let mut labels = Mapping::new();
        labels.insert(Value::from(LABEL_PLATFORM), Value::from(PLATFORM));
        let mut default = Mapping::new();
        default.insert(Value::from("name"), Value::from(default_network_name(project)));
        default.insert(Value::from("labels"), Value::Mapping(labels));
        networks.insert(Value::from("default"), Value::Mapping(default));
    }

    ComposeDocument::from_value(raw)
}

/// Render, canonicalize and post-process the project's compose manifest,
/// leaving the result in `.compose-full.yaml`.
pub fn synthesize(
    docker: &Docker,
    project: &Project,
    user: &HostUser,
    opts: &ComposeOptions,
) -> Result<ComposeDocument, BerthError> {
    let dir = project.config_dir();
    paths::ensure_dir_all(&dir)?;
    write_build_contexts(project, user)?;

    let base = render_base(project, user, opts)?;
    if write_if_owned(dir.join(BASE_FILE), &base)? == WriteOutcome::UserManaged {
        info!(project = %project.name(), file = BASE_FILE, "using user-managed compose base file");
    }

    let files = compose_files(project)?;
    let spec = docker
        .compose(&project.compose_project(), &files)
        .arg("config")
        .cwd(&dir);
    let out = docker.try_capture(&spec, ENGINE_TIMEOUT)?;
    if !out.success() {
        return Err(ComposeError::Invalid {
            stderr: out.stderr_string().trim().to_string(),
        }
        .into());
    }

    let doc = post_process(&out.stdout_string(), project)?;
    let full = dir.join(FULL_FILE);
    if write_if_owned(&full, &with_signature(&doc.to_yaml()?))? == WriteOutcome::UserManaged {
        info!(project = %project.name(), file = FULL_FILE, "using user-managed canonical compose document");
        return Ok(load_compose_full_at(&full)?.unwrap_or(doc));
    }
    debug!(
        project = %project.name(),
        services = ?doc.service_names(),
        "wrote canonical compose document"
    );
    Ok(doc)
}

/// The last canonical document written for `project`, if any.
pub fn load_compose_full(project: &Project) -> Result<Option<ComposeDocument>, BerthError> {
    load_compose_full_at(&project.config_file(FULL_FILE))
}

pub fn load_compose_full_at(path: &Path) -> Result<Option<ComposeDocument>, BerthError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(ComposeDocument::parse(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_config::{DatabaseDesc, GlobalConfig, ProjectConfig};
    use berth_runner::{FakeRunner, ProcessOutput};
    use berth_utils::ErrorKind;
    use berth_utils::signature::SIGNATURE;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn user() -> HostUser {
        HostUser {
            uid: 501,
            gid: 20,
            username: "dev".into(),
        }
    }

    fn project(root: &Path, name: &str) -> Project {
        Project::new(root, ProjectConfig::with_name(name), GlobalConfig::default())
    }

    fn base_doc(p: &Project) -> Value {
        serde_yaml::from_str(&render_base(p, &user(), &ComposeOptions::default()).unwrap()).unwrap()
    }

    #[test]
    fn test_base_is_signed_and_routes_web() {
        let root = TempDir::new().unwrap();
        let mut p = project(root.path(), "alpha");
        p.config.additional_hostnames = vec!["api".into()];
        let rendered = render_base(&p, &user(), &ComposeOptions::default()).unwrap();
        assert!(rendered.starts_with(SIGNATURE));

        let doc = ComposeDocument::parse(&rendered).unwrap();
        let env = doc.service_env("web");
        assert_eq!(env["VIRTUAL_HOST"], "alpha.ddev.site,api.ddev.site");
        assert_eq!(env["HTTP_EXPOSE"], "80:80,8025:8025");
        assert_eq!(env["HTTPS_EXPOSE"], "443:80,8026:8025");
        assert_eq!(doc.container_name("web"), "ddev-alpha-web");
        assert_eq!(doc.container_name("db"), "ddev-alpha-db");
    }

    #[test]
    fn test_extra_exposed_ports_are_routed() {
        let root = TempDir::new().unwrap();
        let mut p = project(root.path(), "alpha");
        p.config.web_extra_exposed_ports = vec![berth_config::model::ExtraExposedPort {
            name: "vite".into(),
            container_port: 5173,
            http_port: 5172,
            https_port: 5173,
        }];
        let doc = ComposeDocument::from_value(base_doc(&p)).unwrap();
        assert!(doc.service_env("web")["HTTP_EXPOSE"].ends_with(",5172:5173"));
        assert!(doc.service_env("web")["HTTPS_EXPOSE"].ends_with(",5173:5173"));
    }

    #[test]
    fn test_omitted_db_has_no_service() {
        let root = TempDir::new().unwrap();
        let mut p = project(root.path(), "alpha");
        p.config.omit_containers = vec!["db".into()];
        let doc = ComposeDocument::from_value(base_doc(&p)).unwrap();
        assert_eq!(doc.service_names(), vec!["web"]);
    }

    #[test]
    fn test_postgres_data_dir_follows_major() {
        assert_eq!(postgres_data_dir("17"), "/var/lib/postgresql/data");
        assert_eq!(postgres_data_dir("18"), "/var/lib/postgresql");
        assert_eq!(postgres_data_dir("9"), "/var/lib/postgresql/data");

        let root = TempDir::new().unwrap();
        let mut p = project(root.path(), "pg");
        p.config.database = DatabaseDesc::new(DbEngine::Postgres, "18");
        let doc = ComposeDocument::from_value(base_doc(&p)).unwrap();
        assert_eq!(doc.service_env("db")["PGDATA"], "/var/lib/postgresql");
        assert_eq!(db_volume(&p), "pg-postgres");
    }

    #[test]
    fn test_upload_dir_bind_only_when_present() {
        let root = TempDir::new().unwrap();
        let mut p = project(root.path(), "alpha");
        p.config.upload_dirs = vec!["files".into()];
        let has_bind = |doc: &Value| {
            doc["services"]["web"]["volumes"]
                .as_sequence()
                .unwrap()
                .iter()
                .any(|v| v["target"].as_str() == Some("/var/www/html/files"))
        };
        assert!(!has_bind(&base_doc(&p)));
        std::fs::create_dir_all(root.path().join("files")).unwrap();
        assert!(has_bind(&base_doc(&p)));
    }

    #[test]
    fn test_no_bind_mounts_uses_volumes() {
        let root = TempDir::new().unwrap();
        let mut p = project(root.path(), "alpha");
        p.global.no_bind_mounts = true;
        let doc = base_doc(&p);
        for svc in ["web", "db"] {
            for v in doc["services"][svc]["volumes"].as_sequence().unwrap() {
                assert_eq!(v["type"].as_str(), Some("volume"), "{svc}: {v:?}");
            }
        }
        assert!(doc["volumes"].get("ddev-alpha-snapshots").is_some());
    }

    #[test]
    fn test_compose_files_order() {
        let root = TempDir::new().unwrap();
        let p = project(root.path(), "alpha");
        let dir = p.config_dir();
        std::fs::create_dir_all(&dir).unwrap();
        for f in [OVERRIDE_FILE, "compose.redis.yaml", "compose.a.yml", "config.yaml", "compose.txt"] {
            std::fs::write(dir.join(f), "services: {}\n").unwrap();
        }
        let names: Vec<String> = compose_files(&p)
            .unwrap()
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![BASE_FILE, "compose.a.yml", "compose.redis.yaml", OVERRIDE_FILE]
        );
    }

    fn canonical(approot: &Path) -> String {
        format!(
            r#"name: ddev-alpha
services:
  web:
    container_name: ddev-alpha-web
    environment:
      VIRTUAL_HOST: alpha.ddev.site
    volumes:
      - type: bind
        source: {root}
        target: /var/www/html
      - type: volume
        source: ddev-global-cache
        target: /mnt/ddev-global-cache
    ports:
      - mode: ingress
        target: 80
        protocol: tcp
        host_ip: 127.0.0.1
    networks:
      default: null
  extra:
    image: nginx
    network_mode: host
    environment:
      - VIRTUAL_HOST=extra.dev.test
      - HTTP_EXPOSE=8080:80
    x-project:
      describe-info: the extra one
    volumes:
      - "{root}:/srv:ro"
    ports:
      - mode: ingress
        target: 3000
        published: "3000"
        protocol: tcp
networks:
  custom:
    name: custom
"#,
            root = approot.display()
        )
    }

    #[test]
    fn test_post_process_rewrites_sources_and_networks() {
        let root = TempDir::new().unwrap();
        let p = project(root.path(), "alpha");
        let doc = post_process(&canonical(root.path()), &p).unwrap();

        for svc in doc.service_names() {
            let s = doc.service(&svc).unwrap();
            let nets: Vec<String> = s["networks"]
                .as_mapping()
                .unwrap()
                .keys()
                .filter_map(scalar_string)
                .collect();
            assert_eq!(nets, vec![GLOBAL_NETWORK, "default"], "{svc}");
            assert!(s.get("network_mode").is_none());
        }
        assert_eq!(doc.raw["services"]["web"]["volumes"][0]["source"].as_str(), Some("../"));
        assert_eq!(
            doc.raw["services"]["web"]["volumes"][1]["source"].as_str(),
            Some("ddev-global-cache")
        );
        assert_eq!(doc.raw["services"]["extra"]["volumes"][0].as_str(), Some("../:/srv:ro"));
        assert_eq!(
            doc.raw["services"]["extra"]["ports"][0]["host_ip"].as_str(),
            Some("127.0.0.1")
        );
        assert_eq!(doc.raw["networks"]["ddev_default"]["external"].as_bool(), Some(true));
        assert_eq!(doc.raw["networks"]["default"]["name"].as_str(), Some("ddev-alpha_default"));
        assert!(doc.raw["networks"].get("custom").is_some());
    }

    #[test]
    fn test_x_project_fields_and_default_shells() {
        let root = TempDir::new().unwrap();
        let p = project(root.path(), "alpha");
        let doc = post_process(&canonical(root.path()), &p).unwrap();
        assert_eq!(doc.x_project["web"].shell, "bash");
        assert_eq!(doc.x_project["extra"].shell, "sh");
        assert_eq!(doc.x_project["extra"].describe_info.as_deref(), Some("the extra one"));
        assert_eq!(doc.service_env("extra")["HTTP_EXPOSE"], "8080:80");
        assert_eq!(doc.container_name("extra"), "ddev-alpha-extra-1");
    }

    #[test]
    fn test_synthesize_writes_full_document() {
        let root = TempDir::new().unwrap();
        let p = project(root.path(), "alpha");
        let fake = Arc::new(FakeRunner::new());
        fake.on(&["compose", " config"], ProcessOutput::ok(canonical(root.path())));
        let docker = Docker::new(fake.clone());

        let doc = synthesize(&docker, &p, &user(), &ComposeOptions::default()).unwrap();
        assert!(p.config_file(BASE_FILE).is_file());
        assert!(p.config_file("web-build/Dockerfile").is_file());
        let loaded = load_compose_full(&p).unwrap().unwrap();
        assert_eq!(loaded, doc);

        let call = &fake.calls()[0];
        assert_eq!(call.spec.cwd.as_deref(), Some(p.config_dir().as_path()));
    }

    #[test]
    fn test_synthesize_surfaces_engine_stderr() {
        let root = TempDir::new().unwrap();
        let p = project(root.path(), "alpha");
        let fake = Arc::new(FakeRunner::new());
        fake.fail(&["compose", " config"], 15, "services.web.ports must be a list");
        let docker = Docker::new(fake);

        let err = synthesize(&docker, &p, &user(), &ComposeOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComposeInvalid);
        assert!(err.to_string().contains("must be a list"));
        assert!(!p.config_file(FULL_FILE).exists());
    }

    #[test]
    fn test_user_managed_base_is_kept() {
        let root = TempDir::new().unwrap();
        let p = project(root.path(), "alpha");
        std::fs::create_dir_all(p.config_dir()).unwrap();
        std::fs::write(p.config_file(BASE_FILE), "services:\n  web:\n    image: mine\n").unwrap();
        let fake = Arc::new(FakeRunner::new());
        fake.on(&["compose", " config"], ProcessOutput::ok(canonical(root.path())));
        synthesize(&Docker::new(fake), &p, &user(), &ComposeOptions::default()).unwrap();
        let base = std::fs::read_to_string(p.config_file(BASE_FILE)).unwrap();
        assert!(base.contains("image: mine"));
    }

    #[test]
    fn test_user_managed_full_document_is_kept() {
        let root = TempDir::new().unwrap();
        let p = project(root.path(), "alpha");
        std::fs::create_dir_all(p.config_dir()).unwrap();
        let mine = "services:\n  web:\n    container_name: my-web\n    image: mine\n";
        std::fs::write(p.config_file(FULL_FILE), mine).unwrap();
        let fake = Arc::new(FakeRunner::new());
        fake.on(&["compose", " config"], ProcessOutput::ok(canonical(root.path())));

        let doc = synthesize(&Docker::new(fake), &p, &user(), &ComposeOptions::default()).unwrap();
        assert_eq!(std::fs::read_to_string(p.config_file(FULL_FILE)).unwrap(), mine);
        assert_eq!(doc.container_names(), vec!["my-web"]);
    }

    #[test]
    fn test_git_dir_is_mounted_when_present() {
        let root = TempDir::new().unwrap();
        let p = project(root.path(), "alpha");
        let has_git = |doc: &Value| {
            doc["services"]["web"]["volumes"]
                .as_sequence()
                .unwrap()
                .iter()
                .any(|v| v["target"].as_str() == Some("/var/www/html/.git"))
        };
        assert!(!has_git(&base_doc(&p)));
        std::fs::create_dir_all(root.path().join(".git")).unwrap();
        assert!(has_git(&base_doc(&p)));
    }

    #[test]
    fn test_build_contexts_are_generated() {
        let root = TempDir::new().unwrap();
        let mut p = project(root.path(), "alpha");
        p.config.webimage_extra_packages = vec!["imagemagick".into()];
        p.config.web_extra_daemons = vec![berth_config::model::ExtraDaemon {
            name: "worker".into(),
            command: "php artisan queue:work".into(),
            directory: String::new(),
        }];
        std::fs::create_dir_all(p.config_file("web-build")).unwrap();
        std::fs::write(p.config_file("web-build/Dockerfile.node"), "RUN npm i -g pnpm").unwrap();
        write_build_contexts(&p, &user()).unwrap();

        let web = std::fs::read_to_string(p.config_file("web-build/Dockerfile")).unwrap();
        assert!(web.starts_with(SIGNATURE));
        assert!(web.contains("useradd"));
        assert!(web.contains("imagemagick"));
        assert!(web.contains("COPY supervisor/"));
        assert!(web.contains("RUN npm i -g pnpm"));
        let conf = std::fs::read_to_string(p.config_file("web-build/supervisor/worker.conf")).unwrap();
        assert!(conf.contains("[program:worker]"));
        assert!(p.config_file("db-build/Dockerfile").is_file());
    }
}
