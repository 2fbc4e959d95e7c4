//! The project aggregate: configuration plus the effective values derived
//! from it and the global configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use berth_utils::paths;

use crate::apptypes;
use crate::dbtypes::DatabaseDesc;
use crate::global::GlobalConfig;
use crate::hooks::Task;
use crate::hostnames::{HostnameSpec, url_for};
use crate::model::{PerformanceMode, ProjectConfig, WebserverType};

/// Name of the shared router container.
pub const ROUTER_CONTAINER: &str = "ddev-router";
/// Name of the shared SSH-agent container.
pub const SSH_AGENT_CONTAINER: &str = "ddev-ssh-agent";

/// One managed directory on disk.
#[derive(Debug, Clone)]
pub struct Project {
    pub approot: PathBuf,
    pub config: ProjectConfig,
    pub global: GlobalConfig,
    /// Config files that contributed, in merge order.
    pub loaded_files: Vec<PathBuf>,
}

impl Project {
    /// Project from an already-resolved configuration.
    pub fn new(approot: impl Into<PathBuf>, config: ProjectConfig, global: GlobalConfig) -> Self {
        Self {
            approot: approot.into(),
            config,
            global,
            loaded_files: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        paths::project_config_dir(&self.approot)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join("config.yaml")
    }

    /// Path of a file under the config directory.
    #[must_use]
    pub fn config_file(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.config_dir().join(rel)
    }

    #[must_use]
    pub fn docroot_path(&self) -> PathBuf {
        if self.config.docroot.is_empty() {
            self.approot.clone()
        } else {
            self.approot.join(&self.config.docroot)
        }
    }

    /// Compose project name, also the container name prefix.
    #[must_use]
    pub fn compose_project(&self) -> String {
        format!("ddev-{}", self.name())
    }

    /// Container name of a project service, e.g. `ddev-shop-web`.
    #[must_use]
    pub fn container_name(&self, service: &str) -> String {
        format!("ddev-{}-{service}", self.name())
    }

    #[must_use]
    pub fn database(&self) -> &DatabaseDesc {
        &self.config.database
    }

    #[must_use]
    pub fn project_tld(&self) -> &str {
        self.config
            .project_tld
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.global.project_tld)
    }

    #[must_use]
    pub fn webserver_type(&self) -> WebserverType {
        self.global
            .default_webserver_type
            .filter(|_| self.config.webserver_type == WebserverType::default())
            .unwrap_or(self.config.webserver_type)
    }

    /// Project or global opt-out of `container`.
    #[must_use]
    pub fn omits(&self, container: &str) -> bool {
        self.config.omit_containers.iter().any(|c| c == container) || self.global.omits(container)
    }

    #[must_use]
    pub fn is_router_disabled(&self) -> bool {
        self.omits(ROUTER_CONTAINER)
    }

    #[must_use]
    pub fn performance_mode(&self) -> PerformanceMode {
        match self.config.performance_mode {
            PerformanceMode::Global => self.global.performance_mode,
            other => other,
        }
    }

    #[must_use]
    pub fn is_mutagen_enabled(&self) -> bool {
        self.performance_mode() == PerformanceMode::Mutagen
    }

    #[must_use]
    pub fn is_nfs_enabled(&self) -> bool {
        self.performance_mode() == PerformanceMode::Nfs
    }

    #[must_use]
    pub fn no_bind_mounts(&self) -> bool {
        self.global.no_bind_mounts
    }

    #[must_use]
    pub fn fail_on_hook_fail(&self) -> bool {
        self.config.fail_on_hook_fail || self.global.fail_on_hook_fail
    }

    #[must_use]
    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.config.default_container_timeout)
    }

    #[must_use]
    pub fn router_http_port(&self) -> u16 {
        self.config
            .router_http_port
            .unwrap_or(self.global.router_http_port)
    }

    #[must_use]
    pub fn router_https_port(&self) -> u16 {
        self.config
            .router_https_port
            .unwrap_or(self.global.router_https_port)
    }

    #[must_use]
    pub fn mailpit_http_port(&self) -> u16 {
        self.config
            .mailpit_http_port
            .unwrap_or(self.global.mailpit_http_port)
    }

    #[must_use]
    pub fn mailpit_https_port(&self) -> u16 {
        self.config
            .mailpit_https_port
            .unwrap_or(self.global.mailpit_https_port)
    }

    /// Explicitly configured host ports, the ones reserved in the registry.
    #[must_use]
    pub fn reserved_ports(&self) -> Vec<u16> {
        self.config.explicit_ports()
    }

    fn hostname_spec(&self) -> HostnameSpec<'_> {
        HostnameSpec {
            name: self.name(),
            tld: self.project_tld(),
            additional_hostnames: &self.config.additional_hostnames,
            additional_fqdns: &self.config.additional_fqdns,
            router_disabled: self.is_router_disabled(),
        }
    }

    /// Ordered hostnames, primary first; empty when the router is disabled.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        self.hostname_spec().hostnames()
    }

    /// Hostnames regardless of router state, used for validation.
    #[must_use]
    pub fn all_hostnames(&self) -> Vec<String> {
        self.hostname_spec().all_hostnames()
    }

    #[must_use]
    pub fn primary_hostname(&self) -> String {
        self.hostname_spec().primary()
    }

    /// Whether HTTPS URLs can be offered.
    #[must_use]
    pub fn tls_available(&self) -> bool {
        !self.is_router_disabled() && (self.global.use_letsencrypt || self.global.has_local_ca())
    }

    /// Main URL of the project.
    ///
    /// With the router disabled the web container is reached directly on
    /// `host_webserver_port`; `bound_web_port` overrides it with the port the
    /// engine actually published.
    #[must_use]
    pub fn primary_url(&self, bound_web_port: Option<u16>) -> String {
        if self.is_router_disabled() {
            return match bound_web_port.or(self.config.host_webserver_port) {
                Some(port) => url_for(false, "127.0.0.1", port),
                None => "http://127.0.0.1".to_string(),
            };
        }
        let host = self.primary_hostname();
        if self.tls_available() {
            url_for(true, &host, self.router_https_port())
        } else {
            url_for(false, &host, self.router_http_port())
        }
    }

    /// Every hostname in HTTPS form (when available) followed by HTTP form.
    #[must_use]
    pub fn all_urls(&self) -> Vec<String> {
        let hosts = self.hostnames();
        let mut urls = Vec::with_capacity(hosts.len() * 2);
        if self.tls_available() {
            urls.extend(hosts.iter().map(|h| url_for(true, h, self.router_https_port())));
        }
        urls.extend(hosts.iter().map(|h| url_for(false, h, self.router_http_port())));
        urls
    }

    /// Upload directories relative to the docroot.
    #[must_use]
    pub fn upload_dirs(&self) -> Vec<String> {
        if !self.config.upload_dirs.is_empty() {
            return self.config.upload_dirs.clone();
        }
        apptypes::lookup(&self.config.app_type)
            .map(|bundle| bundle.upload_dirs(self))
            .unwrap_or_default()
    }

    /// Host path of the first upload directory.
    #[must_use]
    pub fn host_upload_dir(&self) -> Option<PathBuf> {
        self.upload_dirs()
            .first()
            .map(|u| paths::normalize_lexically(&self.docroot_path().join(u)))
    }

    /// `web_environment` of the global config followed by the project's,
    /// collapsed so the project wins per key.
    #[must_use]
    pub fn web_environment(&self) -> Vec<String> {
        let mut env = Vec::new();
        crate::store::merge_web_environment(&mut env, &self.global.web_environment);
        crate::store::merge_web_environment(&mut env, &self.config.web_environment);
        env
    }

    /// Tasks attached to `hook`, in order.
    #[must_use]
    pub fn hook_tasks(&self, hook: &str) -> &[Task] {
        self.config.hooks.get(hook).map(Vec::as_slice).unwrap_or_default()
    }

    /// True when `approot/.git` is a directory.
    #[must_use]
    pub fn has_git_dir(&self) -> bool {
        self.approot.join(".git").is_dir()
    }
}
