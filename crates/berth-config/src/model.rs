//! Typed shape of `.project-config/config.yaml`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::dbtypes::DatabaseDesc;
use crate::hooks::Hooks;

/// Default PHP version for new projects.
pub const DEFAULT_PHP_VERSION: &str = "8.3";

/// PHP versions with a published web image.
pub const VALID_PHP_VERSIONS: &[&str] = &[
    "5.6", "7.0", "7.1", "7.2", "7.3", "7.4", "8.0", "8.1", "8.2", "8.3", "8.4",
];

pub const DEFAULT_COMPOSER_VERSION: &str = "2";
pub const DEFAULT_NODEJS_VERSION: &str = "22";

/// Default health-wait ceiling in seconds.
pub const DEFAULT_CONTAINER_TIMEOUT_SECS: u64 = 120;

/// Containers a project may opt out of.
pub const OMITTABLE_CONTAINERS: &[&str] = &["db", "ddev-ssh-agent", "ddev-router"];

/// Web server flavour inside the web container.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WebserverType {
    #[default]
    NginxFpm,
    ApacheFpm,
    Generic,
}

/// How project files reach the web container.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PerformanceMode {
    /// Defer to the global setting. Only meaningful per project.
    #[default]
    Global,
    None,
    Mutagen,
    Nfs,
}

/// Extra port published by the web container and routed by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraExposedPort {
    pub name: String,
    pub container_port: u16,
    pub http_port: u16,
    pub https_port: u16,
}

/// Long-running process supervised inside the web container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraDaemon {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub directory: String,
}

/// Per-project configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub app_type: String,
    pub docroot: String,
    pub php_version: String,
    pub webserver_type: WebserverType,
    pub composer_version: String,
    pub nodejs_version: String,
    pub database: DatabaseDesc,

    #[serde(deserialize_with = "port::deserialize", skip_serializing_if = "Option::is_none")]
    pub router_http_port: Option<u16>,
    #[serde(deserialize_with = "port::deserialize", skip_serializing_if = "Option::is_none")]
    pub router_https_port: Option<u16>,
    #[serde(deserialize_with = "port::deserialize", skip_serializing_if = "Option::is_none")]
    pub host_db_port: Option<u16>,
    #[serde(deserialize_with = "port::deserialize", skip_serializing_if = "Option::is_none")]
    pub host_webserver_port: Option<u16>,
    #[serde(deserialize_with = "port::deserialize", skip_serializing_if = "Option::is_none")]
    pub host_https_port: Option<u16>,
    #[serde(deserialize_with = "port::deserialize", skip_serializing_if = "Option::is_none")]
    pub mailpit_http_port: Option<u16>,
    #[serde(deserialize_with = "port::deserialize", skip_serializing_if = "Option::is_none")]
    pub mailpit_https_port: Option<u16>,

    pub additional_hostnames: Vec<String>,
    pub additional_fqdns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_tld: Option<String>,
    pub use_dns_when_possible: bool,
    pub bind_all_interfaces: bool,

    pub omit_containers: Vec<String>,
    pub performance_mode: PerformanceMode,
    pub upload_dirs: Vec<String>,
    pub disable_settings_management: bool,

    pub hooks: Hooks,
    pub web_environment: Vec<String>,
    pub web_extra_exposed_ports: Vec<ExtraExposedPort>,
    pub web_extra_daemons: Vec<ExtraDaemon>,
    pub webimage_extra_packages: Vec<String>,
    pub dbimage_extra_packages: Vec<String>,

    pub fail_on_hook_fail: bool,
    #[serde(deserialize_with = "timeout::deserialize")]
    pub default_container_timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    // Legacy fields, read once and folded into their replacements.
    #[serde(skip_serializing)]
    pub mariadb_version: Option<String>,
    #[serde(skip_serializing)]
    pub mysql_version: Option<String>,
    #[serde(skip_serializing)]
    pub upload_dir: Option<String>,
    #[serde(skip_serializing)]
    pub mutagen_enabled: Option<bool>,
    #[serde(skip_serializing)]
    pub nfs_mount_enabled: Option<bool>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            app_type: crate::apptypes::DEFAULT_APP_TYPE.to_string(),
            docroot: String::new(),
            php_version: DEFAULT_PHP_VERSION.to_string(),
            webserver_type: WebserverType::default(),
            composer_version: DEFAULT_COMPOSER_VERSION.to_string(),
            nodejs_version: DEFAULT_NODEJS_VERSION.to_string(),
            database: DatabaseDesc::default(),
            router_http_port: None,
            router_https_port: None,
            host_db_port: None,
            host_webserver_port: None,
            host_https_port: None,
            mailpit_http_port: None,
            mailpit_https_port: None,
            additional_hostnames: Vec::new(),
            additional_fqdns: Vec::new(),
            project_tld: None,
            use_dns_when_possible: true,
            bind_all_interfaces: false,
            omit_containers: Vec::new(),
            performance_mode: PerformanceMode::default(),
            upload_dirs: Vec::new(),
            disable_settings_management: false,
            hooks: Hooks::new(),
            web_environment: Vec::new(),
            web_extra_exposed_ports: Vec::new(),
            web_extra_daemons: Vec::new(),
            webimage_extra_packages: Vec::new(),
            dbimage_extra_packages: Vec::new(),
            fail_on_hook_fail: false,
            default_container_timeout: DEFAULT_CONTAINER_TIMEOUT_SECS,
            timezone: None,
            mariadb_version: None,
            mysql_version: None,
            upload_dir: None,
            mutagen_enabled: None,
            nfs_mount_enabled: None,
        }
    }
}

impl ProjectConfig {
    /// Defaults for a project called `name`.
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Host ports this project explicitly asked for.
    #[must_use]
    pub fn explicit_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = [
            self.router_http_port,
            self.router_https_port,
            self.host_db_port,
            self.host_webserver_port,
            self.host_https_port,
            self.mailpit_http_port,
            self.mailpit_https_port,
        ]
        .into_iter()
        .flatten()
        .chain(
            self.web_extra_exposed_ports
                .iter()
                .flat_map(|p| [p.http_port, p.https_port]),
        )
        .filter(|p| *p != 0)
        .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }
}

/// Ports are historically quoted strings; accept integers and strings alike.
mod port {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u16),
        Str(String),
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Int(0)) => Ok(None),
            Some(Raw::Int(p)) => Ok(Some(p)),
            Some(Raw::Str(s)) if s.trim().is_empty() => Ok(None),
            Some(Raw::Str(s)) => s
                .trim()
                .parse::<u16>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("'{s}' is not a valid port"))),
        }
    }
}

/// Empty or zero timeouts fall back to the default.
mod timeout {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let secs = match Option::<Raw>::deserialize(d)? {
            None => 0,
            Some(Raw::Int(n)) => n,
            Some(Raw::Str(s)) if s.trim().is_empty() => 0,
            Some(Raw::Str(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| serde::de::Error::custom(format!("'{s}' is not a number of seconds")))?,
        };
        Ok(if secs == 0 {
            DEFAULT_CONTAINER_TIMEOUT_SECS
        } else {
            secs
        })
    }
}
