//! Global configuration shared by every project: `<global-dir>/global_config.yaml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use berth_utils::atomic_write::write_file_atomic;
use berth_utils::error::{BerthError, ConfigError};
use berth_utils::paths;

use crate::model::{PerformanceMode, WebserverType};

/// Public wildcard DNS domain every project name resolves under by default.
pub const DEFAULT_PROJECT_TLD: &str = "ddev.site";

pub const DEFAULT_ROUTER_HTTP_PORT: u16 = 80;
pub const DEFAULT_ROUTER_HTTPS_PORT: u16 = 443;
pub const DEFAULT_MAILPIT_HTTP_PORT: u16 = 8025;
pub const DEFAULT_MAILPIT_HTTPS_PORT: u16 = 8026;

/// Mail catcher's port inside the web container.
pub const DEFAULT_MAILPIT_CONTAINER_PORT: u16 = 8025;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub router_http_port: u16,
    pub router_https_port: u16,
    pub mailpit_http_port: u16,
    pub mailpit_https_port: u16,
    pub mailpit_container_port: u16,
    pub router_bind_all_interfaces: bool,
    pub project_tld: String,
    pub omit_containers: Vec<String>,
    pub performance_mode: PerformanceMode,
    pub no_bind_mounts: bool,
    pub fail_on_hook_fail: bool,
    pub use_letsencrypt: bool,
    pub letsencrypt_email: String,
    pub use_hardened_images: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mkcert_caroot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_webserver_type: Option<WebserverType>,
    pub web_environment: Vec<String>,

    /// Set from `DDEV_NONINTERACTIVE`; never persisted.
    #[serde(skip)]
    pub non_interactive: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            router_http_port: DEFAULT_ROUTER_HTTP_PORT,
            router_https_port: DEFAULT_ROUTER_HTTPS_PORT,
            mailpit_http_port: DEFAULT_MAILPIT_HTTP_PORT,
            mailpit_https_port: DEFAULT_MAILPIT_HTTPS_PORT,
            mailpit_container_port: DEFAULT_MAILPIT_CONTAINER_PORT,
            router_bind_all_interfaces: false,
            project_tld: DEFAULT_PROJECT_TLD.to_string(),
            omit_containers: Vec::new(),
            performance_mode: PerformanceMode::None,
            no_bind_mounts: false,
            fail_on_hook_fail: false,
            use_letsencrypt: false,
            letsencrypt_email: String::new(),
            use_hardened_images: false,
            mkcert_caroot: None,
            default_webserver_type: None,
            web_environment: Vec::new(),
            non_interactive: false,
        }
    }
}

impl GlobalConfig {
    /// Load from the global directory and apply the process environment.
    pub fn load() -> Result<Self, BerthError> {
        let mut cfg = Self::load_from(&paths::global_config_path())?;
        cfg.apply_env_overrides(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Parse `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, BerthError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut cfg: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        cfg.normalize();
        Ok(cfg)
    }

    pub fn save(&self) -> Result<PathBuf, BerthError> {
        let path = paths::global_config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), BerthError> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| BerthError::internal(format!("serialize global config: {e}")))?;
        write_file_atomic(path, &yaml)?;
        Ok(())
    }

    /// Apply the `DDEV_TEST_*` overrides and `DDEV_NONINTERACTIVE`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let truthy = |k: &str| {
            lookup(k).is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        };

        if let Some(ws) = lookup("DDEV_TEST_WEBSERVER_TYPE") {
            match ws.trim().parse::<WebserverType>() {
                Ok(ws) => self.default_webserver_type = Some(ws),
                Err(_) => tracing::warn!(value = %ws, "ignoring invalid DDEV_TEST_WEBSERVER_TYPE"),
            }
        }
        if truthy("DDEV_TEST_USE_MUTAGEN") {
            self.performance_mode = PerformanceMode::Mutagen;
        }
        if truthy("DDEV_TEST_USE_NFSMOUNT") {
            self.performance_mode = PerformanceMode::Nfs;
        }
        if truthy("DDEV_TEST_NO_BIND_MOUNTS") {
            self.no_bind_mounts = true;
        }
        if truthy("DDEV_NONINTERACTIVE") {
            self.non_interactive = true;
        }
    }

    fn normalize(&mut self) {
        // Global performance mode cannot defer to itself.
        if self.performance_mode == PerformanceMode::Global {
            self.performance_mode = PerformanceMode::None;
        }
        if self.project_tld.trim().is_empty() {
            self.project_tld = DEFAULT_PROJECT_TLD.to_string();
        }
        for c in &mut self.omit_containers {
            if c == "router" {
                *c = "ddev-router".to_string();
            }
        }
    }

    #[must_use]
    pub fn omits(&self, container: &str) -> bool {
        self.omit_containers.iter().any(|c| c == container)
    }

    /// Whether a local CA is available for minting certificates.
    #[must_use]
    pub fn has_local_ca(&self) -> bool {
        self.mkcert_caroot.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Host address published router ports bind to.
    #[must_use]
    pub fn router_bind_ip(&self) -> &'static str {
        if self.router_bind_all_interfaces {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = GlobalConfig::load_from(&dir.path().join("global_config.yaml")).unwrap();
        assert_eq!(cfg, GlobalConfig::default());
        assert_eq!(cfg.project_tld, "ddev.site");
        assert_eq!(cfg.router_bind_ip(), "127.0.0.1");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("global_config.yaml");
        let mut cfg = GlobalConfig::default();
        cfg.router_http_port = 8080;
        cfg.use_letsencrypt = true;
        cfg.letsencrypt_email = "ops@example.com".into();
        cfg.save_to(&path).unwrap();

        let loaded = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(loaded.router_http_port, 8080);
        assert!(loaded.use_letsencrypt);
        assert_eq!(loaded.letsencrypt_email, "ops@example.com");
    }

    #[test]
    fn test_normalize_legacy_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("global_config.yaml");
        std::fs::write(&path, "performance_mode: global\nomit_containers: [router]\nproject_tld: \"\"\n").unwrap();
        let cfg = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(cfg.performance_mode, PerformanceMode::None);
        assert!(cfg.omits("ddev-router"));
        assert_eq!(cfg.project_tld, DEFAULT_PROJECT_TLD);
    }

    #[test]
    fn test_invalid_yaml_is_config_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("global_config.yaml");
        std::fs::write(&path, "router_http_port: [not, a, port]\n").unwrap();
        let err = GlobalConfig::load_from(&path).unwrap_err();
        assert_eq!(err.kind(), berth_utils::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_env_overrides_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("DDEV_TEST_WEBSERVER_TYPE", "apache-fpm"),
            ("DDEV_TEST_USE_MUTAGEN", "true"),
            ("DDEV_TEST_NO_BIND_MOUNTS", "1"),
            ("DDEV_NONINTERACTIVE", "yes"),
        ]
        .into_iter()
        .collect();
        let mut cfg = GlobalConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(cfg.default_webserver_type, Some(WebserverType::ApacheFpm));
        assert_eq!(cfg.performance_mode, PerformanceMode::Mutagen);
        assert!(cfg.no_bind_mounts);
        assert!(cfg.non_interactive);
    }

    #[test]
    fn test_bad_webserver_override_is_ignored() {
        let mut cfg = GlobalConfig::default();
        cfg.apply_env_overrides(|k| (k == "DDEV_TEST_WEBSERVER_TYPE").then(|| "iis".to_string()));
        assert_eq!(cfg.default_webserver_type, None);
    }

    #[test]
    #[serial]
    fn test_load_reads_process_env() {
        let _home = berth_utils::paths::with_isolated_home();
        // SAFETY: serialised with other env-mutating tests.
        unsafe { std::env::set_var("DDEV_TEST_USE_NFSMOUNT", "true") };
        let cfg = GlobalConfig::load();
        unsafe { std::env::remove_var("DDEV_TEST_USE_NFSMOUNT") };
        assert_eq!(cfg.unwrap().performance_mode, PerformanceMode::Nfs);
    }
}
