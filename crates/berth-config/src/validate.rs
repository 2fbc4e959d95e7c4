//! Project validation. Every check fails closed with `config-invalid`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use berth_utils::error::ConfigError;
use berth_utils::paths::is_contained;

use crate::apptypes;
use crate::global::DEFAULT_PROJECT_TLD;
use crate::hooks::validate_pre_start;
use crate::hostnames::{is_valid_hostname, is_valid_project_name};
use crate::model::{OMITTABLE_CONTAINERS, VALID_PHP_VERSIONS};
use crate::project::Project;

static NODEJS_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d+){0,2}$").unwrap());

const ZONEINFO_DIR: &str = "/usr/share/zoneinfo";

/// Validate the effective configuration of `project`.
pub fn validate_project(project: &Project) -> Result<(), ConfigError> {
    let cfg = &project.config;

    if !is_valid_project_name(&cfg.name) {
        return Err(ConfigError::invalid(
            "name",
            format!(
                "'{}' is not a valid hostname; use letters, digits and hyphens only",
                cfg.name
            ),
        ));
    }

    let wildcard_default = format!("*.{DEFAULT_PROJECT_TLD}");
    for host in project.all_hostnames() {
        if host == DEFAULT_PROJECT_TLD || host == wildcard_default {
            return Err(ConfigError::invalid(
                "additional_hostnames",
                format!("'{host}' would capture every other project's traffic"),
            ));
        }
        if !is_valid_hostname(&host) {
            return Err(ConfigError::invalid(
                "additional_hostnames",
                format!("'{host}' is not a valid hostname"),
            ));
        }
    }

    if !apptypes::is_valid(&cfg.app_type) {
        let valid: Vec<&str> = apptypes::valid_types().into_iter().collect();
        return Err(ConfigError::invalid(
            "type",
            format!("'{}' is not one of {}", cfg.app_type, valid.join(", ")),
        ));
    }

    if !VALID_PHP_VERSIONS.contains(&cfg.php_version.as_str()) {
        return Err(ConfigError::invalid(
            "php_version",
            format!(
                "'{}' is not one of {}",
                cfg.php_version,
                VALID_PHP_VERSIONS.join(", ")
            ),
        ));
    }

    if !cfg.nodejs_version.is_empty() && !NODEJS_VERSION.is_match(&cfg.nodejs_version) {
        return Err(ConfigError::invalid(
            "nodejs_version",
            format!("'{}' is not a version number", cfg.nodejs_version),
        ));
    }

    cfg.database.validate()?;

    if let Some(bad) = cfg
        .omit_containers
        .iter()
        .find(|c| !OMITTABLE_CONTAINERS.contains(&c.as_str()))
    {
        return Err(ConfigError::invalid(
            "omit_containers",
            format!("'{bad}' cannot be omitted; valid: {}", OMITTABLE_CONTAINERS.join(", ")),
        ));
    }

    if let Some(tz) = cfg.timezone.as_deref().filter(|t| !t.is_empty()) {
        validate_timezone(tz, Path::new(ZONEINFO_DIR))?;
    }

    for dir in &cfg.upload_dirs {
        let candidate = project.docroot_path().join(dir);
        if Path::new(dir).is_absolute() || !is_contained(&project.approot, &candidate) {
            return Err(ConfigError::invalid(
                "upload_dirs",
                format!("'{dir}' escapes the project root"),
            ));
        }
    }

    for port in &cfg.web_extra_exposed_ports {
        if port.name.trim().is_empty() {
            return Err(ConfigError::invalid("web_extra_exposed_ports", "every entry needs a name"));
        }
    }

    validate_pre_start(&cfg.hooks)?;
    Ok(())
}

/// Only checked where a zoneinfo database is present to check against.
fn validate_timezone(tz: &str, zoneinfo: &Path) -> Result<(), ConfigError> {
    if !zoneinfo.is_dir() {
        return Ok(());
    }
    let path = zoneinfo.join(tz);
    if tz.contains("..") || !path.is_file() {
        return Err(ConfigError::invalid(
            "timezone",
            format!("'{tz}' is not a known timezone"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::GlobalConfig;
    use crate::hooks::Task;
    use crate::model::ProjectConfig;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn project(name: &str) -> Project {
        Project::new("/srv/alpha", ProjectConfig::with_name(name), GlobalConfig::default())
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_project(&project("alpha")).is_ok());
    }

    #[test]
    fn test_bad_name() {
        let err = validate_project(&project("bad_name")).unwrap_err();
        assert!(err.to_string().contains("name"));
        assert!(validate_project(&project("-lead")).is_err());
    }

    #[test]
    fn test_default_tld_hostnames_rejected() {
        let mut p = project("alpha");
        p.config.additional_fqdns = vec!["ddev.site".into()];
        assert!(validate_project(&p).is_err());

        let mut p = project("alpha");
        p.config.additional_fqdns = vec!["*.ddev.site".into()];
        assert!(validate_project(&p).is_err());

        let mut p = project("alpha");
        p.config.additional_hostnames = vec!["*.api".into()];
        assert!(validate_project(&p).is_ok());
    }

    #[test]
    fn test_enumerations() {
        let mut p = project("alpha");
        p.config.app_type = "joomla".into();
        assert!(validate_project(&p).is_err());

        let mut p = project("alpha");
        p.config.php_version = "9.0".into();
        assert!(validate_project(&p).is_err());

        let mut p = project("alpha");
        p.config.nodejs_version = "latest-ish".into();
        assert!(validate_project(&p).is_err());

        let mut p = project("alpha");
        p.config.database.version = "3.23".into();
        assert!(validate_project(&p).is_err());

        let mut p = project("alpha");
        p.config.omit_containers = vec!["web".into()];
        assert!(validate_project(&p).is_err());
    }

    #[test]
    fn test_upload_dir_escape() {
        let mut p = project("alpha");
        p.config.docroot = "web".into();
        p.config.upload_dirs = vec!["sites/default/files".into(), "../private".into()];
        assert!(validate_project(&p).is_ok());

        p.config.upload_dirs.push("../../etc".into());
        let err = validate_project(&p).unwrap_err();
        assert!(err.to_string().contains("upload_dirs"));
    }

    #[test]
    fn test_pre_start_container_task_rejected() {
        let mut p = project("alpha");
        p.config.hooks.insert("pre-start".into(), vec![Task::exec("drush cr")]);
        assert!(validate_project(&p).is_err());
    }

    #[test]
    fn test_timezone_check_uses_zoneinfo() {
        let zoneinfo = TempDir::new().unwrap();
        std::fs::create_dir_all(zoneinfo.path().join("Europe")).unwrap();
        std::fs::write(zoneinfo.path().join("Europe/Berlin"), "TZif").unwrap();
        assert!(validate_timezone("Europe/Berlin", zoneinfo.path()).is_ok());
        assert!(validate_timezone("Mars/Olympus", zoneinfo.path()).is_err());
        assert!(validate_timezone("Mars/Olympus", &zoneinfo.path().join("absent")).is_ok());
    }

    proptest! {
        #[test]
        fn prop_valid_upload_dirs_stay_inside_approot(
            docroot in "(web|public|)",
            parts in prop::collection::vec("(\\.\\.|[a-z]{1,5})", 1..5),
        ) {
            let mut p = project("alpha");
            p.config.docroot = docroot;
            p.config.upload_dirs = vec![parts.join("/")];
            if validate_project(&p).is_ok() {
                let joined = p.docroot_path().join(&p.config.upload_dirs[0]);
                let normalized = berth_utils::paths::normalize_lexically(&joined);
                prop_assert!(normalized.starts_with(&p.approot));
            }
        }
    }
}
