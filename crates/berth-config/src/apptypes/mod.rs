//! Project-type registry.
//!
//! Each supported application type registers an [`AppTypeBundle`] of optional
//! capabilities. A missing capability is a no-op, so the rest of berth never
//! needs to know which CMS it is dealing with.

mod drupal;
mod simple;
mod wordpress;

use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use berth_utils::error::{BerthError, ConfigError};

use crate::model::ProjectConfig;
use crate::project::Project;

/// Type assumed when nothing more specific is configured or detected.
pub const DEFAULT_APP_TYPE: &str = "php";

pub type DetectFn = fn(approot: &Path, docroot: &Path) -> bool;
pub type SettingsFn = fn(&Project) -> Result<Option<PathBuf>, BerthError>;
pub type UploadDirsFn = fn(&Project) -> Vec<String>;
pub type ConfigOverrideFn = fn(&mut ProjectConfig, approot: &Path) -> Result<(), ConfigError>;
pub type PostStartFn = fn(&Project) -> Result<(), BerthError>;

/// Capabilities of one project type.
#[derive(Debug, Clone, Copy)]
pub struct AppTypeBundle {
    pub tag: &'static str,
    pub detect: Option<DetectFn>,
    pub write_settings: Option<SettingsFn>,
    pub upload_dirs: Option<UploadDirsFn>,
    pub hook_suggestions: Option<&'static str>,
    pub config_override: Option<ConfigOverrideFn>,
    pub post_start: Option<PostStartFn>,
}

impl AppTypeBundle {
    /// Bundle with every capability absent.
    pub const fn bare(tag: &'static str) -> Self {
        Self {
            tag,
            detect: None,
            write_settings: None,
            upload_dirs: None,
            hook_suggestions: None,
            config_override: None,
            post_start: None,
        }
    }

    #[must_use]
    pub fn detect(&self, approot: &Path, docroot: &Path) -> bool {
        self.detect.is_some_and(|f| f(approot, docroot))
    }

    /// Write the CMS settings include, unless settings management is off.
    pub fn write_settings(&self, project: &Project) -> Result<Option<PathBuf>, BerthError> {
        if project.config.disable_settings_management {
            return Ok(None);
        }
        match self.write_settings {
            Some(f) => f(project),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn upload_dirs(&self, project: &Project) -> Vec<String> {
        self.upload_dirs.map(|f| f(project)).unwrap_or_default()
    }

    #[must_use]
    pub fn hook_suggestions(&self) -> &'static str {
        self.hook_suggestions.unwrap_or_default()
    }

    pub fn config_override(&self, config: &mut ProjectConfig, approot: &Path) -> Result<(), ConfigError> {
        match self.config_override {
            Some(f) => f(config, approot),
            None => Ok(()),
        }
    }

    pub fn post_start(&self, project: &Project) -> Result<(), BerthError> {
        if project.config.disable_settings_management {
            return Ok(());
        }
        match self.post_start {
            Some(f) => f(project),
            None => Ok(()),
        }
    }
}

// Detection order matters: more specific frameworks come before the ones
// they are built on.
static REGISTRY: Lazy<Vec<AppTypeBundle>> = Lazy::new(|| {
    vec![
        drupal::bundle(),
        wordpress::bundle(),
        simple::typo3(),
        simple::shopware6(),
        simple::craftcms(),
        simple::codeigniter(),
        simple::laravel(),
        simple::symfony(),
        AppTypeBundle::bare("php"),
        AppTypeBundle::bare("generic"),
    ]
});

/// Every registered type tag.
#[must_use]
pub fn valid_types() -> BTreeSet<&'static str> {
    REGISTRY.iter().map(|b| b.tag).collect()
}

#[must_use]
pub fn is_valid(tag: &str) -> bool {
    REGISTRY.iter().any(|b| b.tag == tag)
}

#[must_use]
pub fn lookup(tag: &str) -> Option<&'static AppTypeBundle> {
    REGISTRY.iter().find(|b| b.tag == tag)
}

/// First type whose detector matches, else [`DEFAULT_APP_TYPE`].
#[must_use]
pub fn detect_app_type(approot: &Path, docroot: &str) -> &'static str {
    let docroot = approot.join(docroot);
    REGISTRY
        .iter()
        .find(|b| b.detect(approot, &docroot))
        .map_or(DEFAULT_APP_TYPE, |b| b.tag)
}

/// Stable per-project secret for generated settings files.
pub(crate) fn project_salt(project: &Project, purpose: &str) -> String {
    let mut out = String::with_capacity(64);
    for round in 0u8..4 {
        let mut h = DefaultHasher::new();
        project.name().hash(&mut h);
        project.approot.hash(&mut h);
        purpose.hash(&mut h);
        round.hash(&mut h);
        out.push_str(&format!("{:016x}", h.finish()));
    }
    out
}

/// Container-side database connection used by settings writers.
pub(crate) struct DbConnection {
    pub host: &'static str,
    pub name: &'static str,
    pub user: &'static str,
    pub password: &'static str,
    pub port: u16,
    pub driver: &'static str,
}

impl DbConnection {
    pub(crate) fn for_project(project: &Project) -> Self {
        let engine = project.database().engine;
        Self {
            host: "db",
            name: "db",
            user: "db",
            password: "db",
            port: engine.container_port(),
            driver: match engine {
                crate::dbtypes::DbEngine::Postgres => "pgsql",
                _ => "mysql",
            },
        }
    }
}
