//! Loading, merging, upgrading and writing `config.yaml`.

use globset::{Glob, GlobMatcher};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

use berth_utils::atomic_write::write_file_atomic;
use berth_utils::error::{BerthError, ConfigError};
use berth_utils::paths;

use crate::apptypes;
use crate::dbtypes::{DatabaseDesc, DbEngine};
use crate::global::GlobalConfig;
use crate::hooks::validate_hooks_value;
use crate::model::{PerformanceMode, ProjectConfig};
use crate::project::Project;
use crate::registry::ProjectRegistry;
use crate::validate::validate_project;

const CONFIG_FILE: &str = "config.yaml";

/// Keys written even when they hold the default value.
const ALWAYS_WRITTEN: &[&str] = &["name", "type", "docroot"];

fn override_matcher() -> Result<GlobMatcher, ConfigError> {
    Glob::new("config.*.{yaml,yml}")
        .map(|g| g.compile_matcher())
        .map_err(|e| ConfigError::invalid("override glob", e.to_string()))
}

/// Override files next to `config.yaml`, in lexical order.
pub fn override_files(config_dir: &Path) -> Result<Vec<PathBuf>, BerthError> {
    let matcher = override_matcher()?;
    let entries = match std::fs::read_dir(config_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| p.file_name().is_some_and(|n| matcher.is_match(n)))
        .collect();
    files.sort();
    Ok(files)
}

fn read_document(path: &Path) -> Result<Mapping, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if content.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mapping = match value {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => {
            return Err(ConfigError::Parse {
                path: path.display().to_string(),
                reason: "top level must be a mapping".to_string(),
            });
        }
    };
    if let Some(hooks) = mapping.get("hooks") {
        validate_hooks_value(hooks)?;
    }
    Ok(mapping)
}

/// Merge `overlay` into `base` key-wise, new keys appended, existing keys
/// replaced in place. Entries without `=` are ignored.
pub fn merge_web_environment(base: &mut Vec<String>, overlay: &[String]) {
    for entry in overlay {
        let Some((key, _)) = entry.split_once('=') else {
            tracing::debug!(entry = %entry, "ignoring web_environment entry without '='");
            continue;
        };
        let existing = base
            .iter()
            .position(|e| e.split_once('=').is_some_and(|(k, _)| k == key));
        match existing {
            Some(i) => base[i] = entry.clone(),
            None => base.push(entry.clone()),
        }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_sequence()
        .map(|seq| {
            seq.iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Merge one override document on top of `base`.
///
/// Scalars and whole collections replace; `web_environment` merges by key.
pub fn merge_documents(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        if key.as_str() == Some("web_environment") {
            let mut env = base.get(&key).map(string_list).unwrap_or_default();
            merge_web_environment(&mut env, &string_list(&value));
            base.insert(key, Value::Sequence(env.into_iter().map(Value::String).collect()));
        } else {
            base.insert(key, value);
        }
    }
}

/// Load `approot/.project-config/config.yaml` plus optional overrides.
///
/// A missing `config.yaml` yields defaults named after the approot.
pub fn load_config(
    approot: &Path,
    include_overrides: bool,
) -> Result<(ProjectConfig, Vec<PathBuf>), BerthError> {
    let config_dir = paths::project_config_dir(approot);
    let config_path = config_dir.join(CONFIG_FILE);
    let default_name = default_project_name(approot);

    if !config_path.is_file() {
        tracing::debug!(path = %config_path.display(), "no config.yaml, using defaults");
        return Ok((ProjectConfig::with_name(default_name), Vec::new()));
    }

    let mut merged = read_document(&config_path)?;
    let mut loaded = vec![config_path.clone()];
    if include_overrides {
        for file in override_files(&config_dir)? {
            let overlay = read_document(&file)?;
            merge_documents(&mut merged, overlay);
            tracing::debug!(file = %file.display(), "merged config override");
            loaded.push(file);
        }
    }

    // An explicit null means "unset", same as leaving the key out.
    merged.retain(|_, v| !v.is_null());
    let mut config: ProjectConfig =
        serde_yaml::from_value(Value::Mapping(merged)).map_err(|e| ConfigError::Parse {
            path: config_path.display().to_string(),
            reason: e.to_string(),
        })?;
    upgrade_legacy(&mut config);
    let env = std::mem::take(&mut config.web_environment);
    merge_web_environment(&mut config.web_environment, &env);
    if config.name.trim().is_empty() {
        config.name = default_name;
    }
    Ok((config, loaded))
}

fn default_project_name(approot: &Path) -> String {
    approot
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase().replace(['_', ' ', '.'], "-"))
        .unwrap_or_else(|| "project".to_string())
}

/// Fold legacy fields into their current replacements.
pub fn upgrade_legacy(config: &mut ProjectConfig) {
    if let Some(v) = config.mariadb_version.take().filter(|v| !v.is_empty()) {
        config.database = DatabaseDesc::new(DbEngine::Mariadb, v);
    }
    if let Some(v) = config.mysql_version.take().filter(|v| !v.is_empty()) {
        config.database = DatabaseDesc::new(DbEngine::Mysql, v);
    }
    if config.database.version.trim().is_empty() {
        config.database.version = config.database.engine.default_version().to_string();
    }
    if let Some(dir) = config.upload_dir.take().filter(|d| !d.is_empty()) {
        if !config.upload_dirs.contains(&dir) {
            config.upload_dirs.insert(0, dir);
        }
    }
    if config.performance_mode == PerformanceMode::Global {
        if config.mutagen_enabled.take() == Some(true) {
            config.performance_mode = PerformanceMode::Mutagen;
        } else if config.nfs_mount_enabled.take() == Some(true) {
            config.performance_mode = PerformanceMode::Nfs;
        }
    }
    config.mutagen_enabled = None;
    config.nfs_mount_enabled = None;
    for c in &mut config.omit_containers {
        if c == "router" {
            *c = "ddev-router".to_string();
        }
    }
}

impl Project {
    /// Load the project rooted at `approot`.
    pub fn load(
        approot: impl Into<PathBuf>,
        include_overrides: bool,
        global: GlobalConfig,
    ) -> Result<Self, BerthError> {
        let approot = approot.into();
        let (config, loaded_files) = load_config(&approot, include_overrides)?;
        Ok(Self {
            approot,
            config,
            global,
            loaded_files,
        })
    }

    /// Apply the type's config override and write `config.yaml`.
    pub fn configure(&mut self, registry: &ProjectRegistry) -> Result<PathBuf, BerthError> {
        if let Some(bundle) = apptypes::lookup(&self.config.app_type) {
            bundle.config_override(&mut self.config, &self.approot)?;
        }
        write_config(self, registry)
    }
}

/// Render the config document, leaving out values equal to the defaults.
pub fn render_config(config: &ProjectConfig) -> Result<String, BerthError> {
    let to_mapping = |c: &ProjectConfig| -> Result<Mapping, BerthError> {
        match serde_yaml::to_value(c) {
            Ok(Value::Mapping(m)) => Ok(m),
            Ok(_) => Err(BerthError::internal("config did not serialize to a mapping")),
            Err(e) => Err(BerthError::internal(format!("serialize config: {e}"))),
        }
    };
    let defaults = to_mapping(&ProjectConfig::with_name(config.name.clone()))?;
    let mut doc = to_mapping(config)?;
    doc.retain(|key, value| {
        let always = key.as_str().is_some_and(|k| ALWAYS_WRITTEN.contains(&k));
        always || (!value.is_null() && defaults.get(&*key) != Some(&*value))
    });
    serde_yaml::to_string(&doc).map_err(|e| BerthError::internal(format!("serialize config: {e}")))
}

/// Trailing run of comment and blank lines in an existing document.
fn trailing_comment_block(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines
        .iter()
        .rposition(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .map_or(0, |i| i + 1);
    let tail: Vec<&str> = lines[start..]
        .iter()
        .copied()
        .skip_while(|l| l.trim().is_empty())
        .collect();
    if tail.is_empty() {
        String::new()
    } else {
        format!("{}\n", tail.join("\n"))
    }
}

/// Validate, reserve ports, then write `config.yaml`.
///
/// A first write appends the type's hook suggestions as a comment block;
/// later writes keep whatever trailing comments the file already has.
pub fn write_config(project: &Project, registry: &ProjectRegistry) -> Result<PathBuf, BerthError> {
    validate_project(project)?;
    registry.reserve(project.name(), &project.approot, &project.reserved_ports())?;

    let path = project.config_path();
    paths::ensure_dir_all(project.config_dir())?;
    let tail = match std::fs::read_to_string(&path) {
        Ok(existing) => trailing_comment_block(&existing),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => apptypes::lookup(&project.config.app_type)
            .map(|b| b.hook_suggestions().to_string())
            .unwrap_or_default(),
        Err(e) => return Err(e.into()),
    };

    let mut content = render_config(&project.config)?;
    if !tail.is_empty() {
        content.push('\n');
        content.push_str(&tail);
    }
    write_file_atomic(&path, &content)?;
    tracing::info!(project = %project.name(), path = %path.display(), "wrote project config");
    Ok(path)
}

/// Walk upward from `start` to the first directory holding a project config.
#[must_use]
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let start = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(start)
    };
    start
        .ancestors()
        .find(|dir| paths::project_config_dir(dir).join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
}
