use std::fs;
use std::path::{Path, PathBuf};

use berth_utils::error::{BerthError, ConfigError};
use berth_utils::signature::{SIGNATURE, WriteOutcome, write_if_owned};

use super::{AppTypeBundle, DbConnection, project_salt};
use crate::model::ProjectConfig;
use crate::project::Project;

const SETTINGS_INCLUDE_FILE: &str = "settings.berth.php";

const HOOK_SUGGESTIONS: &str = "\
# Hook examples for this project type:
# hooks:
#   post-start:
#     - exec: drush cr
#   post-import-db:
#     - exec: drush updb -y
";

const INCLUDE_STANZA: &str = "
// Automatically generated include for settings managed by berth.
$berth_settings = dirname(__FILE__) . '/settings.berth.php';
if (getenv('IS_DDEV_PROJECT') == 'true' && is_readable($berth_settings)) {
  require $berth_settings;
}
";

pub(super) fn bundle() -> AppTypeBundle {
    AppTypeBundle {
        detect: Some(detect),
        write_settings: Some(write_settings),
        upload_dirs: Some(|_| vec!["sites/default/files".to_string()]),
        hook_suggestions: Some(HOOK_SUGGESTIONS),
        config_override: Some(config_override),
        post_start: Some(post_start),
        ..AppTypeBundle::bare("drupal")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Generation {
    Legacy6,
    Legacy7,
    Modern,
}

fn generation(docroot: &Path) -> Option<Generation> {
    if docroot.join("core/lib/Drupal.php").is_file() {
        Some(Generation::Modern)
    } else if docroot.join("misc/ajax.js").is_file() {
        Some(Generation::Legacy7)
    } else if docroot.join("misc/ahah.js").is_file() {
        Some(Generation::Legacy6)
    } else {
        None
    }
}

fn detect(_approot: &Path, docroot: &Path) -> bool {
    generation(docroot).is_some()
}

/// Drupal 6 does not run on PHP 7+.
fn config_override(config: &mut ProjectConfig, approot: &Path) -> Result<(), ConfigError> {
    if generation(&approot.join(&config.docroot)) == Some(Generation::Legacy6) {
        config.php_version = "5.6".to_string();
    }
    Ok(())
}

fn sites_default(project: &Project) -> PathBuf {
    project.docroot_path().join("sites/default")
}

fn render_settings(project: &Project, generation: Generation) -> String {
    let db = DbConnection::for_project(project);
    let salt = project_salt(project, "drupal-hash-salt");
    let mut out = format!(
        "<?php\n\n/**\n * @file\n * {SIGNATURE}: Automatically generated Drupal settings file.\n * berth manages this file and may overwrite it unless this comment is removed.\n */\n\n\
$databases['default']['default'] = array(\n  'database' => \"{name}\",\n  'username' => \"{user}\",\n  'password' => \"{password}\",\n  'host' => \"{host}\",\n  'driver' => \"{driver}\",\n  'port' => {port},\n  'prefix' => \"\",\n);\n\n",
        name = db.name,
        user = db.user,
        password = db.password,
        host = db.host,
        driver = db.driver,
        port = db.port,
    );
    match generation {
        Generation::Modern => {
            out.push_str(&format!("$settings['hash_salt'] = '{salt}';\n"));
            out.push_str("$settings['skip_permissions_hardening'] = TRUE;\n");
            out.push_str("$settings['trusted_host_patterns'] = ['.*'];\n");
            out.push_str("$settings['class_loader_auto_detect'] = FALSE;\n");
            out.push_str(
                "if (empty($settings['config_sync_directory'])) {\n  $settings['config_sync_directory'] = 'sites/default/files/sync';\n}\n",
            );
        }
        Generation::Legacy7 | Generation::Legacy6 => {
            out.push_str(&format!("$drupal_hash_salt = '{salt}';\n"));
        }
    }
    out
}

fn write_settings(project: &Project) -> Result<Option<PathBuf>, BerthError> {
    let generation = generation(&project.docroot_path()).unwrap_or(Generation::Modern);
    let dir = sites_default(project);
    berth_utils::paths::ensure_dir_all(&dir)?;

    let include_path = dir.join(SETTINGS_INCLUDE_FILE);
    write_if_owned(&include_path, &render_settings(project, generation))?;

    let settings_path = dir.join("settings.php");
    match fs::read_to_string(&settings_path) {
        Ok(existing) => {
            if !existing.contains(SETTINGS_INCLUDE_FILE) {
                tracing::info!(path = %settings_path.display(), "adding berth settings include");
                let mut updated = existing;
                updated.push_str(INCLUDE_STANZA);
                berth_utils::atomic_write::write_file_atomic(&settings_path, &updated)?;
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let content = format!(
                "<?php\n\n// {SIGNATURE}: Automatically generated settings.php.\n{INCLUDE_STANZA}"
            );
            if write_if_owned(&settings_path, &content)? == WriteOutcome::UserManaged {
                return Ok(Some(include_path));
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Some(settings_path))
}

/// Drupal hardens sites/default to read-only, which breaks host-side edits.
fn post_start(project: &Project) -> Result<(), BerthError> {
    let dir = sites_default(project);
    if !dir.is_dir() {
        return Ok(());
    }
    make_writable(&dir, 0o755)?;
    if generation(&project.docroot_path()) == Some(Generation::Modern) {
        berth_utils::paths::ensure_dir_all(dir.join("files/sync"))?;
    }
    for name in ["settings.php", SETTINGS_INCLUDE_FILE] {
        let file = dir.join(name);
        if file.is_file() {
            make_writable(&file, 0o644)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_writable(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn make_writable(path: &Path, _mode: u32) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}
