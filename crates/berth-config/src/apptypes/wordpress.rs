use std::fs;
use std::path::{Path, PathBuf};

use berth_utils::error::BerthError;
use berth_utils::signature::{SIGNATURE, write_if_owned};

use super::{AppTypeBundle, DbConnection, project_salt};
use crate::project::Project;

const SETTINGS_INCLUDE_FILE: &str = "wp-config-berth.php";

const HOOK_SUGGESTIONS: &str = "\
# Hook examples for this project type:
# hooks:
#   post-import-db:
#     # Replace the production URL with the local one after import.
#     - exec: wp search-replace <production-url> <local-url>
";

const SALT_KEYS: &[&str] = &[
    "AUTH_KEY",
    "SECURE_AUTH_KEY",
    "LOGGED_IN_KEY",
    "NONCE_KEY",
    "AUTH_SALT",
    "SECURE_AUTH_SALT",
    "LOGGED_IN_SALT",
    "NONCE_SALT",
];

pub(super) fn bundle() -> AppTypeBundle {
    AppTypeBundle {
        detect: Some(detect),
        write_settings: Some(write_settings),
        upload_dirs: Some(|_| vec!["wp-content/uploads".to_string()]),
        hook_suggestions: Some(HOOK_SUGGESTIONS),
        ..AppTypeBundle::bare("wordpress")
    }
}

fn detect(_approot: &Path, docroot: &Path) -> bool {
    docroot.join("wp-settings.php").is_file()
}

fn render_include(project: &Project) -> String {
    let db = DbConnection::for_project(project);
    let mut out = format!(
        "<?php\n/**\n * {SIGNATURE}: Automatically generated WordPress settings file.\n * berth manages this file and may overwrite it unless this comment is removed.\n */\n\n"
    );
    out.push_str(&format!(
        "defined( 'DB_NAME' ) || define( 'DB_NAME', '{}' );\n\
defined( 'DB_USER' ) || define( 'DB_USER', '{}' );\n\
defined( 'DB_PASSWORD' ) || define( 'DB_PASSWORD', '{}' );\n\
defined( 'DB_HOST' ) || define( 'DB_HOST', '{}' );\n\
defined( 'WP_HOME' ) || define( 'WP_HOME', '{}' );\n\
defined( 'WP_SITEURL' ) || define( 'WP_SITEURL', WP_HOME . '/' );\n\
defined( 'WP_DEBUG' ) || define( 'WP_DEBUG', true );\n",
        db.name,
        db.user,
        db.password,
        db.host,
        project.primary_url(None),
    ));
    out
}

fn render_wp_config(project: &Project) -> String {
    let mut out = format!(
        "<?php\n/**\n * {SIGNATURE}: Automatically generated WordPress wp-config.php file.\n * berth manages this file and may overwrite it unless this comment is removed.\n */\n\n\
if ( file_exists( __DIR__ . '/{SETTINGS_INCLUDE_FILE}' ) && getenv( 'IS_DDEV_PROJECT' ) == 'true' ) {{\n\
  include __DIR__ . '/{SETTINGS_INCLUDE_FILE}';\n}}\n\n"
    );
    for key in SALT_KEYS {
        let salt = project_salt(project, key);
        out.push_str(&format!("define( '{key}', '{salt}' );\n"));
    }
    out.push_str("\n$table_prefix = 'wp_';\n\n");
    out.push_str("defined( 'ABSPATH' ) || define( 'ABSPATH', dirname( __FILE__ ) . '/' );\n");
    out.push_str("require_once ABSPATH . 'wp-settings.php';\n");
    out
}

fn write_settings(project: &Project) -> Result<Option<PathBuf>, BerthError> {
    let docroot = project.docroot_path();
    berth_utils::paths::ensure_dir_all(&docroot)?;

    let include_path = docroot.join(SETTINGS_INCLUDE_FILE);
    write_if_owned(&include_path, &render_include(project))?;

    let config_path = docroot.join("wp-config.php");
    let existing = match fs::read_to_string(&config_path) {
        Ok(c) => Some(c),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    match existing {
        Some(c) if !c.contains(SIGNATURE) => {
            if !c.contains(SETTINGS_INCLUDE_FILE) {
                tracing::warn!(
                    path = %config_path.display(),
                    "wp-config.php is user-managed; include {SETTINGS_INCLUDE_FILE} from it to use berth's database settings"
                );
            }
        }
        _ => {
            write_if_owned(&config_path, &render_wp_config(project))?;
        }
    }
    Ok(Some(config_path))
}
