//! Types that only need detection, upload dirs and hook suggestions.

use std::fs;
use std::path::Path;

use berth_utils::error::ConfigError;

use super::AppTypeBundle;
use crate::model::ProjectConfig;

pub(super) fn typo3() -> AppTypeBundle {
    AppTypeBundle {
        detect: Some(|_, docroot| docroot.join("typo3").is_dir()),
        upload_dirs: Some(|_| vec!["fileadmin".to_string()]),
        hook_suggestions: Some(
            "\
# Hook examples for this project type:
# hooks:
#   post-start:
#     - exec: composer install -d /var/www/html
",
        ),
        ..AppTypeBundle::bare("typo3")
    }
}

pub(super) fn shopware6() -> AppTypeBundle {
    AppTypeBundle {
        detect: Some(|approot, _| {
            fs::read_to_string(approot.join("composer.json"))
                .is_ok_and(|c| c.contains(r#""name": "shopware/production""#))
        }),
        upload_dirs: Some(|_| vec!["media".to_string()]),
        hook_suggestions: Some(
            "\
# Hook examples for this project type:
# hooks:
#   post-start:
#     - exec: bin/console cache:clear
",
        ),
        ..AppTypeBundle::bare("shopware6")
    }
}

pub(super) fn craftcms() -> AppTypeBundle {
    AppTypeBundle {
        detect: Some(|approot, _| approot.join("craft").is_file()),
        upload_dirs: Some(|_| vec!["files".to_string()]),
        config_override: Some(craftcms_config_override),
        hook_suggestions: Some(
            "\
# Hook examples for this project type:
# hooks:
#   post-import-db:
#     - exec: php craft up
",
        ),
        ..AppTypeBundle::bare("craftcms")
    }
}

/// Craft serves from `web/` unless told otherwise.
fn craftcms_config_override(config: &mut ProjectConfig, _approot: &Path) -> Result<(), ConfigError> {
    if config.docroot.is_empty() {
        config.docroot = "web".to_string();
    }
    Ok(())
}

pub(super) fn codeigniter() -> AppTypeBundle {
    AppTypeBundle {
        detect: Some(|approot, _| {
            approot.join("spark").is_file()
                && approot.join("app/Config/App.php").is_file()
                && approot.join("public/index.php").is_file()
        }),
        upload_dirs: Some(|_| vec!["writable/uploads".to_string()]),
        ..AppTypeBundle::bare("codeigniter")
    }
}

pub(super) fn laravel() -> AppTypeBundle {
    AppTypeBundle {
        detect: Some(|approot, _| approot.join("artisan").is_file()),
        hook_suggestions: Some(
            "\
# Hook examples for this project type:
# hooks:
#   post-start:
#     - exec: php artisan migrate --force
",
        ),
        ..AppTypeBundle::bare("laravel")
    }
}

pub(super) fn symfony() -> AppTypeBundle {
    AppTypeBundle {
        detect: Some(|approot, _| approot.join("bin/console").is_file()),
        hook_suggestions: Some(
            "\
# Hook examples for this project type:
# hooks:
#   post-start:
#     - exec: bin/console cache:clear
",
        ),
        ..AppTypeBundle::bare("symfony")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_craftcms_defaults_docroot() {
        let mut cfg = ProjectConfig::with_name("craft");
        craftcms_config_override(&mut cfg, Path::new("/srv/craft")).unwrap();
        assert_eq!(cfg.docroot, "web");

        cfg.docroot = "public".into();
        craftcms_config_override(&mut cfg, Path::new("/srv/craft")).unwrap();
        assert_eq!(cfg.docroot, "public");
    }

    #[test]
    fn test_hook_suggestions_are_comments() {
        for bundle in [typo3(), shopware6(), craftcms(), laravel(), symfony()] {
            let text = bundle.hook_suggestions();
            assert!(!text.is_empty(), "{}", bundle.tag);
            assert!(text.lines().all(|l| l.starts_with('#')), "{}", bundle.tag);
        }
    }
}
