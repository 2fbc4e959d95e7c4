//! CLI tests module
//!
//! Tests for argument parsing, project selection, `config` handling and
//! error rendering.

use super::args::{Cli, Commands, SnapshotCommands};
use super::commands::{ConfigFlags, Session, configure_project, render_description};
use super::run::render;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use berth_engine::lifecycle::ServiceDescription;
use berth_engine::{Description, RouterState, SiteStatus};
use berth_runner::FakeRunner;
use berth_utils::error::PortError;
use berth_utils::paths::{self, HomeGuard};
use berth_utils::{BerthError, ErrorKind, ExitCode};

fn session(cwd: PathBuf) -> (Session, HomeGuard) {
    let home = paths::with_isolated_home();
    let session = Session::new(Arc::new(FakeRunner::new()), false, Some(cwd)).unwrap();
    (session, home)
}

fn kind_of(err: &anyhow::Error) -> ErrorKind {
    err.downcast_ref::<BerthError>().map(BerthError::kind).unwrap()
}

#[test]
fn test_parse_stop_all() {
    let cli = Cli::try_parse_from(["berth", "stop", "--all", "--remove-data"]).unwrap();
    match cli.command {
        Commands::Stop {
            projects,
            all,
            remove_data,
            remove_images,
        } => {
            assert!(projects.is_empty());
            assert!(all && remove_data && !remove_images);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn test_names_and_all_conflict() {
    assert!(Cli::try_parse_from(["berth", "start", "shop", "--all"]).is_err());
    assert!(Cli::try_parse_from(["berth", "snapshot", "restore", "x", "--latest"]).is_err());
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["berth", "snapshot", "restore", "--latest", "-v", "--skip-hooks"]).unwrap();
    assert!(cli.verbose && cli.skip_hooks);
    assert!(matches!(
        cli.command,
        Commands::Snapshot(SnapshotCommands::Restore { name: None, latest: true })
    ));
}

#[test]
fn test_config_creates_project_from_directory_name() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("My_Shop");
    std::fs::create_dir_all(&root).unwrap();
    let (session, _home) = session(root.clone());

    let project = configure_project(&session, &root, ConfigFlags::default()).unwrap();
    assert_eq!(project.name(), "my-shop");
    assert_eq!(project.config.app_type, "php");
    assert!(project.config_path().is_file());
    assert!(session.engine.registry().get("my-shop").unwrap().is_some());

    let flags = ConfigFlags {
        database: Some("postgres:16".into()),
        ..ConfigFlags::default()
    };
    let project = configure_project(&session, &root, flags).unwrap();
    assert_eq!(project.name(), "my-shop");
    assert_eq!(project.database().to_string(), "postgres:16");
    assert_eq!(session.current_project().unwrap().database().to_string(), "postgres:16");
}

#[test]
fn test_config_rejects_unknown_type_and_database() {
    let tmp = TempDir::new().unwrap();
    let (session, _home) = session(tmp.path().to_path_buf());

    let flags = ConfigFlags {
        project_type: Some("cobol".into()),
        ..ConfigFlags::default()
    };
    let err = configure_project(&session, tmp.path(), flags).unwrap_err();
    assert_eq!(kind_of(&err), ErrorKind::ConfigInvalid);

    let flags = ConfigFlags {
        database: Some("oracle:23".into()),
        ..ConfigFlags::default()
    };
    let err = configure_project(&session, tmp.path(), flags).unwrap_err();
    assert_eq!(kind_of(&err), ErrorKind::ConfigInvalid);
    assert!(!tmp.path().join(".project-config/config.yaml").exists());
}

#[test]
fn test_selection_outside_a_project() {
    let tmp = TempDir::new().unwrap();
    let (session, _home) = session(tmp.path().to_path_buf());
    let err = session.select(&[], false).unwrap_err();
    assert_eq!(kind_of(&err), ErrorKind::ConfigNotFound);
    let err = session.select(&["ghost".to_string()], false).unwrap_err();
    assert_eq!(kind_of(&err), ErrorKind::ConfigNotFound);
    assert!(session.select(&[], true).unwrap().is_empty());
}

#[test]
fn test_render_port_error() {
    let err = BerthError::from(PortError::Busy { port: 80 }).in_op("start");
    let text = render(&err);
    assert!(text.starts_with("start: [Ports]"), "{text}");
    assert!(text.contains("80"));
    assert!(text.contains("→"));
    assert_eq!(ExitCode::from(&err), ExitCode::PORT_IN_USE);
}

#[test]
fn test_render_description() {
    let services = BTreeMap::from([(
        "db".to_string(),
        ServiceDescription {
            container: "ddev-shop-db".into(),
            status: "running (healthy)".into(),
            shell: "bash".into(),
            host_ports: vec!["3306->32768".into()],
            describe_url_port: None,
            describe_info: Some("mariadb:10.11".into()),
        },
    )]);
    let d = Description {
        name: "shop".into(),
        approot: PathBuf::from("/srv/shop"),
        app_type: "php".into(),
        docroot: "web".into(),
        status: SiteStatus::Running,
        primary_url: "https://shop.ddev.site".into(),
        urls: vec!["https://shop.ddev.site".into(), "http://shop.ddev.site".into()],
        database: "mariadb:10.11".into(),
        router: RouterState::Healthy,
        services,
    };
    let text = render_description(&d);
    assert!(text.contains("router:   healthy"));
    assert!(text.contains("            http://shop.ddev.site\n"));
    assert!(text.contains("db: running (healthy) [ddev-shop-db] ports 3306->32768 (mariadb:10.11)"));
    assert!(!text.contains("not running"));
}
