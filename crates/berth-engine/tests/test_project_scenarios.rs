//! End-to-end project flows against a scripted container engine.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use berth_config::{GlobalConfig, Project, ProjectConfig, ProjectRegistry};
use berth_engine::router::{DirRouterStore, RoutingEntry, Upstream};
use berth_engine::{Engine, HostUser, PortProbe, SiteStatus};
use berth_runner::{FakeRunner, ProcessOutput};
use berth_utils::ErrorKind;
use berth_utils::paths::{self, HomeGuard};
use tempfile::TempDir;

const HEALTHY: &str = r#"{"Status":"running","Running":true,"Paused":false,"Health":{"Status":"healthy","Log":[]}}"#;

struct NothingListening;

impl PortProbe for NothingListening {
    fn is_active(&self, _port: u16) -> bool {
        false
    }
}

fn engine() -> (Arc<FakeRunner>, Engine, HomeGuard) {
    let home = paths::with_isolated_home();
    let fake = Arc::new(FakeRunner::new());
    let engine = Engine::new(fake.clone())
        .with_registry(ProjectRegistry::new(home.path().join("project_list.yaml")))
        .with_port_probe(Arc::new(NothingListening))
        .with_router_store(Arc::new(DirRouterStore::new(home.path().join("router-volume"))))
        .with_host_user(HostUser {
            uid: 1000,
            gid: 1000,
            username: "dev".into(),
        })
        .with_poll_interval(Duration::ZERO);
    (fake, engine, home)
}

fn project(root: &Path, name: &str) -> Project {
    let p = Project::new(root, ProjectConfig::with_name(name), GlobalConfig::default());
    std::fs::create_dir_all(p.config_dir()).unwrap();
    std::fs::write(p.config_path(), format!("name: {name}\n")).unwrap();
    p
}

fn ps(entries: &[(&str, &Path)]) -> String {
    entries
        .iter()
        .map(|(name, root)| {
            format!(
                "{{\"Names\":\"ddev-{name}-web\",\"State\":\"running\",\"Labels\":\"com.ddev.site-name={name},com.ddev.approot={}\"}}\n",
                root.display()
            )
        })
        .collect()
}

fn compose_config(name: &str, extra: &str) -> String {
    format!(
        "name: ddev-{name}\nservices:\n  web:\n    container_name: ddev-{name}-web\n    environment:\n      \
         VIRTUAL_HOST: {name}.ddev.site\n      HTTP_EXPOSE: \"80:80\"\n      \
         DDEV_ROUTER_HTTP_PORT: \"80\"\n      DDEV_ROUTER_HTTPS_PORT: \"443\"\n  \
         db:\n    container_name: ddev-{name}-db\n{extra}"
    )
}

#[test]
fn test_extra_service_is_routed_by_its_own_port() {
    let (fake, engine, home) = engine();
    let root = TempDir::new().unwrap();
    let shop = project(root.path(), "shop");
    fake.on(&["inspect"], ProcessOutput::ok(HEALTHY));
    fake.on(
        &["ddev-shop", " config"],
        ProcessOutput::ok(compose_config(
            "shop",
            "  extra:\n    container_name: ddev-shop-extra\n    environment:\n      \
             VIRTUAL_HOST: extra.dev.test\n      HTTP_EXPOSE: \"8080:80\"\n",
        )),
    );
    fake.on(&["ps", "-a"], ProcessOutput::ok(ps(&[("shop", root.path())])));

    engine.start(&shop).unwrap();

    let (table, _) = engine.routing_table(&shop.global).unwrap();
    assert!(table.routes["shop"].contains(&RoutingEntry {
        hostnames: vec!["extra.dev.test".into()],
        external_port: 8080,
        service: Upstream {
            name: "extra-80".into(),
            service: "extra".into(),
            port: 80,
        },
        https: false,
    }));
    assert!(table.ports.contains(&8080));

    let fragment = std::fs::read_to_string(home.path().join("router-volume/config/shop.yaml")).unwrap();
    assert!(fragment.contains("extra.dev.test"));
    assert!(fragment.contains("ddev-shop-extra:80"));
    let router_compose = std::fs::read_to_string(paths::global_dir().join(".router-compose.yaml")).unwrap();
    assert!(router_compose.contains(":8080:8080\""), "{router_compose}");
    assert!(fake.was_run(&["compose", "-p", "ddev-router", "up", "--build", "-d"]));
}

#[test]
fn test_conflicting_router_port_leaves_first_project_routed() {
    let (fake, engine, home) = engine();
    let r1 = TempDir::new().unwrap();
    let r2 = TempDir::new().unwrap();
    let mut p1 = project(r1.path(), "p1");
    let mut p2 = project(r2.path(), "p2");
    p1.config.router_http_port = Some(80);
    p2.config.router_http_port = Some(80);
    fake.on(&["inspect"], ProcessOutput::ok(HEALTHY));
    fake.on(&["ddev-p1", " config"], ProcessOutput::ok(compose_config("p1", "")));
    fake.on(&["ps", "-a"], ProcessOutput::ok(ps(&[("p1", r1.path())])));

    engine.start(&p1).unwrap();
    let err = engine.start(&p2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PortInUse);

    assert_eq!(engine.status(&p1).unwrap(), SiteStatus::Running);
    let (table, _) = engine.routing_table(&p1.global).unwrap();
    assert_eq!(table.routes.keys().collect::<Vec<_>>(), vec!["p1"]);
    let volume = home.path().join("router-volume/config");
    assert!(volume.join("p1.yaml").is_file());
    assert!(!volume.join("p2.yaml").exists());
}

#[test]
fn test_restore_of_other_version_changes_nothing() {
    let (fake, engine, _home) = engine();
    let root = TempDir::new().unwrap();
    let alpha = project(root.path(), "alpha");
    let snapshots = alpha.config_file("db_snapshots");
    std::fs::create_dir_all(&snapshots).unwrap();
    std::fs::write(snapshots.join("morning-mariadb_10.4.gz"), b"\x1f\x8b").unwrap();

    let err = engine.restore_snapshot(&alpha, "morning").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotIncompatible);
    let msg = err.to_string();
    assert!(msg.contains("mariadb:10.4"), "{msg}");
    assert!(msg.contains("mariadb:10.11"), "{msg}");
    assert!(fake.calls().is_empty());
    assert!(snapshots.join("morning-mariadb_10.4.gz").is_file());
}

#[test]
fn test_stopped_project_routes_are_evicted() {
    let (fake, engine, home) = engine();
    let ra = TempDir::new().unwrap();
    let rb = TempDir::new().unwrap();
    let a = project(ra.path(), "a");
    let b = project(rb.path(), "b");
    fake.on(&["inspect"], ProcessOutput::ok(HEALTHY));
    fake.on(&["ddev-a", " config"], ProcessOutput::ok(compose_config("a", "")));
    fake.on(&["ddev-b", " config"], ProcessOutput::ok(compose_config("b", "")));

    fake.on(&["ps", "-a"], ProcessOutput::ok(ps(&[("a", ra.path())])));
    engine.start(&a).unwrap();
    fake.on(&["ps", "-a"], ProcessOutput::ok(ps(&[("a", ra.path()), ("b", rb.path())])));
    engine.start(&b).unwrap();

    let volume = home.path().join("router-volume/config");
    assert!(volume.join("a.yaml").is_file());
    assert!(volume.join("b.yaml").is_file());

    fake.on(&["ps", "-a"], ProcessOutput::ok(ps(&[("b", rb.path())])));
    engine.stop(&a, false, false).unwrap();
    assert!(!volume.join("a.yaml").exists());
    assert!(volume.join("b.yaml").is_file());
    assert!(!fake.was_run(&["rm", "-f", "ddev-router"]));
}
