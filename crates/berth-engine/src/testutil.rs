//! Fixtures shared by the engine's unit tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use berth_config::{GlobalConfig, Project, ProjectConfig, ProjectRegistry};
use berth_runner::{FakeRunner, ProcessOutput};
use berth_utils::paths::{self, HomeGuard};

use crate::docker::{LABEL_APPROOT, LABEL_SITE_NAME};
use crate::engine::Engine;
use crate::hostuser::HostUser;
use crate::netutil::StaticPortProbe;
use crate::router::DirRouterStore;

/// `docker inspect` state of a running, healthy container.
pub const RUNNING_HEALTHY: &str =
    r#"{"Status":"running","Running":true,"Paused":false,"Health":{"Status":"healthy","Log":[]}}"#;

/// Engine over a fake runner with an isolated global directory, no busy
/// ports and a host-directory router store.
pub fn fake_engine() -> (Arc<FakeRunner>, Engine, HomeGuard) {
    let home = paths::with_isolated_home();
    let fake = Arc::new(FakeRunner::new());
    let engine = Engine::new(fake.clone())
        .with_registry(ProjectRegistry::new(home.path().join("project_list.yaml")))
        .with_port_probe(Arc::new(StaticPortProbe::default()))
        .with_router_store(Arc::new(DirRouterStore::new(home.path().join("router-volume"))))
        .with_host_user(HostUser {
            uid: 501,
            gid: 20,
            username: "dev".into(),
        })
        .with_poll_interval(Duration::ZERO);
    (fake, engine, home)
}

pub fn project_at(root: &Path, name: &str) -> Project {
    Project::new(root, ProjectConfig::with_name(name), GlobalConfig::default())
}

/// Like [`project_at`] with `config.yaml` written to disk.
pub fn configured_project(root: &Path, name: &str) -> Project {
    let project = project_at(root, name);
    std::fs::create_dir_all(project.config_dir()).unwrap();
    std::fs::write(project.config_path(), format!("name: {name}\n")).unwrap();
    project
}

/// One `docker ps --format '{{json .}}'` line for a project's web container.
pub fn ps_line(name: &str, root: &Path, state: &str) -> String {
    format!(
        "{{\"Names\":\"ddev-{name}-web\",\"State\":\"{state}\",\"Labels\":\"{LABEL_SITE_NAME}={name},{LABEL_APPROOT}={}\"}}\n",
        root.display()
    )
}

/// Canonical compose document for a routed web service plus a db.
pub fn canonical_compose(name: &str) -> String {
    format!(
        "name: ddev-{name}\nservices:\n  web:\n    container_name: ddev-{name}-web\n    environment:\n      \
         VIRTUAL_HOST: {name}.ddev.site\n      HTTP_EXPOSE: \"80:80\"\n      HTTPS_EXPOSE: \"443:80\"\n      \
         DDEV_ROUTER_HTTP_PORT: \"80\"\n      DDEV_ROUTER_HTTPS_PORT: \"443\"\n  \
         db:\n    container_name: ddev-{name}-db\n"
    )
}

/// Script a successful start: every container healthy and `compose config`
/// answering with [`canonical_compose`].
pub fn script_start(fake: &FakeRunner, name: &str) {
    fake.on(&["inspect"], ProcessOutput::ok(RUNNING_HEALTHY));
    let project = format!("ddev-{name}");
    fake.on(&[project.as_str(), " config"], ProcessOutput::ok(canonical_compose(name)));
}
