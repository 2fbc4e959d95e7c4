//! Publication of the router's config tree.
//!
//! A host staging tree under `<global>/router` holds exactly the expected
//! files. Publication copies it into the router's store first and only then
//! removes whatever the store holds beyond the expected set, so a reader
//! never sees a route disappear before its replacement exists.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use berth_config::project::ROUTER_CONTAINER;
use berth_utils::error::BerthError;

use crate::docker::{Docker, GLOBAL_CACHE_VOLUME};
use crate::router::traefik::TRAEFIK_ROOT;

static PUBLISH: Mutex<()> = Mutex::new(());

/// Serializes derive, stage and swap within this process.
pub(crate) fn publish_guard() -> MutexGuard<'static, ()> {
    PUBLISH.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where the router reads its configuration from.
///
/// Paths are relative to the store root and use `/` separators.
pub trait RouterStore: Send + Sync {
    /// Copy the whole staging tree into the store, overwriting same-named files.
    fn copy_in(&self, staging: &Path) -> Result<(), BerthError>;
    /// Every file currently in the store.
    fn list_files(&self) -> Result<Vec<String>, BerthError>;
    /// Remove the given files.
    fn remove(&self, files: &[String]) -> Result<(), BerthError>;
}

/// Relative paths of every file below `root`.
pub fn staged_files(root: &Path) -> Result<BTreeSet<String>, BerthError> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeSet<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(root, &path, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.insert(rel.join("/"));
            }
        }
        Ok(())
    }
    let mut out = BTreeSet::new();
    if root.is_dir() {
        walk(root, root, &mut out)?;
    }
    Ok(out)
}

/// Copy `staging` into `store`, then evict every stored file not staged.
pub fn publish(store: &dyn RouterStore, staging: &Path) -> Result<Vec<String>, BerthError> {
    let expected = staged_files(staging)?;
    store.copy_in(staging)?;
    let stale: Vec<String> = store
        .list_files()?
        .into_iter()
        .filter(|f| !expected.contains(f))
        .collect();
    if !stale.is_empty() {
        info!(files = ?stale, "evicting stale router files");
        store.remove(&stale)?;
    }
    debug!(files = expected.len(), "published router configuration");
    Ok(stale)
}

/// Store backed by a host directory.
#[derive(Debug, Clone)]
pub struct DirRouterStore {
    root: PathBuf,
}

impl DirRouterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    berth_utils::paths::ensure_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

impl RouterStore for DirRouterStore {
    fn copy_in(&self, staging: &Path) -> Result<(), BerthError> {
        copy_tree(staging, &self.root)?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>, BerthError> {
        Ok(staged_files(&self.root)?.into_iter().collect())
    }

    fn remove(&self, files: &[String]) -> Result<(), BerthError> {
        for f in files {
            match std::fs::remove_file(self.root.join(f)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Helper container used when the router is not running.
pub const HELPER_IMAGE: &str = "busybox:stable";
const HELPER_CONTAINER: &str = "ddev-router-config-helper";
const VOLUME_MOUNT: &str = "/mnt/ddev-global-cache";

/// Store inside the shared cache volume, reached through the router when it
/// runs and through a short-lived helper container otherwise.
#[derive(Debug, Clone)]
pub struct VolumeRouterStore {
    docker: Docker,
}

impl VolumeRouterStore {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    fn router_running(&self) -> Result<bool, BerthError> {
        Ok(self
            .docker
            .inspect_state(ROUTER_CONTAINER)?
            .is_some_and(|s| s.running))
    }

    /// Run `f` against a container that mounts the volume.
    fn with_container<T>(&self, f: impl FnOnce(&str) -> Result<T, BerthError>) -> Result<T, BerthError> {
        if self.router_running()? {
            return f(ROUTER_CONTAINER);
        }
        let _ = self.docker.remove_container(HELPER_CONTAINER);
        let create = self.docker.command().args([
            "run",
            "-d",
            "--name",
            HELPER_CONTAINER,
            "-v",
            &format!("{GLOBAL_CACHE_VOLUME}:{VOLUME_MOUNT}"),
            HELPER_IMAGE,
            "sleep",
            "300",
        ]);
        self.docker.capture(&create)?;
        let result = f(HELPER_CONTAINER);
        let _ = self.docker.remove_container(HELPER_CONTAINER);
        result
    }
}

impl RouterStore for VolumeRouterStore {
    fn copy_in(&self, staging: &Path) -> Result<(), BerthError> {
        self.with_container(|container| {
            let mkdir = self.docker.exec(
                container,
                &["mkdir".to_string(), "-p".to_string(), TRAEFIK_ROOT.to_string()],
                None,
            );
            self.docker.capture(&mkdir)?;
            // `docker cp dir/. c:dest` copies the contents rather than the directory.
            self.docker
                .copy_into(&staging.join("."), container, TRAEFIK_ROOT)
        })
    }

    fn list_files(&self) -> Result<Vec<String>, BerthError> {
        self.with_container(|container| {
            let find = self.docker.exec(
                container,
                &[
                    "find".to_string(),
                    TRAEFIK_ROOT.to_string(),
                    "-type".to_string(),
                    "f".to_string(),
                ],
                None,
            );
            let out = self.docker.capture(&find)?;
            let prefix = format!("{TRAEFIK_ROOT}/");
            Ok(out
                .lines()
                .filter_map(|l| l.trim().strip_prefix(&prefix))
                // ACME state is owned by the router.
                .filter(|f| *f != "acme.json")
                .map(str::to_string)
                .collect())
        })
    }

    fn remove(&self, files: &[String]) -> Result<(), BerthError> {
        if files.is_empty() {
            return Ok(());
        }
        self.with_container(|container| {
            let mut argv = vec!["rm".to_string(), "-f".to_string()];
            argv.extend(files.iter().map(|f| format!("{TRAEFIK_ROOT}/{f}")));
            self.docker.capture(&self.docker.exec(container, &argv, None))?;
            Ok(())
        })
    }
}
