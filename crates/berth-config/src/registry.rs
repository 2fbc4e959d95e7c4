//! Global project catalogue and host-port registry: `<global-dir>/project_list.yaml`.
//!
//! Every read-modify-write happens under a [`FileLock`] so concurrent berth
//! processes never lose each other's reservations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use berth_lock::FileLock;
use berth_utils::atomic_write::write_file_atomic;
use berth_utils::error::{BerthError, PortError};
use berth_utils::paths;

const LOCK_WAIT: Duration = Duration::from_secs(10);

/// One catalogued project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub approot: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reserved_ports: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectEntry>,
}

impl ProjectList {
    /// Project other than `except` already holding `port`.
    #[must_use]
    pub fn owner_of(&self, port: u16, except: &str) -> Option<&str> {
        self.projects
            .iter()
            .find(|(name, entry)| name.as_str() != except && entry.reserved_ports.contains(&port))
            .map(|(name, _)| name.as_str())
    }
}

/// Handle on the on-disk registry.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    path: PathBuf,
}

impl Default for ProjectRegistry {
    fn default() -> Self {
        Self::global()
    }
}

impl ProjectRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry in the user's global directory.
    #[must_use]
    pub fn global() -> Self {
        Self::new(paths::project_list_path())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn lock(&self) -> Result<FileLock, BerthError> {
        Ok(FileLock::acquire(&self.lock_path(), "project-registry", LOCK_WAIT)?)
    }

    /// Read the registry without locking; a missing file is empty.
    pub fn load(&self) -> Result<ProjectList, BerthError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ProjectList::default()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(ProjectList::default());
        }
        serde_yaml::from_str(&content).map_err(|e| {
            PortError::Registry {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn save(&self, list: &ProjectList) -> Result<(), BerthError> {
        let yaml = serde_yaml::to_string(list).map_err(|e| PortError::Registry {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        write_file_atomic(&self.path, &yaml)?;
        Ok(())
    }

    fn update<T>(&self, f: impl FnOnce(&mut ProjectList) -> Result<T, BerthError>) -> Result<T, BerthError> {
        if let Some(parent) = self.path.parent() {
            paths::ensure_dir_all(parent)?;
        }
        let lock = self.lock()?;
        let mut list = self.load()?;
        let out = f(&mut list)?;
        self.save(&list)?;
        lock.release()?;
        Ok(out)
    }

    /// Record `name` at `approot` holding exactly `ports`.
    ///
    /// Fails with `port-in-use` if another project already holds one of them.
    pub fn reserve(&self, name: &str, approot: &Path, ports: &[u16]) -> Result<(), BerthError> {
        self.update(|list| {
            for port in ports {
                if let Some(owner) = list.owner_of(*port, name) {
                    return Err(PortError::Reserved {
                        port: *port,
                        owner: owner.to_string(),
                        requested_by: name.to_string(),
                    }
                    .into());
                }
            }
            list.projects.insert(
                name.to_string(),
                ProjectEntry {
                    approot: approot.to_path_buf(),
                    reserved_ports: ports.to_vec(),
                },
            );
            tracing::debug!(project = %name, ports = ?ports, "reserved host ports");
            Ok(())
        })
    }

    /// Drop the port reservations of `name`, keeping it catalogued.
    pub fn release_ports(&self, name: &str) -> Result<(), BerthError> {
        self.update(|list| {
            if let Some(entry) = list.projects.get_mut(name) {
                entry.reserved_ports.clear();
            }
            Ok(())
        })
    }

    /// Remove `name` entirely.
    pub fn remove(&self, name: &str) -> Result<bool, BerthError> {
        self.update(|list| Ok(list.projects.remove(name).is_some()))
    }

    pub fn get(&self, name: &str) -> Result<Option<ProjectEntry>, BerthError> {
        Ok(self.load()?.projects.remove(name))
    }

    /// Every catalogued project, sorted by name.
    pub fn list(&self) -> Result<Vec<(String, ProjectEntry)>, BerthError> {
        Ok(self.load()?.projects.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_utils::ErrorKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> ProjectRegistry {
        ProjectRegistry::new(dir.path().join("project_list.yaml"))
    }

    #[test]
    fn test_reserve_and_list() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.reserve("p1", Path::new("/srv/p1"), &[80, 443]).unwrap();
        reg.reserve("p2", Path::new("/srv/p2"), &[]).unwrap();

        let list = reg.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].0, "p1");
        assert_eq!(list[0].1.reserved_ports, vec![80, 443]);
        assert_eq!(reg.get("p2").unwrap().unwrap().approot, PathBuf::from("/srv/p2"));
    }

    #[test]
    fn test_collision_is_port_in_use() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.reserve("p1", Path::new("/srv/p1"), &[80]).unwrap();
        let err = reg.reserve("p2", Path::new("/srv/p2"), &[8080, 80]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortInUse);
        assert!(err.to_string().contains("'p1'"));
        assert!(reg.get("p2").unwrap().is_none());
    }

    #[test]
    fn test_rereserve_same_project_replaces_ports() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.reserve("p1", Path::new("/srv/p1"), &[80]).unwrap();
        reg.reserve("p1", Path::new("/srv/p1"), &[8080]).unwrap();
        reg.reserve("p2", Path::new("/srv/p2"), &[80]).unwrap();
        assert_eq!(reg.get("p1").unwrap().unwrap().reserved_ports, vec![8080]);
    }

    #[test]
    fn test_release_and_remove() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.reserve("p1", Path::new("/srv/p1"), &[80]).unwrap();
        reg.release_ports("p1").unwrap();
        reg.reserve("p2", Path::new("/srv/p2"), &[80]).unwrap();
        assert!(reg.remove("p1").unwrap());
        assert!(!reg.remove("p1").unwrap());
    }

    #[test]
    fn test_corrupt_registry_is_reported() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        std::fs::write(reg.path(), "projects: [this, is, wrong]\n").unwrap();
        assert!(reg.load().is_err());
    }

    #[test]
    fn test_concurrent_reservations_do_not_lose_entries() {
        let dir = TempDir::new().unwrap();
        let reg = Arc::new(registry(&dir));
        let handles: Vec<_> = (0..4u16)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let name = format!("p{i}");
                    reg.reserve(&name, Path::new("/srv"), &[9000 + i]).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.list().unwrap().len(), 4);
    }
}
