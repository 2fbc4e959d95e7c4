use std::cell::RefCell;
use std::path::{Component, Path, PathBuf};

// Thread-local override used only in tests to avoid process-global env races.
thread_local! {
    static THREAD_HOME: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// Per-project configuration directory name, relative to the approot.
pub const PROJECT_CONFIG_DIR: &str = ".project-config";

/// Resolve the global directory:
/// 1) thread-local override (tests use this)
/// 2) env `BERTH_HOME`
/// 3) `~/.berth`
#[must_use]
pub fn global_dir() -> PathBuf {
    if let Some(tl) = THREAD_HOME.with(|tl| tl.borrow().clone()) {
        return tl;
    }
    if let Some(p) = std::env::var_os("BERTH_HOME").filter(|p| !p.is_empty()) {
        return PathBuf::from(p);
    }
    dirs::home_dir().map_or_else(|| PathBuf::from(".berth"), |h| h.join(".berth"))
}

/// `<global>/global_config.yaml`
#[must_use]
pub fn global_config_path() -> PathBuf {
    global_dir().join("global_config.yaml")
}

/// `<global>/project_list.yaml`
#[must_use]
pub fn project_list_path() -> PathBuf {
    global_dir().join("project_list.yaml")
}

/// `<global>/router`, the staging tree published into the router.
#[must_use]
pub fn router_dir() -> PathBuf {
    global_dir().join("router")
}

/// `<global>/router-custom`, user-managed router config passed through untouched.
#[must_use]
pub fn router_custom_config_dir() -> PathBuf {
    global_dir().join("router-custom")
}

/// `<approot>/.project-config`
#[must_use]
pub fn project_config_dir(approot: &Path) -> PathBuf {
    approot.join(PROJECT_CONFIG_DIR)
}

/// mkdir -p; treat `AlreadyExists` as success (removes TOCTTOU races)
pub fn ensure_dir_all<P: AsRef<Path>>(p: P) -> std::io::Result<()> {
    match std::fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Resolve `.` and `..` without touching the filesystem.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `candidate`, normalised lexically, lies at or below `root`.
#[must_use]
pub fn is_contained(root: &Path, candidate: &Path) -> bool {
    normalize_lexically(candidate).starts_with(normalize_lexically(root))
}

/// RAII guard for isolated home that clears thread-local state on drop
#[cfg(any(test, feature = "test-utils"))]
pub struct HomeGuard {
    inner: tempfile::TempDir,
}

#[cfg(any(test, feature = "test-utils"))]
impl Drop for HomeGuard {
    fn drop(&mut self) {
        THREAD_HOME.with(|tl| *tl.borrow_mut() = None);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl std::ops::Deref for HomeGuard {
    type Target = tempfile::TempDir;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Test helper: give this thread a private global directory.
///
/// Hold the `HomeGuard` for the test's duration so the directory stays alive.
#[cfg(any(test, feature = "test-utils"))]
#[must_use]
#[allow(clippy::expect_used)]
pub fn with_isolated_home() -> HomeGuard {
    let td = tempfile::TempDir::new().expect("create temp home");
    let p = td.path().to_path_buf();
    THREAD_HOME.with(|tl| *tl.borrow_mut() = Some(p));
    HomeGuard { inner: td }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolated_home_overrides_global_dir() {
        let home = with_isolated_home();
        assert_eq!(global_dir(), home.path());
        assert_eq!(project_list_path(), home.path().join("project_list.yaml"));
        assert_eq!(router_dir(), home.path().join("router"));
    }

    #[test]
    fn test_isolated_home_cleared_on_drop() {
        let path = {
            let home = with_isolated_home();
            home.path().to_path_buf()
        };
        assert_ne!(global_dir(), path);
    }

    #[test]
    fn test_project_config_dir() {
        assert_eq!(
            project_config_dir(Path::new("/srv/shop")),
            PathBuf::from("/srv/shop/.project-config")
        );
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(normalize_lexically(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_is_contained() {
        let root = Path::new("/srv/shop");
        assert!(is_contained(root, Path::new("/srv/shop/web/files")));
        assert!(is_contained(root, Path::new("/srv/shop/web/../files")));
        assert!(!is_contained(root, Path::new("/srv/shop/web/../../etc")));
        assert!(!is_contained(root, Path::new("/srv/shopping")));
    }

    #[test]
    fn test_ensure_dir_all_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir_all(&nested).unwrap();
        ensure_dir_all(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
