//! Advisory file locking with crash recovery.
//!
//! Serialises updates to berth's shared on-disk state (the project registry
//! and the router staging tree) across processes. The lock is advisory: it
//! coordinates berth processes and is not a security boundary.

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Age after which a lock is stale even if its pid looks alive (pid reuse).
const DEFAULT_STALE_THRESHOLD_SECS: u64 = 600;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF_MS: u64 = 100;

/// Lock information stored in the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process ID that created the lock
    pub pid: u32,
    /// Timestamp when the lock was created (seconds since UNIX epoch)
    pub created_at: u64,
    /// What the holder is doing, e.g. `project-registry`
    pub owner: String,
    /// berth version that created the lock
    pub berth_version: String,
}

/// Lock errors for file locking operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{path} is held by '{owner}' (PID {pid}, created {created_ago} ago)")]
    Held {
        path: String,
        owner: String,
        pid: u32,
        created_ago: String,
    },

    #[error("lock file {path} is corrupted: {reason}")]
    Corrupted { path: String, reason: String },

    #[error("failed to acquire lock {path}: {reason}")]
    AcquisitionFailed { path: String, reason: String },

    #[error("failed to release lock: {reason}")]
    ReleaseFailed { reason: String },

    #[error("IO error during lock operation: {0}")]
    Io(#[from] io::Error),
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Exclusive lock on a path, released on drop.
pub struct FileLock {
    lock_path: PathBuf,
    /// File descriptor lock (held while active)
    fd_lock: Option<Box<RwLock<fs::File>>>,
    lock_info: LockInfo,
}

/// Outcome of inspecting an existing lock file.
enum Existing {
    /// Gone, or safe to break.
    Breakable,
    /// Held by a live process.
    Live(LockInfo),
}

impl FileLock {
    /// Acquire an exclusive lock at `lock_path`, waiting up to `wait`.
    ///
    /// Uses `create_new` (O_EXCL) so that only one process can create the
    /// file. Locks whose holder has exited, or that are older than the stale
    /// threshold, are broken automatically. A lock held by a live process is
    /// retried with backoff until `wait` elapses.
    pub fn acquire(lock_path: &Path, owner: &str, wait: Duration) -> Result<Self, LockError> {
        Self::acquire_with_ttl(lock_path, owner, wait, DEFAULT_STALE_THRESHOLD_SECS)
    }

    /// [`FileLock::acquire`] with an explicit staleness threshold.
    pub fn acquire_with_ttl(
        lock_path: &Path,
        owner: &str,
        wait: Duration,
        ttl_seconds: u64,
    ) -> Result<Self, LockError> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| LockError::AcquisitionFailed {
                path: lock_path.display().to_string(),
                reason: format!("failed to create lock directory: {e}"),
            })?;
        }

        let deadline = Instant::now() + wait;
        let mut attempt: u32 = 0;

        loop {
            let lock_info = LockInfo {
                pid: process::id(),
                created_at: now_secs(),
                owner: owner.to_string(),
                berth_version: env!("CARGO_PKG_VERSION").to_string(),
            };

            match fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(lock_path)
            {
                Ok(lock_file) => {
                    return Self::finalize_lock(lock_path.to_path_buf(), lock_file, lock_info);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    match Self::check_existing_lock(lock_path, ttl_seconds)? {
                        Existing::Breakable => {
                            Self::try_remove_stale_lock(lock_path)?;
                            continue;
                        }
                        Existing::Live(holder) => {
                            if Instant::now() >= deadline {
                                return Err(LockError::Held {
                                    path: lock_path.display().to_string(),
                                    owner: holder.owner,
                                    pid: holder.pid,
                                    created_ago: format_duration_since(holder.created_at),
                                });
                            }
                        }
                    }
                }
                Err(e) => {
                    return Err(LockError::AcquisitionFailed {
                        path: lock_path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }

            // Deterministic jitter from the PID avoids lockstep retries without an RNG.
            let base_delay_ms = 10u64.saturating_mul(2u64.saturating_pow(attempt.min(6)));
            let jitter_ms = u64::from(process::id()) % 7;
            std::thread::sleep(Duration::from_millis(
                base_delay_ms.saturating_add(jitter_ms).min(MAX_BACKOFF_MS),
            ));
            attempt = attempt.saturating_add(1);
        }
    }

    /// Write lock info and take the fd lock.
    fn finalize_lock(
        lock_path: PathBuf,
        lock_file: fs::File,
        lock_info: LockInfo,
    ) -> Result<Self, LockError> {
        let failed = |reason: String| LockError::AcquisitionFailed {
            path: lock_path.display().to_string(),
            reason,
        };

        let lock_json = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| failed(format!("failed to serialize lock info: {e}")))?;

        let mut rw_lock = Box::new(RwLock::new(lock_file));
        {
            let guard = rw_lock
                .try_write()
                .map_err(|e| failed(format!("fd lock unavailable: {e}")))?;
            let mut file_ref = &*guard;
            file_ref
                .write_all(lock_json.as_bytes())
                .and_then(|()| file_ref.flush())
                .and_then(|()| file_ref.sync_all())
                .map_err(|e| failed(format!("failed to write lock info: {e}")))?;
        }

        tracing::trace!(path = %lock_path.display(), owner = %lock_info.owner, "lock acquired");
        Ok(Self {
            lock_path,
            fd_lock: Some(rw_lock),
            lock_info,
        })
    }

    /// Rename-to-stale then delete, so two breakers cannot both succeed.
    /// `NotFound` counts as success since another process may have already removed it.
    fn try_remove_stale_lock(lock_path: &Path) -> Result<(), LockError> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let stale_path = lock_path.with_extension(format!("stale.{stamp}.{}", process::id()));

        match fs::rename(lock_path, &stale_path) {
            Ok(()) => {
                let _ = fs::remove_file(&stale_path);
                tracing::debug!(path = %lock_path.display(), "removed stale lock");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::AcquisitionFailed {
                path: lock_path.display().to_string(),
                reason: format!("failed to rename stale lock: {e}"),
            }),
        }
    }

    /// Retries empty or partial reads, since another process may have just
    /// created the file without writing it yet.
    fn check_existing_lock(lock_path: &Path, ttl_seconds: u64) -> Result<Existing, LockError> {
        const MAX_READ_RETRIES: u32 = 3;
        const READ_RETRY_DELAY_MS: u64 = 10;

        let corrupted = |reason: String| LockError::Corrupted {
            path: lock_path.display().to_string(),
            reason,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let content = match fs::read_to_string(lock_path) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Existing::Breakable),
                Err(e) if attempt < MAX_READ_RETRIES => {
                    tracing::trace!(error = %e, "retrying lock read");
                    std::thread::sleep(Duration::from_millis(READ_RETRY_DELAY_MS));
                    continue;
                }
                Err(e) => return Err(corrupted(e.to_string())),
            };

            match serde_json::from_str::<LockInfo>(&content) {
                Ok(existing) => return Ok(Self::classify(existing, ttl_seconds)),
                Err(e) if (e.is_eof() || content.trim().is_empty()) && attempt < MAX_READ_RETRIES => {
                    std::thread::sleep(Duration::from_millis(READ_RETRY_DELAY_MS));
                }
                Err(e) => {
                    if Self::recently_modified(lock_path) {
                        return Ok(Existing::Live(LockInfo {
                            pid: 0,
                            created_at: now_secs(),
                            owner: "unknown".to_string(),
                            berth_version: String::new(),
                        }));
                    }
                    tracing::warn!(path = %lock_path.display(), error = %e, "breaking unreadable lock");
                    return Ok(Existing::Breakable);
                }
            }
        }
    }

    /// An unreadable lock younger than this may still be mid-write.
    fn recently_modified(lock_path: &Path) -> bool {
        fs::metadata(lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .is_some_and(|age| age < Duration::from_secs(2))
    }

    fn classify(existing: LockInfo, ttl_seconds: u64) -> Existing {
        let age = now_secs().saturating_sub(existing.created_at);
        if age > ttl_seconds || !is_process_running(existing.pid) {
            Existing::Breakable
        } else {
            Existing::Live(existing)
        }
    }

    /// Information about an existing lock at `lock_path`, if any.
    pub fn get_lock_info(lock_path: &Path) -> Result<Option<LockInfo>, LockError> {
        let content = match fs::read_to_string(lock_path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LockError::Corrupted {
                path: lock_path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Release the lock explicitly (also happens on drop).
    pub fn release(mut self) -> Result<(), LockError> {
        self.fd_lock.take();
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::ReleaseFailed {
                reason: format!("failed to remove lock file: {e}"),
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    #[must_use]
    pub const fn lock_info(&self) -> &LockInfo {
        &self.lock_info
    }
}

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // kill(pid, 0): 0 if it exists, EPERM if it exists but is not ours.
        // SAFETY: signal 0 performs only an existence check.
        let rc = unsafe { libc::kill(raw, 0) };
        if rc == 0 {
            true
        } else {
            matches!(
                io::Error::last_os_error().raw_os_error(),
                Some(code) if code == libc::EPERM
            )
        }
    }

    #[cfg(windows)]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::minwinbase::STILL_ACTIVE;
        use winapi::um::processthreadsapi::{GetExitCodeProcess, OpenProcess};
        use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;

        // SAFETY: the handle is null-checked and closed on every path.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }
            let mut exit_code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);
            ok != 0 && exit_code == STILL_ACTIVE
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        true
    }
}

/// Format a duration since a timestamp in a human-readable way
fn format_duration_since(timestamp: u64) -> String {
    let duration = now_secs().saturating_sub(timestamp);

    if duration < 60 {
        format!("{duration}s")
    } else if duration < 3600 {
        format!("{}m", duration / 60)
    } else if duration < 86400 {
        format!("{}h", duration / 3600)
    } else {
        format!("{}d", duration / 86400)
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("lock_path", &self.lock_path)
            .field("lock_info", &self.lock_info)
            .finish_non_exhaustive()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.fd_lock.take();
        let _ = fs::remove_file(&self.lock_path);
    }
}
