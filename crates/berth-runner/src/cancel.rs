//! Cooperative cancellation of the child process currently being run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle used to interrupt a long-running operation.
///
/// A [`crate::NativeRunner`] registers each child it spawns with its token.
/// Calling [`CancelToken::cancel`] from another thread (typically a Ctrl-C
/// handler) interrupts the active child and makes every later spawn fail
/// with [`crate::RunnerError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    active: Mutex<Option<u32>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled and interrupt the active child, if any.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let active = *self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pid) = active {
            tracing::debug!(pid, "interrupting child process");
            interrupt_process(pid);
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self, pid: u32) {
        *self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(pid);
    }

    pub(crate) fn clear(&self) {
        *self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Ask a process to stop (SIGTERM on Unix, TerminateProcess on Windows).
fn interrupt_process(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Ok(raw) = i32::try_from(pid) {
            let _ = kill(Pid::from_raw(raw), Signal::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    {
        kill_process(pid);
    }
}

/// Forcefully terminate a process by its PID.
///
/// On Unix, sends SIGKILL. On Windows, uses TerminateProcess.
pub(crate) fn kill_process(pid: u32) {
    #[cfg(unix)]
    {
        if let Ok(raw) = i32::try_from(pid) {
            // SAFETY: kill(2) has no memory-safety preconditions.
            unsafe {
                libc::kill(raw, libc::SIGKILL);
            }
        }
    }

    #[cfg(windows)]
    {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{
            OpenProcess, PROCESS_TERMINATE, TerminateProcess,
        };

        // SAFETY: the handle is checked and closed before leaving the block.
        unsafe {
            if let Ok(handle) = OpenProcess(PROCESS_TERMINATE, false, pid) {
                let _ = TerminateProcess(handle, 1);
                let _ = CloseHandle(handle);
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_without_active_child_is_harmless() {
        let token = CancelToken::new();
        token.register(u32::MAX);
        token.clear();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
