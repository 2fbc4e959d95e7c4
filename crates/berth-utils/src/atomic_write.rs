//! Atomic file writes.
//!
//! Generated files (compose manifests, router fragments, certificates, the
//! port registry) are written through a temporary sibling file that is
//! fsynced and renamed over the target, so a concurrent reader never sees a
//! half-written document.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

#[cfg(target_os = "windows")]
use std::{thread, time::Duration};

/// Result of an atomic write operation
#[derive(Debug, Clone, Default)]
pub struct AtomicWriteResult {
    /// Number of rename retries that occurred (Windows only)
    pub rename_retry_count: u32,
    /// Whether cross-filesystem fallback was used
    pub used_cross_filesystem_fallback: bool,
}

/// Atomically write UTF-8 text, normalising line endings to LF.
pub fn write_file_atomic(path: impl AsRef<Path>, content: &str) -> Result<AtomicWriteResult> {
    write_bytes_atomic(path, normalize_line_endings(content).as_bytes())
}

/// Atomically write raw bytes.
pub fn write_bytes_atomic(path: impl AsRef<Path>, content: &[u8]) -> Result<AtomicWriteResult> {
    let path = path.as_ref();
    let mut result = AtomicWriteResult::default();

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory: {}", parent.display()))?;

    let mut temp_file = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temporary file in: {}", parent.display()))?;
    temp_file
        .write_all(content)
        .context("failed to write content to temporary file")?;
    temp_file
        .as_file()
        .sync_all()
        .context("failed to fsync temporary file")?;

    let temp_path = temp_file.path().to_path_buf();

    match atomic_rename(temp_file, path) {
        Ok(retry_count) => {
            result.rename_retry_count = retry_count;
            if retry_count > 0 {
                tracing::debug!(path = %path.display(), retry_count, "rename needed retries");
            }
        }
        Err(e) if is_cross_filesystem_error(&e) => {
            result.used_cross_filesystem_fallback = true;
            cross_filesystem_copy_from_path(&temp_path, path)?;
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to atomically write file: {}", path.display()));
        }
    }

    Ok(result)
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Rename with bounded exponential backoff (250ms total) for transient
/// sharing violations.
#[cfg(target_os = "windows")]
fn atomic_rename(mut temp_file: NamedTempFile, target: &Path) -> Result<u32> {
    use std::io::ErrorKind;

    const MAX_RETRIES: u32 = 5;
    const INITIAL_DELAY_MS: u64 = 10;
    const MAX_TOTAL_DELAY_MS: u64 = 250;

    let mut retry_count = 0;
    let mut total_delay_ms = 0;

    loop {
        match temp_file.persist(target) {
            Ok(_) => return Ok(retry_count),
            Err(persist_error) => {
                let retryable = matches!(
                    persist_error.error.kind(),
                    ErrorKind::PermissionDenied | ErrorKind::Other
                );
                let delay_ms = INITIAL_DELAY_MS * 2_u64.pow(retry_count);
                if !retryable
                    || retry_count >= MAX_RETRIES
                    || total_delay_ms + delay_ms > MAX_TOTAL_DELAY_MS
                {
                    return Err(anyhow::anyhow!(persist_error.error));
                }
                thread::sleep(Duration::from_millis(delay_ms));
                total_delay_ms += delay_ms;
                retry_count += 1;
                temp_file = persist_error.file;
            }
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn atomic_rename(temp_file: NamedTempFile, target: &Path) -> Result<u32> {
    temp_file
        .persist(target)
        .map(|_| 0)
        .map_err(|e| anyhow::anyhow!(e.error))
}

#[cfg(unix)]
fn is_cross_filesystem_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .and_then(std::io::Error::raw_os_error)
        .is_some_and(|code| code == libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_filesystem_error(_err: &anyhow::Error) -> bool {
    false
}

/// copy, fsync, then replace
fn cross_filesystem_copy_from_path(temp_path: &Path, target: &Path) -> Result<()> {
    let content =
        fs::read(temp_path).context("failed to read temporary file for cross-filesystem copy")?;

    let target_dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut target_temp = NamedTempFile::new_in(target_dir).with_context(|| {
        format!(
            "failed to create temp file in target directory: {}",
            target_dir.display()
        )
    })?;
    target_temp.write_all(&content)?;
    target_temp.as_file().sync_all()?;
    target_temp
        .persist(target)
        .map_err(|e| anyhow::anyhow!(e.error))
        .context("failed to persist during cross-filesystem copy")?;

    let _ = fs::remove_file(temp_path);
    Ok(())
}
