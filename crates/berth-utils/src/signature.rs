//! Generated-file signature.
//!
//! Every file berth may overwrite carries [`SIGNATURE`] as a comment. A user
//! takes ownership of such a file by deleting that line; from then on berth
//! leaves the file alone.

use anyhow::{Context, Result};
use std::path::Path;

use crate::atomic_write::write_file_atomic;

/// Magic comment marking a file as tool-owned.
pub const SIGNATURE: &str = "#berth-generated";

/// Ownership of a path as seen by the signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Missing or empty; free to create.
    NoFile,
    /// Carries the signature; free to overwrite.
    Signed,
    /// Non-empty and unsigned; must not be touched.
    UserManaged,
}

impl SignatureStatus {
    #[must_use]
    pub const fn may_overwrite(self) -> bool {
        !matches!(self, Self::UserManaged)
    }
}

/// Classify `path` by the presence of the signature.
pub fn check_signature_or_no_file(path: impl AsRef<Path>) -> Result<SignatureStatus> {
    let path = path.as_ref();
    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SignatureStatus::NoFile),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(SignatureStatus::NoFile);
    }
    let text = String::from_utf8_lossy(&content);
    if text.contains(SIGNATURE) {
        Ok(SignatureStatus::Signed)
    } else {
        Ok(SignatureStatus::UserManaged)
    }
}

/// Prefix `content` with a `#`-style signature line unless it already has one.
#[must_use]
pub fn with_signature(content: &str) -> String {
    if content.contains(SIGNATURE) {
        content.to_string()
    } else {
        format!("{SIGNATURE}\n{content}")
    }
}

/// What [`write_if_owned`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    UserManaged,
}

/// Write `content` to `path` unless the existing file is user-managed.
///
/// `content` must already carry the signature in a comment syntax valid for
/// the file type; see [`with_signature`] for `#`-comment formats.
pub fn write_if_owned(path: impl AsRef<Path>, content: &str) -> Result<WriteOutcome> {
    let path = path.as_ref();
    if !check_signature_or_no_file(path)?.may_overwrite() {
        tracing::warn!(path = %path.display(), "not overwriting user-managed file (signature removed)");
        return Ok(WriteOutcome::UserManaged);
    }
    write_file_atomic(path, content)?;
    Ok(WriteOutcome::Written)
}
