//! Exit code constants and error kind mapping.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments |
//! | 3 | `CONFIG_INVALID` | Configuration missing or invalid |
//! | 4 | `PORT_IN_USE` | A required host port is reserved or busy |
//! | 5 | `SNAPSHOT` | Snapshot missing or incompatible |
//! | 6 | `COMPOSE_INVALID` | Compose engine rejected the manifest |
//! | 7 | `CONTAINER_UNHEALTHY` | A container did not become healthy |
//! | 8 | `HOOK_FAILED` | A hook task failed with `fail_on_hook_fail` |
//! | 9 | `PROVIDER_FAILED` | A provider step failed |

use crate::error::{BerthError, ErrorKind};

/// Process exit code.
///
/// ```rust
/// use berth_utils::exit_codes::ExitCode;
/// use berth_utils::error::ErrorKind;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::from_kind(ErrorKind::PortInUse), ExitCode::PORT_IN_USE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const INTERNAL: ExitCode = ExitCode(1);
    pub const CLI_ARGS: ExitCode = ExitCode(2);
    pub const CONFIG_INVALID: ExitCode = ExitCode(3);
    pub const PORT_IN_USE: ExitCode = ExitCode(4);
    pub const SNAPSHOT: ExitCode = ExitCode(5);
    pub const COMPOSE_INVALID: ExitCode = ExitCode(6);
    pub const CONTAINER_UNHEALTHY: ExitCode = ExitCode(7);
    pub const HOOK_FAILED: ExitCode = ExitCode(8);
    pub const PROVIDER_FAILED: ExitCode = ExitCode(9);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        Self(code)
    }

    #[must_use]
    pub const fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ConfigNotFound
            | ErrorKind::ConfigInvalid
            | ErrorKind::HookUnknown
            | ErrorKind::TaskUnknown => Self::CONFIG_INVALID,
            ErrorKind::PortInUse => Self::PORT_IN_USE,
            ErrorKind::SnapshotNotFound
            | ErrorKind::SnapshotIncompatible
            | ErrorKind::NoSnapshots => Self::SNAPSHOT,
            ErrorKind::ComposeInvalid => Self::COMPOSE_INVALID,
            ErrorKind::ContainerUnhealthy => Self::CONTAINER_UNHEALTHY,
            ErrorKind::HookFailed => Self::HOOK_FAILED,
            ErrorKind::ProviderStepFailed => Self::PROVIDER_FAILED,
            ErrorKind::Internal => Self::INTERNAL,
        }
    }
}

impl From<&BerthError> for ExitCode {
    fn from(err: &BerthError) -> Self {
        Self::from_kind(err.kind())
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}
