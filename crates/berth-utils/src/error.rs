//! Error taxonomy for berth.
//!
//! Each component owns a `thiserror` enum. [`BerthError`] aggregates them and
//! reports a machine-stable [`ErrorKind`] that survives wrapping.

use berth_lock::LockError;
use berth_runner::RunnerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T, E = BerthError> = std::result::Result<T, E>;

/// Machine-stable error kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantNames,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    ConfigNotFound,
    ConfigInvalid,
    HookUnknown,
    TaskUnknown,
    PortInUse,
    SnapshotNotFound,
    SnapshotIncompatible,
    NoSnapshots,
    ComposeInvalid,
    ContainerUnhealthy,
    ProviderStepFailed,
    HookFailed,
    Internal,
}

impl ErrorKind {
    /// Whether a caller can reasonably retry or fall back.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound | Self::PortInUse | Self::ContainerUnhealthy | Self::HookFailed
        )
    }
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Ports,
    Snapshots,
    Compose,
    Containers,
    Hooks,
    Providers,
    FileSystem,
    Concurrency,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "Configuration",
            Self::Ports => "Ports",
            Self::Snapshots => "Snapshots",
            Self::Compose => "Compose",
            Self::Containers => "Containers",
            Self::Hooks => "Hooks",
            Self::Providers => "Providers",
            Self::FileSystem => "File System",
            Self::Concurrency => "Concurrency",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Component errors
// ============================================================================

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    NotFound { path: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("unknown hook '{hook}'")]
    HookUnknown { hook: String },

    #[error("unknown task kind '{task}' in hook '{hook}'")]
    TaskUnknown { hook: String, task: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Port reservation errors
#[derive(Error, Debug)]
pub enum PortError {
    #[error("port {port} requested by project '{requested_by}' is already reserved by project '{owner}'")]
    Reserved {
        port: u16,
        owner: String,
        requested_by: String,
    },

    #[error("host port {port} is in use by another process")]
    Busy { port: u16 },

    #[error("project registry is unreadable at {path}: {reason}")]
    Registry { path: String, reason: String },
}

/// Snapshot errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot '{name}' not found")]
    NotFound { name: String },

    #[error(
        "snapshot '{name}' is a {snapshot} snapshot but the project is configured for {configured}; \
         set the database type and version to {snapshot} before restoring"
    )]
    Incompatible {
        name: String,
        snapshot: String,
        configured: String,
    },

    #[error("no snapshots found for project '{project}'")]
    NoSnapshots { project: String },

    #[error("snapshot '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("invalid snapshot name '{name}'")]
    InvalidName { name: String },

    #[error("snapshot operation '{op}' failed: {output}")]
    CommandFailed { op: String, output: String },
}

/// Compose synthesis errors
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("compose configuration is invalid: {stderr}")]
    Invalid { stderr: String },

    #[error("compose document is malformed: {reason}")]
    Malformed { reason: String },
}

/// Container state errors
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("container {container} did not become healthy: {detail}")]
    Unhealthy { container: String, detail: String },

    #[error("service '{service}' of project '{project}' is not running")]
    NotRunning { project: String, service: String },

    #[error("`{command}` failed: {output}")]
    CommandFailed { command: String, output: String },
}

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider '{name}' not found at {path}")]
    NotFound { name: String, path: String },

    #[error("provider file {path} is invalid: {reason}")]
    Parse { path: String, reason: String },

    #[error("provider step '{step}' failed: {output}")]
    StepFailed { step: String, output: String },
}

/// Hook errors
#[derive(Error, Debug)]
pub enum HookError {
    #[error("task '{task}' in hook '{hook}' failed: {output}")]
    TaskFailed {
        hook: String,
        task: String,
        output: String,
    },
}

// ============================================================================
// BerthError
// ============================================================================

/// Library-level error.
#[derive(Error, Debug)]
pub enum BerthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("process error: {0}")]
    Runner(#[from] RunnerError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0:#}")]
    Filesystem(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{op}: {source}")]
    Context {
        op: String,
        #[source]
        source: Box<BerthError>,
    },
}

impl BerthError {
    /// Kind of the innermost error; wrapping never changes it.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(e) => match e {
                ConfigError::NotFound { .. } => ErrorKind::ConfigNotFound,
                ConfigError::Parse { .. } | ConfigError::Invalid { .. } => {
                    ErrorKind::ConfigInvalid
                }
                ConfigError::HookUnknown { .. } => ErrorKind::HookUnknown,
                ConfigError::TaskUnknown { .. } => ErrorKind::TaskUnknown,
            },
            Self::Port(e) => match e {
                PortError::Reserved { .. } | PortError::Busy { .. } => ErrorKind::PortInUse,
                PortError::Registry { .. } => ErrorKind::Internal,
            },
            Self::Snapshot(e) => match e {
                SnapshotError::NotFound { .. } => ErrorKind::SnapshotNotFound,
                SnapshotError::Incompatible { .. } => ErrorKind::SnapshotIncompatible,
                SnapshotError::NoSnapshots { .. } => ErrorKind::NoSnapshots,
                SnapshotError::InvalidName { .. } => ErrorKind::ConfigInvalid,
                SnapshotError::AlreadyExists { .. } | SnapshotError::CommandFailed { .. } => {
                    ErrorKind::Internal
                }
            },
            Self::Compose(_) => ErrorKind::ComposeInvalid,
            Self::Container(e) => match e {
                ContainerError::Unhealthy { .. } | ContainerError::NotRunning { .. } => {
                    ErrorKind::ContainerUnhealthy
                }
                ContainerError::CommandFailed { .. } => ErrorKind::Internal,
            },
            Self::Provider(_) => ErrorKind::ProviderStepFailed,
            Self::Hook(_) => ErrorKind::HookFailed,
            Self::Runner(_)
            | Self::Lock(_)
            | Self::Io(_)
            | Self::Filesystem(_)
            | Self::Internal(_) => ErrorKind::Internal,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Wrap with the name of the operation that failed.
    #[must_use]
    pub fn in_op(self, op: impl Into<String>) -> Self {
        Self::Context {
            op: op.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all `Context` layers removed.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Attach an operation name to any `Result<_, BerthError>`.
pub trait OpContext<T> {
    fn op(self, op: &str) -> Result<T>;
}

impl<T, E: Into<BerthError>> OpContext<T> for std::result::Result<T, E> {
    fn op(self, op: &str) -> Result<T> {
        self.map_err(|e| e.into().in_op(op))
    }
}

impl UserFriendlyError for BerthError {
    fn user_message(&self) -> String {
        self.root().to_string()
    }

    fn context(&self) -> Option<String> {
        match self.root() {
            Self::Config(ConfigError::HookUnknown { .. } | ConfigError::TaskUnknown { .. }) => {
                Some("Hooks are named pre-/post-<event> and tasks are exec, exec_raw, exec-host or composer.".to_string())
            }
            Self::Config(_) => {
                Some("Project configuration lives in .project-config/config.yaml plus any config.*.yaml overrides.".to_string())
            }
            Self::Port(_) => Some(
                "Reserved host ports are tracked per project in the global project_list.yaml."
                    .to_string(),
            ),
            Self::Compose(_) => Some(
                "The compose manifest is built from .compose-base.yaml and every compose*.yaml overlay."
                    .to_string(),
            ),
            Self::Snapshot(SnapshotError::Incompatible { .. }) => Some(
                "A snapshot can only be restored into the database engine and version it was taken from."
                    .to_string(),
            ),
            Self::Hook(_) => Some(
                "Hook failures are fatal because fail_on_hook_fail is enabled.".to_string(),
            ),
            Self::Lock(_) => {
                Some("Another berth process may be updating shared state.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self.kind() {
            ErrorKind::ConfigNotFound => vec!["Run `berth config` in the project root".to_string()],
            ErrorKind::ConfigInvalid | ErrorKind::HookUnknown | ErrorKind::TaskUnknown => vec![
                "Fix the reported field in .project-config/config.yaml".to_string(),
                "Check override files named config.*.yaml as well".to_string(),
            ],
            ErrorKind::PortInUse => vec![
                "Stop the project holding the port with `berth stop <project>`".to_string(),
                "Or choose a different port in .project-config/config.yaml".to_string(),
            ],
            ErrorKind::SnapshotNotFound | ErrorKind::NoSnapshots => {
                vec!["List available snapshots with `berth snapshot list`".to_string()]
            }
            ErrorKind::SnapshotIncompatible => vec![
                "Change database type/version in config.yaml to match the snapshot".to_string(),
                "Then run `berth restart` and retry the restore".to_string(),
            ],
            ErrorKind::ComposeInvalid => vec![
                "Check your compose.*.yaml overlays for syntax errors".to_string(),
            ],
            ErrorKind::ContainerUnhealthy => vec![
                "Inspect logs with `docker logs <container>`".to_string(),
                "Retry with `berth restart`".to_string(),
            ],
            ErrorKind::ProviderStepFailed => vec![
                "Inspect the provider file under .project-config/providers/".to_string(),
            ],
            ErrorKind::HookFailed => vec![
                "Fix the failing hook task or unset fail_on_hook_fail".to_string(),
            ],
            ErrorKind::Internal => vec!["Re-run with --verbose for details".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self.root() {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Port(_) => ErrorCategory::Ports,
            Self::Snapshot(_) => ErrorCategory::Snapshots,
            Self::Compose(_) => ErrorCategory::Compose,
            Self::Container(_) | Self::Runner(_) => ErrorCategory::Containers,
            Self::Hook(_) => ErrorCategory::Hooks,
            Self::Provider(_) => ErrorCategory::Providers,
            Self::Io(_) | Self::Filesystem(_) => ErrorCategory::FileSystem,
            Self::Lock(_) => ErrorCategory::Concurrency,
            Self::Internal(_) | Self::Context { .. } => ErrorCategory::Internal,
        }
    }
}
