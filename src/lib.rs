//! berth - per-project containerized development environments
//!
//! berth runs each PHP project in its own set of containers behind a shared
//! HTTP(S) router, synthesizing the compose manifest from the project's
//! `.project-config/config.yaml`.
//!
//! The binary is a thin clap front-end over the member crates, which are
//! re-exported here for embedding:
//!
//! - [`config`]: project and global configuration, app types, hostnames, the
//!   project list and port registry
//! - [`engine`]: compose synthesis, lifecycle, router, snapshots, hooks and
//!   providers
//! - [`runner`]: process execution and cancellation
//! - [`utils`]: errors, exit codes, paths and logging
//!
//! ```no_run
//! use std::sync::Arc;
//! use berth::config::{GlobalConfig, Project};
//! use berth::engine::Engine;
//! use berth::runner::NativeRunner;
//!
//! # fn main() -> Result<(), berth::BerthError> {
//! let project = Project::load("/srv/shop", true, GlobalConfig::load()?)?;
//! let engine = Engine::new(Arc::new(NativeRunner::new()));
//! engine.start(&project)?;
//! println!("{}", project.primary_url(None));
//! # Ok(())
//! # }
//! ```

pub mod cli;

pub use berth_config as config;
pub use berth_engine as engine;
pub use berth_runner as runner;
pub use berth_utils as utils;

pub use berth_utils::{BerthError, ErrorKind, ExitCode};
