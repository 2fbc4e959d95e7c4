//! Project configuration for berth.
//!
//! - [`apptypes`]: the project-type registry
//! - [`store`]: loading, merging and writing `.project-config/config.yaml`
//! - [`hostnames`]: hostname and URL derivation
//! - [`dbtypes`]: database engines and probe-output parsing
//! - [`registry`]: the global project catalogue and port reservations
//! - [`global`]: `global_config.yaml`

pub mod apptypes;
pub mod dbtypes;
pub mod global;
pub mod hooks;
pub mod hostnames;
pub mod model;
pub mod project;
pub mod registry;
pub mod store;
pub mod validate;

pub use dbtypes::{DatabaseDesc, DbEngine};
pub use global::GlobalConfig;
pub use hooks::{ExecCommand, Hooks, Task};
pub use model::{PerformanceMode, ProjectConfig, WebserverType};
pub use project::Project;
pub use registry::ProjectRegistry;
pub use store::{find_project_root, load_config, write_config};
pub use validate::validate_project;
