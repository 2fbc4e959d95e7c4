//! Container orchestration for berth projects.
//!
//! [`Engine`] drives every operation that touches the container engine:
//! compose synthesis, the start/stop lifecycle, the shared HTTP router,
//! database snapshots, hooks and hosting-provider pull/push. All external
//! processes run through a [`berth_runner::ProcessRunner`], so the whole
//! crate is testable against a scripted runner.
//!
//! Operations are blocking and run to completion. Router publication is
//! serialized both within the process and across processes through a file
//! lock in the global directory.

pub mod compose;
pub mod docker;
pub mod engine;
pub mod hooks;
pub mod hostuser;
pub mod lifecycle;
pub mod netutil;
pub mod probe;
pub mod provider;
pub mod router;
pub mod snapshot;
pub mod ssh_agent;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil;

pub use compose::{ComposeDocument, ComposeOptions};
pub use docker::{ContainerState, Docker};
pub use engine::Engine;
pub use hostuser::HostUser;
pub use lifecycle::{Description, PowerOffReport, ProjectSummary, SiteStatus};
pub use netutil::{PortProbe, TcpPortProbe};
#[cfg(any(test, feature = "test-utils"))]
pub use netutil::StaticPortProbe;
pub use provider::{Provider, load_provider};
pub use router::{RouterState, RoutingTable};
