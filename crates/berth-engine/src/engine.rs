//! The [`Engine`] handle every lifecycle operation hangs off.

use std::sync::Arc;
use std::time::Duration;

use berth_config::ProjectRegistry;
use berth_runner::ProcessRunner;

use crate::docker::Docker;
use crate::hostuser::HostUser;
use crate::netutil::{PortProbe, TcpPortProbe};
use crate::router::{RouterStore, VolumeRouterStore};
use crate::sync::MutagenSync;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shared collaborators of the lifecycle, router, snapshot and provider
/// operations.
///
/// Operations take the [`berth_config::Project`] they act on by reference; the
/// engine itself holds no per-project state.
#[derive(Clone)]
pub struct Engine {
    pub(crate) docker: Docker,
    pub(crate) registry: ProjectRegistry,
    pub(crate) ports: Arc<dyn PortProbe>,
    pub(crate) router_store: Option<Arc<dyn RouterStore>>,
    pub(crate) user: HostUser,
    pub(crate) skip_hooks: bool,
    pub(crate) poll_interval: Duration,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry.path())
            .field("user", &self.user)
            .field("skip_hooks", &self.skip_hooks)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine against the real host: global registry, TCP port probing and
    /// the current user.
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            docker: Docker::new(runner),
            registry: ProjectRegistry::global(),
            ports: Arc::new(TcpPortProbe),
            router_store: None,
            user: HostUser::current(),
            skip_hooks: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ProjectRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_port_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.ports = probe;
        self
    }

    /// Publish router config somewhere other than the router's volume.
    #[must_use]
    pub fn with_router_store(mut self, store: Arc<dyn RouterStore>) -> Self {
        self.router_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_host_user(mut self, user: HostUser) -> Self {
        self.user = user;
        self
    }

    /// Suppress every hook; used for bulk operations and tests.
    #[must_use]
    pub fn skip_hooks(mut self, skip: bool) -> Self {
        self.skip_hooks = skip;
        self
    }

    /// Delay between health and readiness polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    #[must_use]
    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    #[must_use]
    pub fn host_user(&self) -> &HostUser {
        &self.user
    }

    pub(crate) fn mutagen(&self) -> MutagenSync {
        MutagenSync::new(self.docker.runner().clone())
    }

    pub(crate) fn router_store(&self) -> Arc<dyn RouterStore> {
        self.router_store
            .clone()
            .unwrap_or_else(|| Arc::new(VolumeRouterStore::new(self.docker.clone())))
    }
}
