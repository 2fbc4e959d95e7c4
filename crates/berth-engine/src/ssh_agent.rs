//! The shared SSH-agent container.

use serde_yaml::{Mapping, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use berth_config::project::SSH_AGENT_CONTAINER;
use berth_utils::error::{BerthError, ContainerError};
use berth_utils::paths;
use berth_utils::signature::{with_signature, write_if_owned};

use crate::compose::{IMAGE_TAG, SSH_AGENT_VOLUME};
use crate::docker::{BUILD_TIMEOUT, GLOBAL_NETWORK, LABEL_PLATFORM, PLATFORM};
use crate::engine::Engine;

pub const SSH_AGENT_IMAGE: &str = "ddev/ddev-ssh-agent";
const SSH_AGENT_WAIT: Duration = Duration::from_secs(60);

#[must_use]
pub fn compose_path() -> PathBuf {
    paths::global_dir().join(".ssh-auth-compose.yaml")
}

fn render(engine: &Engine) -> Result<String, BerthError> {
    let user = &engine.user;
    let yaml = format!(
        "name: {SSH_AGENT_CONTAINER}\n\
         services:\n  \
           ssh-agent:\n    \
             container_name: {SSH_AGENT_CONTAINER}\n    \
             image: {SSH_AGENT_IMAGE}:{IMAGE_TAG}\n    \
             user: \"{uid}:{gid}\"\n    \
             restart: \"no\"\n    \
             labels:\n      \
               {LABEL_PLATFORM}: {PLATFORM}\n    \
             volumes:\n      \
               - type: volume\n        \
                 source: {SSH_AGENT_VOLUME}\n        \
                 target: /tmp/.ssh-agent\n    \
             environment:\n      \
               - SSH_AUTH_SOCK=/tmp/.ssh-agent/socket\n      \
               - HOST_USER={username}\n    \
             healthcheck:\n      \
               interval: 1s\n      \
               retries: 5\n      \
               start_period: 10s\n      \
               timeout: 62s\n\
         networks:\n  \
           default:\n    \
             name: {GLOBAL_NETWORK}\n    \
             external: true\n\
         volumes:\n  \
           {SSH_AGENT_VOLUME}:\n    \
             name: {SSH_AGENT_VOLUME}\n",
        uid = user.uid,
        gid = user.gid,
        username = user.username,
    );
    // Validate before writing.
    let _: Mapping = serde_yaml::from_str::<Value>(&yaml)
        .ok()
        .and_then(|v| v.as_mapping().cloned())
        .ok_or_else(|| BerthError::internal("rendered ssh-agent compose file is not a mapping"))?;
    Ok(with_signature(&yaml))
}

impl Engine {
    /// Start the shared SSH agent unless it is already running.
    pub fn ensure_ssh_agent(&self) -> Result<(), BerthError> {
        if let Some(state) = self.docker.inspect_state(SSH_AGENT_CONTAINER)? {
            if state.running {
                return Ok(());
            }
        }
        self.docker.ensure_network(GLOBAL_NETWORK)?;
        let path = compose_path();
        if let Some(parent) = path.parent() {
            paths::ensure_dir_all(parent)?;
        }
        write_if_owned(&path, &render(self)?)?;

        let spec = self
            .docker
            .compose(SSH_AGENT_CONTAINER, &[path])
            .args(["up", "--build", "--force-recreate", "-d"]);
        self.docker.stream(&spec, BUILD_TIMEOUT)?;
        self.docker
            .wait_healthy(&[SSH_AGENT_CONTAINER.to_string()], SSH_AGENT_WAIT, self.poll_interval)
            .map_err(|e| match e {
                BerthError::Container(ContainerError::Unhealthy { container, detail }) => {
                    ContainerError::Unhealthy {
                        container,
                        detail: format!("{detail}; debug with 'docker logs {SSH_AGENT_CONTAINER}'"),
                    }
                    .into()
                }
                other => other,
            })?;
        info!("ssh-agent container is running; add keys with 'berth auth ssh'");
        Ok(())
    }

    pub fn remove_ssh_agent(&self) -> Result<(), BerthError> {
        if self.docker.inspect_state(SSH_AGENT_CONTAINER)?.is_none() {
            return Ok(());
        }
        self.docker.remove_container(SSH_AGENT_CONTAINER)?;
        warn!("the ssh-agent container was removed; keys must be added again after the next start");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{RUNNING_HEALTHY, fake_engine};
    use berth_runner::ProcessOutput;

    #[test]
    fn test_running_agent_is_left_alone() {
        let (fake, engine, _home) = fake_engine();
        fake.on(&["inspect", SSH_AGENT_CONTAINER], ProcessOutput::ok(RUNNING_HEALTHY));
        engine.ensure_ssh_agent().unwrap();
        assert!(!fake.was_run(&["up"]));
    }

    #[test]
    fn test_missing_agent_is_started() {
        let (fake, engine, _home) = fake_engine();
        fake.on_once(&["inspect", SSH_AGENT_CONTAINER], ProcessOutput::ok(""));
        fake.on(&["inspect", SSH_AGENT_CONTAINER], ProcessOutput::ok(RUNNING_HEALTHY));
        engine.ensure_ssh_agent().unwrap();
        assert!(fake.was_run(&["compose", "-p", SSH_AGENT_CONTAINER, "up", "--build", "--force-recreate"]));
        let written = std::fs::read_to_string(compose_path()).unwrap();
        assert!(written.contains("container_name: ddev-ssh-agent"));
        assert!(written.contains(SSH_AGENT_VOLUME));
    }
}
