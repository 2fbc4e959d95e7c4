//! Hosting-provider pull and push.
//!
//! A provider is a YAML document under `.project-config/providers/` naming a
//! shell command for each step. Steps run in a project container or, with
//! `service: host`, on the host in the project root. Declared environment
//! variables are exported ahead of every command.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use berth_config::{DbEngine, Project};
use berth_runner::{CommandSpec, RunnerError};
use berth_utils::error::{BerthError, ProviderError};
use berth_utils::paths::{self, PROJECT_CONFIG_DIR};

use crate::compose::CONTAINER_APPROOT;
use crate::engine::Engine;
use crate::hooks::{TASK_TIMEOUT, host_shell};
use crate::lifecycle::SiteStatus;

pub const PROVIDERS_DIR: &str = "providers";
pub const DOWNLOADS_DIR: &str = ".downloads";
pub const DB_DUMP_FILE: &str = "db.sql.gz";
const HOST_SERVICE: &str = "host";

fn default_service() -> String {
    "web".to_string()
}

/// One provider step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderCommand {
    pub command: String,
    #[serde(default = "default_service")]
    pub service: String,
}

impl ProviderCommand {
    #[must_use]
    pub fn runs_on_host(&self) -> bool {
        self.service == HOST_SERVICE
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Provider {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    pub auth_command: Option<ProviderCommand>,
    pub db_pull_command: Option<ProviderCommand>,
    pub db_import_command: Option<ProviderCommand>,
    pub files_pull_command: Option<ProviderCommand>,
    pub files_import_command: Option<ProviderCommand>,
    pub db_push_command: Option<ProviderCommand>,
    pub files_push_command: Option<ProviderCommand>,
}

impl Provider {
    /// Parse a provider document.
    pub fn parse(name: &str, yaml: &str) -> Result<Self, serde_yaml::Error> {
        let mut provider: Self = serde_yaml::from_str(yaml)?;
        provider.name = name.to_string();
        Ok(provider)
    }

    /// Shell prefix exporting the declared variables.
    ///
    /// ```
    /// use berth_engine::provider::Provider;
    ///
    /// let p = Provider::parse("acme", "environment_variables:\n  SITE: my site\n  ENV: live\n").unwrap();
    /// assert_eq!(p.injected_environment(), r"export ENV=live SITE=my\ site");
    /// assert_eq!(Provider::default().injected_environment(), "true");
    /// ```
    #[must_use]
    pub fn injected_environment(&self) -> String {
        if self.environment_variables.is_empty() {
            return "true".to_string();
        }
        let pairs: Vec<String> = self
            .environment_variables
            .iter()
            .map(|(k, v)| format!("{k}={}", v.replace(' ', r"\ ")))
            .collect();
        format!("export {}", pairs.join(" "))
    }
}

#[must_use]
pub fn providers_dir(project: &Project) -> PathBuf {
    project.config_file(PROVIDERS_DIR)
}

#[must_use]
pub fn downloads_dir(project: &Project) -> PathBuf {
    project.config_file(DOWNLOADS_DIR)
}

/// Load `providers/<name>.yaml`.
pub fn load_provider(project: &Project, name: &str) -> Result<Provider, BerthError> {
    let path = providers_dir(project).join(format!("{name}.yaml"));
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ProviderError::NotFound {
                name: name.to_string(),
                path: path.display().to_string(),
            }
            .into());
        }
        Err(e) => return Err(e.into()),
    };
    Provider::parse(name, &raw).map_err(|e| {
        ProviderError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Names of the providers a project declares, sorted.
pub fn list_providers(project: &Project) -> Result<Vec<String>, BerthError> {
    let dir = providers_dir(project);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "yaml") {
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Container-side path of the downloads directory.
fn container_downloads() -> String {
    format!("{CONTAINER_APPROOT}/{PROJECT_CONFIG_DIR}/{DOWNLOADS_DIR}")
}

/// Container-side path of the first upload directory.
fn container_upload_dir(project: &Project) -> Option<String> {
    let upload = project.upload_dirs().into_iter().next()?;
    let segments: Vec<&str> = [project.config.docroot.as_str(), upload.as_str()]
        .into_iter()
        .flat_map(|s| s.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    Some(format!("{CONTAINER_APPROOT}/{}", segments.join("/")))
}

fn database_client(engine: DbEngine) -> &'static str {
    match engine {
        DbEngine::Postgres => "psql -q -h db -U db db",
        _ => "mysql -h db -uroot -proot db",
    }
}

fn database_dump(engine: DbEngine) -> &'static str {
    match engine {
        DbEngine::Postgres => "pg_dump -h db -U db db",
        _ => "mysqldump -h db -uroot -proot db",
    }
}

impl Engine {
    /// Command line a provider step runs as.
    #[must_use]
    pub fn provider_step_command(&self, project: &Project, provider: &Provider, step: &ProviderCommand) -> CommandSpec {
        let script = format!("{}; {}", provider.injected_environment(), step.command);
        if step.runs_on_host() {
            return CommandSpec::new(host_shell())
                .arg("-c")
                .arg(script)
                .cwd(&project.approot);
        }
        let argv = ["bash".to_string(), "-c".to_string(), script];
        self.docker.exec(&project.container_name(&step.service), &argv, None)
    }

    fn run_provider_step(
        &self,
        project: &Project,
        provider: &Provider,
        step_name: &str,
        step: &ProviderCommand,
    ) -> Result<(), BerthError> {
        let spec = self.provider_step_command(project, provider, step);
        info!(
            project = %project.name(),
            provider = %provider.name,
            step = step_name,
            service = %step.service,
            "running provider step"
        );
        let out = match self.docker.runner().run_streaming(&spec, TASK_TIMEOUT) {
            Ok(out) => out,
            Err(e @ RunnerError::Cancelled { .. }) => return Err(e.into()),
            Err(e) => {
                return Err(ProviderError::StepFailed {
                    step: step_name.to_string(),
                    output: e.to_string(),
                }
                .into());
            }
        };
        if !out.success() {
            let text = out.combined_output();
            return Err(ProviderError::StepFailed {
                step: step_name.to_string(),
                output: match (text.trim(), out.exit_code) {
                    ("", Some(code)) => format!("exit status {code}"),
                    ("", None) => "terminated by signal".to_string(),
                    (t, _) => t.to_string(),
                },
            }
            .into());
        }
        Ok(())
    }

    /// Run `step` if the provider declares it; a missing step only warns.
    fn run_optional_step(
        &self,
        project: &Project,
        provider: &Provider,
        step_name: &str,
        step: Option<&ProviderCommand>,
    ) -> Result<bool, BerthError> {
        match step {
            Some(step) => {
                self.run_provider_step(project, provider, step_name, step)?;
                Ok(true)
            }
            None => {
                warn!(
                    project = %project.name(),
                    provider = %provider.name,
                    step = step_name,
                    "provider does not define this step; skipping"
                );
                Ok(false)
            }
        }
    }

    fn flush_sync(&self, project: &Project) -> Result<(), BerthError> {
        if project.is_mutagen_enabled() {
            self.mutagen().flush(project)?;
        }
        Ok(())
    }

    fn ensure_running(&self, project: &Project) -> Result<(), BerthError> {
        if self.status(project)? != SiteStatus::Running {
            info!(project = %project.name(), "starting project for provider operation");
            self.start(project)?;
        }
        Ok(())
    }

    fn default_db_import(&self, project: &Project, provider: &Provider) -> Result<(), BerthError> {
        let step = ProviderCommand {
            command: format!(
                "set -eu -o pipefail; gunzip -c {}/{DB_DUMP_FILE} | {}",
                container_downloads(),
                database_client(project.database().engine)
            ),
            service: default_service(),
        };
        self.run_provider_step(project, provider, "db_import", &step)
    }

    fn default_files_import(&self, project: &Project, provider: &Provider) -> Result<(), BerthError> {
        let Some(upload) = container_upload_dir(project) else {
            warn!(project = %project.name(), "no upload directory configured; files not imported");
            return Ok(());
        };
        let step = ProviderCommand {
            command: format!("mkdir -p {upload} && cp -r {}/files/. {upload}/", container_downloads()),
            service: default_service(),
        };
        self.run_provider_step(project, provider, "files_import", &step)
    }

    /// Fresh `.downloads/` with an empty `files/` inside.
    fn reset_downloads(&self, project: &Project) -> Result<(), BerthError> {
        let dir = downloads_dir(project);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        paths::ensure_dir_all(dir.join("files"))?;
        Ok(())
    }

    /// Download the database and files from `provider` and import them.
    pub fn pull(
        &self,
        project: &Project,
        provider: &Provider,
        skip_db: bool,
        skip_files: bool,
        skip_import: bool,
    ) -> Result<(), BerthError> {
        self.run_op(project, "pull", || {
            self.process_hooks(project, "pre-pull")?;
            self.ensure_running(project)?;
            self.reset_downloads(project)?;
            self.run_optional_step(project, provider, "auth", provider.auth_command.as_ref())?;

            if skip_db {
                info!(project = %project.name(), "skipping database pull");
            } else {
                let pulled = self.run_optional_step(project, provider, "db_pull", provider.db_pull_command.as_ref())?;
                if pulled {
                    self.flush_sync(project)?;
                }
                if pulled && !skip_import {
                    match &provider.db_import_command {
                        Some(step) => self.run_provider_step(project, provider, "db_import", step)?,
                        None => self.default_db_import(project, provider)?,
                    }
                }
            }

            if skip_files {
                info!(project = %project.name(), "skipping files pull");
            } else {
                let pulled =
                    self.run_optional_step(project, provider, "files_pull", provider.files_pull_command.as_ref())?;
                if pulled {
                    self.flush_sync(project)?;
                }
                if pulled && !skip_import {
                    match &provider.files_import_command {
                        Some(step) => self.run_provider_step(project, provider, "files_import", step)?,
                        None => self.default_files_import(project, provider)?,
                    }
                }
            }

            info!(project = %project.name(), provider = %provider.name, "pull complete");
            self.process_hooks(project, "post-pull")
        })
    }

    /// Export the database and upload it and the files to `provider`.
    pub fn push(&self, project: &Project, provider: &Provider, skip_db: bool, skip_files: bool) -> Result<(), BerthError> {
        self.run_op(project, "push", || {
            self.process_hooks(project, "pre-push")?;
            self.ensure_running(project)?;
            self.reset_downloads(project)?;
            self.run_optional_step(project, provider, "auth", provider.auth_command.as_ref())?;

            if !skip_db && provider.db_push_command.is_none() {
                self.run_optional_step(project, provider, "db_push", None)?;
            } else if !skip_db {
                let export = ProviderCommand {
                    command: format!(
                        "set -eu -o pipefail; {} | gzip > {}/{DB_DUMP_FILE}",
                        database_dump(project.database().engine),
                        container_downloads()
                    ),
                    service: default_service(),
                };
                self.run_provider_step(project, provider, "db_export", &export)?;
                self.flush_sync(project)?;
                self.run_optional_step(project, provider, "db_push", provider.db_push_command.as_ref())?;
            }
            if !skip_files {
                self.run_optional_step(project, provider, "files_push", provider.files_push_command.as_ref())?;
            }

            info!(project = %project.name(), provider = %provider.name, "push complete");
            self.process_hooks(project, "post-push")
        })
    }
}
