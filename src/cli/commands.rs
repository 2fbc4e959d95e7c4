//! CLI command implementations
//!
//! Each `execute_*` handler resolves the projects it acts on, calls into the
//! engine and prints a short human summary (or JSON where offered).

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use berth_config::apptypes::{self, detect_app_type};
use berth_config::{DatabaseDesc, GlobalConfig, Project, ProjectConfig, find_project_root};
use berth_engine::provider::load_provider;
use berth_engine::snapshot::{latest_snapshot, list_snapshots};
use berth_engine::{Description, Engine, SiteStatus};
use berth_runner::ProcessRunner;
use berth_utils::error::ConfigError;
use berth_utils::paths::PROJECT_CONFIG_DIR;

use super::args::{Cli, Commands, SnapshotCommands};

/// Shared state of one CLI invocation.
pub(crate) struct Session {
    pub(crate) engine: Engine,
    pub(crate) global: GlobalConfig,
    pub(crate) cwd: PathBuf,
}

impl Session {
    pub(crate) fn new(runner: Arc<dyn ProcessRunner>, skip_hooks: bool, dir: Option<PathBuf>) -> Result<Self> {
        let global = GlobalConfig::load()?;
        let cwd = match dir {
            Some(d) => d,
            None => std::env::current_dir().context("cannot determine the working directory")?,
        };
        Ok(Self {
            engine: Engine::new(runner).skip_hooks(skip_hooks),
            global,
            cwd,
        })
    }

    /// The project containing the working directory.
    pub(crate) fn current_project(&self) -> Result<Project> {
        let root = find_project_root(&self.cwd).ok_or_else(|| ConfigError::NotFound {
            path: self.cwd.join(PROJECT_CONFIG_DIR).join("config.yaml").display().to_string(),
        })?;
        Ok(Project::load(root, true, self.global.clone())?)
    }

    pub(crate) fn project_named(&self, name: &str) -> Result<Project> {
        let entry = self.engine.registry().get(name)?.ok_or_else(|| ConfigError::NotFound {
            path: format!("project '{name}' (not in the project list)"),
        })?;
        Ok(Project::load(entry.approot, true, self.global.clone())?)
    }

    fn project_or_current(&self, name: Option<&str>) -> Result<Project> {
        match name {
            Some(n) => self.project_named(n),
            None => self.current_project(),
        }
    }

    /// Named projects, every known project with `all`, else the current one.
    pub(crate) fn select(&self, names: &[String], all: bool) -> Result<Vec<Project>> {
        if all {
            return self
                .engine
                .registry()
                .list()?
                .into_iter()
                .map(|(_, entry)| -> Result<Project> { Ok(Project::load(entry.approot, true, self.global.clone())?) })
                .collect();
        }
        if names.is_empty() {
            return Ok(vec![self.current_project()?]);
        }
        names.iter().map(|n| self.project_named(n)).collect()
    }
}

/// Run the parsed command to completion.
pub fn dispatch(cli: Cli, runner: Arc<dyn ProcessRunner>) -> Result<()> {
    let session = Session::new(runner, cli.skip_hooks, cli.dir)?;
    match cli.command {
        Commands::Config {
            project_name,
            project_type,
            docroot,
            database,
            router_http_port,
            router_https_port,
            additional_hostnames,
        } => execute_config_command(
            &session,
            ConfigFlags {
                project_name,
                project_type,
                docroot,
                database,
                router_http_port,
                router_https_port,
                additional_hostnames,
            },
        ),
        Commands::Start { projects, all } => {
            for p in session.select(&projects, all)? {
                session.engine.start(&p)?;
                println!("Project {} started at {}", p.name(), p.primary_url(None));
            }
            Ok(())
        }
        Commands::Stop {
            projects,
            all,
            remove_data,
            remove_images,
        } => {
            for p in session.select(&projects, all)? {
                session.engine.stop(&p, remove_data, remove_images)?;
                if remove_data {
                    println!("Project {} stopped and its data removed", p.name());
                } else {
                    println!("Project {} stopped", p.name());
                }
            }
            Ok(())
        }
        Commands::Pause { projects, all } => {
            for p in session.select(&projects, all)? {
                session.engine.pause(&p)?;
                println!("Project {} paused", p.name());
            }
            Ok(())
        }
        Commands::Restart { projects, all } => {
            for p in session.select(&projects, all)? {
                session.engine.restart(&p)?;
                println!("Project {} restarted at {}", p.name(), p.primary_url(None));
            }
            Ok(())
        }
        Commands::Poweroff => execute_poweroff_command(&session),
        Commands::List { json } => execute_list_command(&session, json),
        Commands::Describe { project, json } => {
            let p = session.project_or_current(project.as_deref())?;
            let description = session.engine.describe(&p)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&description)?);
            } else {
                print!("{}", render_description(&description));
            }
            Ok(())
        }
        Commands::Snapshot(cmd) => execute_snapshot_command(&session, cmd),
        Commands::Pull {
            provider,
            skip_db,
            skip_files,
            skip_import,
        } => {
            let p = session.current_project()?;
            let provider = load_provider(&p, &provider)?;
            session.engine.pull(&p, &provider, skip_db, skip_files, skip_import)?;
            println!("Pulled from {} into {}", provider.name, p.name());
            Ok(())
        }
        Commands::Push {
            provider,
            skip_db,
            skip_files,
        } => {
            let p = session.current_project()?;
            let provider = load_provider(&p, &provider)?;
            session.engine.push(&p, &provider, skip_db, skip_files)?;
            println!("Pushed {} to {}", p.name(), provider.name);
            Ok(())
        }
    }
}

// ============================================================================
// Config Command
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct ConfigFlags {
    pub project_name: Option<String>,
    pub project_type: Option<String>,
    pub docroot: Option<String>,
    pub database: Option<String>,
    pub router_http_port: Option<u16>,
    pub router_https_port: Option<u16>,
    pub additional_hostnames: Vec<String>,
}

fn dir_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().replace(['_', ' ', '.'], "-"))
        .unwrap_or_else(|| "project".to_string())
}

/// Apply `flags` to the project at `root`, creating its config when missing.
pub(crate) fn configure_project(session: &Session, root: &Path, flags: ConfigFlags) -> Result<Project> {
    let existing = find_project_root(root).filter(|r| r == root);
    let mut project = match existing {
        Some(r) => Project::load(r, false, session.global.clone())?,
        None => Project::new(
            root,
            ProjectConfig::with_name(flags.project_name.clone().unwrap_or_else(|| dir_name(root))),
            session.global.clone(),
        ),
    };
    let is_new = project.loaded_files.is_empty();

    if let Some(name) = flags.project_name {
        project.config.name = name;
    }
    if let Some(docroot) = flags.docroot {
        project.config.docroot = docroot;
    }
    match flags.project_type {
        Some(t) if !apptypes::is_valid(&t) => {
            let valid: Vec<&str> = apptypes::valid_types().into_iter().collect();
            return Err(ConfigError::invalid("type", format!("'{t}' is not one of {}", valid.join(", "))).into());
        }
        Some(t) => project.config.app_type = t,
        None if is_new => project.config.app_type = detect_app_type(root, &project.config.docroot).to_string(),
        None => {}
    }
    if let Some(db) = flags.database {
        project.config.database = DatabaseDesc::parse_pair(&db)?;
    }
    if flags.router_http_port.is_some() {
        project.config.router_http_port = flags.router_http_port;
    }
    if flags.router_https_port.is_some() {
        project.config.router_https_port = flags.router_https_port;
    }
    if !flags.additional_hostnames.is_empty() {
        project.config.additional_hostnames = flags.additional_hostnames;
    }

    project.configure(session.engine.registry())?;
    Ok(project)
}

fn execute_config_command(session: &Session, flags: ConfigFlags) -> Result<()> {
    let root = find_project_root(&session.cwd).unwrap_or_else(|| session.cwd.clone());
    let project = configure_project(session, &root, flags)?;
    println!(
        "Configured {} ({}) at {}; start it with `berth start`",
        project.name(),
        project.config.app_type,
        project.config_path().display()
    );
    Ok(())
}

// ============================================================================
// Poweroff / List
// ============================================================================

fn execute_poweroff_command(session: &Session) -> Result<()> {
    let report = session.engine.poweroff(&session.global)?;
    for name in &report.stopped {
        println!("Project {name} stopped");
    }
    if !report.failed.is_empty() {
        for (name, err) in &report.failed {
            eprintln!("✗ {name}: {err}");
        }
        bail!("{} project(s) failed to stop", report.failed.len());
    }
    println!("All projects stopped; router and shared network removed");
    Ok(())
}

fn execute_list_command(session: &Session, json: bool) -> Result<()> {
    let rows = session.engine.list(&session.global)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No projects; run `berth config` in a project root to add one");
        return Ok(());
    }
    let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(4).max(4);
    println!("{:<width$}  {:<14}  {}", "NAME", "STATUS", "URL");
    for r in rows {
        println!(
            "{:<width$}  {:<14}  {}",
            r.name,
            r.status.to_string(),
            r.url.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub(crate) fn render_description(d: &Description) -> String {
    let mut out = format!(
        "{} ({}) in {}\n  status:   {}\n  type:     {}\n  database: {}\n  router:   {}\n  url:      {}\n",
        d.name,
        d.docroot,
        d.approot.display(),
        d.status,
        d.app_type,
        d.database,
        d.router,
        d.primary_url,
    );
    for url in d.urls.iter().filter(|u| **u != d.primary_url) {
        out.push_str(&format!("            {url}\n"));
    }
    for (name, svc) in &d.services {
        out.push_str(&format!("  {name}: {} [{}]", svc.status, svc.container));
        if !svc.host_ports.is_empty() {
            out.push_str(&format!(" ports {}", svc.host_ports.join(", ")));
        }
        if let Some(info) = &svc.describe_info {
            out.push_str(&format!(" ({info})"));
        }
        out.push('\n');
    }
    if d.status != SiteStatus::Running {
        out.push_str("  (not running; `berth start` to bring it up)\n");
    }
    out
}

// ============================================================================
// Snapshot Command
// ============================================================================

fn execute_snapshot_command(session: &Session, cmd: SnapshotCommands) -> Result<()> {
    let project = session.current_project()?;
    match cmd {
        SnapshotCommands::Create { name } => {
            let name = session.engine.snapshot(&project, name.as_deref())?;
            println!("Created snapshot {name}");
        }
        SnapshotCommands::List { json } => {
            let names = list_snapshots(&project)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if names.is_empty() {
                println!("No snapshots for {}", project.name());
            } else {
                for n in names {
                    println!("{n}");
                }
            }
        }
        SnapshotCommands::Restore { name, latest } => {
            let name = match (name, latest) {
                (Some(n), _) => n,
                (None, true) => latest_snapshot(&project)?,
                (None, false) => bail!("give a snapshot name or --latest"),
            };
            session.engine.restore_snapshot(&project, &name)?;
            println!("Restored snapshot {name} into {}", project.name());
        }
        SnapshotCommands::Delete { name } => {
            session.engine.delete_snapshot(&project, &name)?;
            println!("Deleted snapshot {name}");
        }
    }
    Ok(())
}
