//! CLI argument definitions and parsing structures
//!
//! This module defines the command-line interface structure using clap,
//! including the main `Cli` struct and all subcommand enums.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// berth - per-project container development environments
#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(about = "Run PHP projects in per-project containers behind a shared HTTP router")]
#[command(long_about = r#"
berth runs each project in its own set of containers (web, db and any extra
compose services) and publishes them behind a shared router at
https://<name>.ddev.site.

EXAMPLES:
  # Create or update .project-config/config.yaml in the current directory
  berth config --project-type drupal --docroot web

  # Start the current project, then a second one by name
  berth start
  berth start shop

  # Show URLs, services and router health
  berth describe --json

  # Take and restore a database snapshot
  berth snapshot create --name before-upgrade
  berth snapshot restore before-upgrade

  # Pull the database and files from a hosting provider
  berth pull acme --skip-files

  # Stop everything, including the router
  berth poweroff

CONFIGURATION:
  Project configuration lives in .project-config/config.yaml, with optional
  config.*.yaml overrides applied in lexical order. Global configuration
  lives in ~/.berth/global_config.yaml (or $BERTH_HOME).
"#)]
#[command(version)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Do not run any hooks
    #[arg(long, global = true)]
    pub skip_hooks: bool,

    /// Run as if started in this directory
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or update the project configuration
    Config {
        /// Project name (defaults to the directory name)
        #[arg(long)]
        project_name: Option<String>,

        /// Project type, e.g. php, drupal, wordpress, laravel
        #[arg(long)]
        project_type: Option<String>,

        /// Docroot relative to the project root
        #[arg(long)]
        docroot: Option<String>,

        /// Database as engine:version, e.g. mariadb:10.11 or postgres:16
        #[arg(long)]
        database: Option<String>,

        /// Host port for the router's HTTP entrypoint
        #[arg(long)]
        router_http_port: Option<u16>,

        /// Host port for the router's HTTPS entrypoint
        #[arg(long)]
        router_https_port: Option<u16>,

        /// Additional hostnames under the project TLD
        #[arg(long, value_delimiter = ',')]
        additional_hostnames: Vec<String>,
    },

    /// Start projects (the current one when no names are given)
    Start {
        /// Project names
        projects: Vec<String>,

        /// Start every known project
        #[arg(short, long, conflicts_with = "projects")]
        all: bool,
    },

    /// Stop projects
    Stop {
        projects: Vec<String>,

        #[arg(short, long, conflicts_with = "projects")]
        all: bool,

        /// Remove the database volume and forget the project
        #[arg(long)]
        remove_data: bool,

        /// Also remove the project's built images
        #[arg(long)]
        remove_images: bool,
    },

    /// Pause project containers without removing them
    Pause {
        projects: Vec<String>,

        #[arg(short, long, conflicts_with = "projects")]
        all: bool,
    },

    /// Stop and start projects
    Restart {
        projects: Vec<String>,

        #[arg(short, long, conflicts_with = "projects")]
        all: bool,
    },

    /// Stop every project and remove the shared router, agent and network
    Poweroff,

    /// List known projects and their status
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Describe a project: URLs, services and router health
    Describe {
        project: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Database snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommands),

    /// Pull the database and files from a hosting provider
    Pull {
        /// Provider name (`.project-config/providers/<name>.yaml`)
        provider: String,

        #[arg(long)]
        skip_db: bool,

        #[arg(long)]
        skip_files: bool,

        /// Download but do not import
        #[arg(long)]
        skip_import: bool,
    },

    /// Push the database and files to a hosting provider
    Push {
        provider: String,

        #[arg(long)]
        skip_db: bool,

        #[arg(long)]
        skip_files: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommands {
    /// Snapshot the running database
    Create {
        /// Snapshot name (defaults to <project>_<timestamp>)
        #[arg(long)]
        name: Option<String>,
    },

    /// List snapshots, most recent first
    List {
        #[arg(long)]
        json: bool,
    },

    /// Restore a snapshot into the project's database
    Restore {
        name: Option<String>,

        /// Restore the most recent snapshot
        #[arg(long, conflicts_with = "name")]
        latest: bool,
    },

    /// Delete a snapshot
    Delete { name: String },
}

/// Build the clap command (for completions and help rendering tests).
#[must_use]
pub fn build_cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}
