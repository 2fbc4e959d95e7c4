//! Database snapshots.
//!
//! A snapshot is a gzipped engine-native backup named
//! `<name>-<engine>_<version>.gz` under `.project-config/db_snapshots`.
//! Older releases wrote a directory `<name>/` holding the raw backup and a
//! `db_mariadb_version.txt`; those are still listed and restored but never
//! produced.

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

use berth_config::dbtypes::parse_probe;
use berth_config::{DatabaseDesc, DbEngine, Project};
use berth_utils::error::{BerthError, ContainerError, SnapshotError};
use berth_utils::paths;

use crate::compose::{self, ComposeOptions, SNAPSHOT_MOUNT, postgres_data_dir};
use crate::docker::ENGINE_TIMEOUT;
use crate::engine::Engine;
use crate::probe::PROBE_IMAGE;

pub const SNAPSHOT_DIR: &str = "db_snapshots";
const LEGACY_VERSION_FILE: &str = "db_mariadb_version.txt";
const CONTAINER_STAGING: &str = "/var/tmp";
const POSTGRES_CONFIG_DIR: &str = "/etc/postgresql";
/// uid the postgres image runs as.
const POSTGRES_UID: &str = "999";
const BACKUP_TIMEOUT: Duration = Duration::from_secs(3600);

static SNAPSHOT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-(mariadb|mysql|postgres)_[0-9.]*\.gz$").unwrap());
static FILE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(mariadb|mysql|postgres)_([0-9.]+)\.gz$").unwrap());

#[must_use]
pub fn snapshot_dir(project: &Project) -> PathBuf {
    project.config_file(SNAPSHOT_DIR)
}

/// `<name>-<engine>_<version>.gz`
#[must_use]
pub fn snapshot_file_name(name: &str, db: &DatabaseDesc) -> String {
    format!("{name}-{}.gz", db.file_tag())
}

fn validate_name(name: &str) -> Result<(), SnapshotError> {
    if name.trim().is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(SnapshotError::InvalidName { name: name.to_string() });
    }
    Ok(())
}

/// Snapshot name of a directory entry, if it is a snapshot at all.
fn entry_name(file_name: &str, is_dir: bool) -> Option<String> {
    if is_dir {
        return Some(file_name.to_string());
    }
    file_name
        .ends_with(".gz")
        .then(|| SNAPSHOT_SUFFIX.replace(file_name, "").into_owned())
}

/// Snapshot names, most recent first.
pub fn list_snapshots(project: &Project) -> Result<Vec<String>, BerthError> {
    let dir = snapshot_dir(project);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found: Vec<(SystemTime, String)> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(name) = entry_name(&file_name, meta.is_dir()) {
            found.push((meta.modified()?, name));
        }
    }
    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, n)| n).collect())
}

/// The most recent snapshot.
pub fn latest_snapshot(project: &Project) -> Result<String, BerthError> {
    list_snapshots(project)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            SnapshotError::NoSnapshots {
                project: project.name().to_string(),
            }
            .into()
        })
}

/// Path and file name of the snapshot called `name`.
fn resolve(project: &Project, name: &str) -> Result<(PathBuf, String), BerthError> {
    validate_name(name)?;
    let dir = snapshot_dir(project);
    let legacy = dir.join(name);
    if legacy.is_dir() {
        return Ok((legacy, name.to_string()));
    }
    if dir.is_dir() {
        for entry in std::fs::read_dir(&dir)? {
            let file_name = entry?.file_name().to_string_lossy().into_owned();
            if entry_name(&file_name, false).as_deref() == Some(name) {
                return Ok((dir.join(&file_name), file_name));
            }
        }
    }
    Err(SnapshotError::NotFound { name: name.to_string() }.into())
}

/// Engine and version a snapshot was taken with; `None` when a legacy
/// snapshot carries no version file.
pub fn snapshot_database(path: &Path) -> Result<Option<DatabaseDesc>, BerthError> {
    if path.is_dir() {
        let version_file = path.join(LEGACY_VERSION_FILE);
        return match std::fs::read_to_string(&version_file) {
            Ok(raw) => Ok(Some(parse_probe(&raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
    }
    let file_name = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(FILE_TAG.captures(&file_name).and_then(|caps| {
        let engine: DbEngine = caps[1].parse().ok()?;
        Some(DatabaseDesc::new(engine, &caps[2]))
    }))
}

/// Shell pipeline writing a gzipped backup of the running server to `target`.
#[must_use]
pub fn backup_command(db: &DatabaseDesc, target: &str) -> String {
    let base = target.rsplit('/').next().unwrap_or(target);
    let log = format!("/tmp/snapshot_{base}.log");
    let xtrabackup = matches!(db.engine, DbEngine::Mysql)
        || (db.engine == DbEngine::Mariadb && matches!(db.version.as_str(), "5.5" | "10.0"));
    match db.engine {
        DbEngine::Postgres => format!(
            "rm -rf /var/tmp/pgbackup && pg_basebackup -D /var/tmp/pgbackup 2>{log} && tar -czf {target} -C /var/tmp/pgbackup/ ."
        ),
        _ if xtrabackup => format!(
            "xtrabackup --backup --stream=xbstream --user=root --password=root --socket=/var/tmp/mysql.sock 2>{log} | gzip > \"{target}\""
        ),
        _ => format!(
            "mariabackup --backup --stream=mbstream --user=root --password=root --socket=/var/tmp/mysql.sock 2>{log} | gzip > \"{target}\""
        ),
    }
}

/// Main process of the db container during a restore.
#[must_use]
pub fn restore_command(db: &DatabaseDesc, file: &str) -> String {
    if db.engine != DbEngine::Postgres {
        return format!("restore_snapshot {file}");
    }
    let data = postgres_data_dir(&db.version);
    let confd = format!("{POSTGRES_CONFIG_DIR}/conf.d");
    let major: u32 = db.version.split('.').next().and_then(|m| m.parse().ok()).unwrap_or(0);
    let recovery = if major < 12 {
        format!("{POSTGRES_CONFIG_DIR}/recovery.conf")
    } else {
        format!("{confd}/recovery.conf")
    };
    format!(
        "bash -c 'chmod 700 {data} && mkdir -p {confd} && rm -rf {data}/* && tar -C {data} -zxf {SNAPSHOT_MOUNT}/{file} \
         && touch {data}/recovery.signal && cat /var/lib/postgresql/recovery.conf >>{recovery} \
         && postgres -c config_file={POSTGRES_CONFIG_DIR}/postgresql.conf -c hba_file={POSTGRES_CONFIG_DIR}/pg_hba.conf'"
    )
}

const MYSQL_READY_QUERY: &str = "(echo \"SHOW VARIABLES like 'v%';\" | mysql 2>/dev/null) || true";

impl Engine {
    fn snapshot_uid(&self, project: &Project) -> String {
        match project.database().engine {
            DbEngine::Postgres => POSTGRES_UID.to_string(),
            _ => self.user.uid.to_string(),
        }
    }

    fn db_exec(&self, project: &Project, op: &str, script: &str, user: Option<&str>) -> Result<String, BerthError> {
        let argv = ["bash".to_string(), "-c".to_string(), script.to_string()];
        let spec = self.docker.exec(&project.container_name("db"), &argv, user);
        debug!(command = %spec, "snapshot step");
        let out = self.docker.try_capture(&spec, BACKUP_TIMEOUT)?;
        if !out.success() {
            return Err(SnapshotError::CommandFailed {
                op: op.to_string(),
                output: out.combined_output().trim().to_string(),
            }
            .into());
        }
        Ok(out.stdout_string())
    }

    /// Back up the running database as `name` (or a timestamped default).
    pub fn snapshot(&self, project: &Project, name: Option<&str>) -> Result<String, BerthError> {
        self.run_op(project, "snapshot", || {
            self.process_hooks(project, "pre-snapshot")?;
            let name = match name {
                Some(n) => n.to_string(),
                None => format!("{}_{}", project.name(), Local::now().format("%Y%m%d%H%M%S")),
            };
            validate_name(&name)?;
            if list_snapshots(project)?.contains(&name) {
                return Err(SnapshotError::AlreadyExists { name }.into());
            }

            let container = project.container_name("db");
            let running = self.docker.inspect_state(&container)?.is_some_and(|s| s.is_ready());
            if !running {
                return Err(ContainerError::NotRunning {
                    project: project.name().to_string(),
                    service: "db".to_string(),
                }
                .into());
            }

            let db = project.database();
            let file = snapshot_file_name(&name, db);
            let staged = format!("{CONTAINER_STAGING}/{file}");
            info!(project = %project.name(), snapshot = %name, "creating database snapshot");
            self.db_exec(
                project,
                "backup",
                &format!("set -eu -o pipefail; {}", backup_command(db, &staged)),
                None,
            )?;

            let dir = snapshot_dir(project);
            paths::ensure_dir_all(&dir)?;
            if project.no_bind_mounts() {
                self.docker.copy_out(&container, &staged, &dir)?;
            } else {
                let uid = self.snapshot_uid(project);
                self.db_exec(project, "copy", &format!("cp -r {staged} {SNAPSHOT_MOUNT}/"), Some(&uid))?;
            }
            self.db_exec(project, "cleanup", &format!("rm -f {staged}"), None)?;

            self.process_hooks(project, "post-snapshot")?;
            info!(project = %project.name(), snapshot = %name, file = %file, "snapshot created");
            Ok(name)
        })
    }

    /// Copy a snapshot into the snapshot volume when bind mounts are off.
    fn copy_into_snapshot_volume(&self, project: &Project, src: &Path, subdir: Option<&str>) -> Result<(), BerthError> {
        let helper = format!("ddev-{}-snapshot-helper", project.name());
        let volume = compose::snapshot_volume(project);
        self.docker.create_volume(&volume)?;
        let _ = self.docker.remove_container(&helper);
        let run = self.docker.command().args([
            "run",
            "-d",
            "--name",
            &helper,
            "-v",
            &format!("{volume}:{SNAPSHOT_MOUNT}"),
            PROBE_IMAGE,
            "sleep",
            "300",
        ]);
        self.docker.capture(&run)?;
        let dest = match subdir {
            Some(s) => format!("{SNAPSHOT_MOUNT}/{s}"),
            None => SNAPSHOT_MOUNT.to_string(),
        };
        let result = self.docker.copy_into(src, &helper, &dest).and_then(|()| {
            let chown = [
                "chown".to_string(),
                "-R".to_string(),
                self.snapshot_uid(project),
                SNAPSHOT_MOUNT.to_string(),
            ];
            self.docker.capture(&self.docker.exec(&helper, &chown, None)).map(drop)
        });
        let _ = self.docker.remove_container(&helper);
        result
    }

    /// Replace the project's database with snapshot `name`.
    pub fn restore_snapshot(&self, project: &Project, name: &str) -> Result<(), BerthError> {
        self.run_op(project, "restore-snapshot", || {
            self.process_hooks(project, "pre-restore-snapshot")?;
            let (path, file) = resolve(project, name)?;
            let configured = project.database();
            let found = snapshot_database(&path)?;
            if found.as_ref() != Some(configured) {
                return Err(SnapshotError::Incompatible {
                    name: name.to_string(),
                    snapshot: found.map_or_else(|| "unknown".to_string(), |d| d.to_string()),
                    configured: configured.to_string(),
                }
                .into());
            }

            let container = project.container_name("db");
            if self
                .docker
                .inspect_state(&container)?
                .is_some_and(|s| s.running || s.paused)
            {
                info!(project = %project.name(), "removing db container for snapshot restore");
                self.docker.remove_container(&container)?;
            }
            if project.no_bind_mounts() {
                let subdir = path.is_dir().then_some(name);
                self.copy_into_snapshot_volume(project, &path, subdir)?;
            }

            let started = Instant::now();
            let opts = ComposeOptions {
                db_command: Some(restore_command(configured, &file)),
            };
            self.start_with(project, &opts)?;

            if configured.engine != DbEngine::Postgres {
                self.wait_for_restore(project)?;
            }
            info!(
                project = %project.name(),
                snapshot = %name,
                seconds = started.elapsed().as_secs(),
                "database snapshot restored"
            );
            self.process_hooks(project, "post-restore-snapshot")
        })
    }

    /// Poll the server until it answers a trivial query, bounded by the
    /// project's container timeout.
    fn wait_for_restore(&self, project: &Project) -> Result<(), BerthError> {
        let timeout = project.container_timeout();
        let deadline = Instant::now() + timeout;
        let argv = ["bash".to_string(), "-c".to_string(), MYSQL_READY_QUERY.to_string()];
        let spec = self.docker.exec(&project.container_name("db"), &argv, None);
        loop {
            let out = self.docker.try_capture(&spec, ENGINE_TIMEOUT)?;
            if !out.stdout_string().trim().is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ContainerError::Unhealthy {
                    container: project.container_name("db"),
                    detail: format!("snapshot restore did not complete within {}s", timeout.as_secs()),
                }
                .into());
            }
            debug!(project = %project.name(), "waiting for snapshot restore to complete");
            std::thread::sleep(self.poll_interval);
        }
    }

    pub fn delete_snapshot(&self, project: &Project, name: &str) -> Result<(), BerthError> {
        self.run_op(project, "delete-snapshot", || {
            self.process_hooks(project, "pre-delete-snapshot")?;
            let (path, _) = resolve(project, name)?;
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            info!(project = %project.name(), snapshot = %name, "snapshot deleted");
            self.process_hooks(project, "post-delete-snapshot")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{configured_project, fake_engine, script_start};
    use berth_runner::ProcessOutput;
    use berth_utils::ErrorKind;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(project: &Project, rel: &str, age_secs: u64) {
        let path = snapshot_dir(project).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "x").unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        File::options().write(true).open(&path).unwrap().set_modified(when).unwrap();
    }

    #[test]
    fn test_list_strips_suffix_newest_first() {
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        touch(&p, "old-mariadb_10.4.gz", 300);
        touch(&p, "new-mariadb_10.11.gz", 10);
        touch(&p, "pg-postgres_16.gz", 100);
        touch(&p, "notes.txt", 1);
        std::fs::create_dir_all(snapshot_dir(&p).join("legacy")).unwrap();

        let names = list_snapshots(&p).unwrap();
        assert_eq!(names, vec!["legacy", "new", "pg", "old"]);
        assert_eq!(latest_snapshot(&p).unwrap(), "legacy");
    }

    #[test]
    fn test_latest_without_snapshots() {
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        assert_eq!(latest_snapshot(&p).unwrap_err().kind(), ErrorKind::NoSnapshots);
    }

    #[test]
    fn test_incompatible_snapshot_touches_nothing() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        touch(&p, "morning-mariadb_10.4.gz", 0);

        let err = engine.restore_snapshot(&p, "morning").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SnapshotIncompatible);
        assert!(err.to_string().contains("mariadb:10.4"));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_unknown_snapshot_not_found() {
        let (_fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        let err = engine.restore_snapshot(&p, "nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SnapshotNotFound);
        assert_eq!(
            engine.delete_snapshot(&p, "../x").unwrap_err().kind(),
            ErrorKind::ConfigInvalid
        );
    }

    #[test]
    fn test_legacy_directory_version() {
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        let dir = snapshot_dir(&p).join("before");
        std::fs::create_dir_all(&dir).unwrap();
        assert_eq!(snapshot_database(&dir).unwrap(), None);
        std::fs::write(dir.join(LEGACY_VERSION_FILE), "10.11\n").unwrap();
        assert_eq!(
            snapshot_database(&dir).unwrap(),
            Some(DatabaseDesc::new(DbEngine::Mariadb, "10.11"))
        );
    }

    #[test]
    fn test_backup_commands_per_engine() {
        let maria = backup_command(&DatabaseDesc::new(DbEngine::Mariadb, "10.11"), "/var/tmp/a-mariadb_10.11.gz");
        assert!(maria.starts_with("mariabackup --backup"));
        assert!(maria.contains("2>/tmp/snapshot_a-mariadb_10.11.gz.log"));
        let old = backup_command(&DatabaseDesc::new(DbEngine::Mariadb, "10.0"), "/var/tmp/a.gz");
        assert!(old.starts_with("xtrabackup"));
        let pg = backup_command(&DatabaseDesc::new(DbEngine::Postgres, "16"), "/var/tmp/a-postgres_16.gz");
        assert!(pg.contains("pg_basebackup -D /var/tmp/pgbackup"));
        assert!(pg.ends_with("tar -czf /var/tmp/a-postgres_16.gz -C /var/tmp/pgbackup/ ."));
    }

    #[test]
    fn test_postgres_recovery_file_by_major() {
        let pg11 = restore_command(&DatabaseDesc::new(DbEngine::Postgres, "11"), "s-postgres_11.gz");
        assert!(pg11.contains(">>/etc/postgresql/recovery.conf"));
        let pg16 = restore_command(&DatabaseDesc::new(DbEngine::Postgres, "16"), "s-postgres_16.gz");
        assert!(pg16.contains(">>/etc/postgresql/conf.d/recovery.conf"));
        assert!(pg16.contains("recovery.signal"));
        assert_eq!(
            restore_command(&DatabaseDesc::default(), "s-mariadb_10.11.gz"),
            "restore_snapshot s-mariadb_10.11.gz"
        );
    }

    #[test]
    fn test_snapshot_runs_backup_and_copy() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        script_start(&fake, "alpha");

        let name = engine.snapshot(&p, Some("nightly")).unwrap();
        assert_eq!(name, "nightly");
        assert!(fake.was_run(&["exec", "ddev-alpha-db", "mariabackup", "/var/tmp/nightly-mariadb_10.11.gz"]));
        assert!(fake.was_run(&["exec -u 501 ddev-alpha-db", "cp -r /var/tmp/nightly-mariadb_10.11.gz /mnt/snapshots/"]));
        assert!(fake.was_run(&["rm -f /var/tmp/nightly-mariadb_10.11.gz"]));

        touch(&p, "nightly-mariadb_10.11.gz", 0);
        let err = engine.snapshot(&p, Some("nightly")).unwrap_err();
        assert!(matches!(err.root(), BerthError::Snapshot(SnapshotError::AlreadyExists { .. })));
    }

    #[test]
    fn test_snapshot_requires_running_db() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        fake.fail(&["inspect"], 1, "Error: No such object");
        let err = engine.snapshot(&p, Some("x")).unwrap_err();
        assert!(matches!(err.root(), BerthError::Container(ContainerError::NotRunning { .. })));
    }

    #[test]
    fn test_restore_restarts_with_restore_command() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        touch(&p, "morning-mariadb_10.11.gz", 0);
        script_start(&fake, "alpha");
        fake.on(&["SHOW VARIABLES"], ProcessOutput::ok("version\t10.11.8\n"));

        engine.restore_snapshot(&p, "morning").unwrap();
        assert!(fake.was_run(&["rm", "-f", "ddev-alpha-db"]));
        let base = std::fs::read_to_string(p.config_file(compose::BASE_FILE)).unwrap();
        assert!(base.contains("restore_snapshot morning-mariadb_10.11.gz"));
    }

    #[test]
    fn test_restore_poll_is_bounded() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let mut p = configured_project(root.path(), "alpha");
        p.config.default_container_timeout = 0;
        touch(&p, "morning-mariadb_10.11.gz", 0);
        script_start(&fake, "alpha");

        let err = engine.restore_snapshot(&p, "morning").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerUnhealthy);
        assert!(err.to_string().contains("did not complete"));
    }

    #[test]
    fn test_delete_removes_file() {
        let (_fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = configured_project(root.path(), "alpha");
        touch(&p, "gone-mariadb_10.11.gz", 0);
        engine.delete_snapshot(&p, "gone").unwrap();
        assert!(list_snapshots(&p).unwrap().is_empty());
    }
}
