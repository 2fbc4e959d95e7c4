//! Database engine probe.
//!
//! Finds out which engine and version last wrote a project's data volume, so
//! a start against an incompatible configuration fails before the database
//! server touches the files.

use tracing::{debug, warn};

use berth_config::Project;
use berth_config::dbtypes::parse_probe_output;
use berth_utils::error::BerthError;

use crate::docker::{Docker, ENGINE_TIMEOUT, command_failed};

pub const PROBE_IMAGE: &str = "busybox:stable";

const MYSQL_MOUNT: &str = "/var/tmp/mysql";
const POSTGRES_MOUNT: &str = "/var/tmp/postgres";

fn probe_script() -> String {
    format!(
        "if [ -f {MYSQL_MOUNT}/db_mariadb_version.txt ]; then cat {MYSQL_MOUNT}/db_mariadb_version.txt; \
         elif [ -f {POSTGRES_MOUNT}/PG_VERSION ]; then cat {POSTGRES_MOUNT}/PG_VERSION; \
         else for f in {POSTGRES_MOUNT}/*/docker/PG_VERSION; do [ -f \"$f\" ] && cat \"$f\" && break; done; fi"
    )
}

/// `engine:version` found in the project's data volumes, or `""` when there
/// is no data yet.
pub fn probe(docker: &Docker, project: &Project) -> Result<String, BerthError> {
    let mysql_vol = format!("{}-mariadb", project.name());
    let pg_vol = format!("{}-postgres", project.name());
    let mysql_existed = docker.volume_exists(&mysql_vol)?;
    let pg_existed = docker.volume_exists(&pg_vol)?;
    if !mysql_existed && !pg_existed {
        return Ok(String::new());
    }

    let spec = docker.command().args([
        "run",
        "--rm",
        "-v",
        &format!("{mysql_vol}:{MYSQL_MOUNT}"),
        "-v",
        &format!("{pg_vol}:{POSTGRES_MOUNT}"),
        PROBE_IMAGE,
        "sh",
        "-c",
        &probe_script(),
    ]);
    let out = docker.try_capture(&spec, ENGINE_TIMEOUT)?;
    if !out.success() {
        return Err(command_failed(&spec, &out));
    }
    let raw = out.stdout_string();
    let raw = raw.trim();
    // Mounting a missing volume creates it; drop only those again.
    let created = [(&mysql_vol, mysql_existed), (&pg_vol, pg_existed)]
        .into_iter()
        .filter(|(_, existed)| !existed)
        .map(|(vol, _)| vol);
    for vol in created {
        debug!(volume = %vol, "removing volume created by the probe");
        if let Err(e) = docker.remove_volume(vol) {
            warn!(volume = %vol, error = %e, "failed to remove probe volume");
        }
    }
    if raw.is_empty() {
        return Ok(String::new());
    }
    let parsed = parse_probe_output(raw);
    debug!(project = %project.name(), raw = %raw, parsed = %parsed, "probed database volume");
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_config::{GlobalConfig, ProjectConfig};
    use berth_runner::{FakeRunner, ProcessOutput};
    use std::sync::Arc;

    fn setup() -> (Arc<FakeRunner>, Docker, Project) {
        let fake = Arc::new(FakeRunner::new());
        let docker = Docker::new(fake.clone());
        let project = Project::new("/srv/shop", ProjectConfig::with_name("shop"), GlobalConfig::default());
        (fake, docker, project)
    }

    #[test]
    fn test_no_volumes_means_no_probe() {
        let (fake, docker, project) = setup();
        fake.fail(&["volume", "inspect"], 1, "no such volume");
        assert_eq!(probe(&docker, &project).unwrap(), "");
        assert!(!fake.was_run(&["run", "--rm"]));
    }

    #[test]
    fn test_mariadb_tag_is_parsed() {
        let (fake, docker, project) = setup();
        fake.on(&["run", "--rm", PROBE_IMAGE], ProcessOutput::ok("mariadb_10.11\n"));
        assert_eq!(probe(&docker, &project).unwrap(), "mariadb:10.11");
        let line = &fake.commands_matching(&["run", "--rm"])[0];
        assert!(line.contains("shop-mariadb:/var/tmp/mysql"));
        assert!(line.contains("shop-postgres:/var/tmp/postgres"));
    }

    #[test]
    fn test_postgres_major_is_parsed() {
        let (fake, docker, project) = setup();
        fake.on(&["run", "--rm"], ProcessOutput::ok("16\n"));
        assert_eq!(probe(&docker, &project).unwrap(), "postgres:16");
    }

    #[test]
    fn test_empty_volumes_are_kept() {
        let (fake, docker, project) = setup();
        fake.on(&["run", "--rm"], ProcessOutput::ok(""));
        assert_eq!(probe(&docker, &project).unwrap(), "");
        assert!(!fake.was_run(&["volume", "rm"]));
    }

    #[test]
    fn test_only_volumes_created_by_detection_are_removed() {
        let (fake, docker, project) = setup();
        fake.fail(&["volume", "inspect", "shop-postgres"], 1, "no such volume");
        fake.on(&["run", "--rm"], ProcessOutput::ok(""));
        assert_eq!(probe(&docker, &project).unwrap(), "");
        assert!(fake.was_run(&["volume", "rm", "-f", "shop-postgres"]));
        assert!(!fake.was_run(&["volume", "rm", "-f", "shop-mariadb"]));
    }

    #[test]
    fn test_volume_removal_failure_is_not_fatal() {
        let (fake, docker, project) = setup();
        fake.fail(&["volume", "inspect", "shop-mariadb"], 1, "no such volume");
        fake.fail(&["volume", "rm"], 1, "volume is in use");
        fake.on(&["run", "--rm"], ProcessOutput::ok("16\n"));
        assert_eq!(probe(&docker, &project).unwrap(), "postgres:16");
        assert!(fake.was_run(&["volume", "rm", "-f", "shop-mariadb"]));
    }
}
