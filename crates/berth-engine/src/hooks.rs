//! Hook execution.
//!
//! A hook is an ordered list of [`Task`]s attached to a lifecycle event such as
//! `post-start`. Tasks run strictly one after another with their output
//! streamed to the terminal. A failing task is logged and skipped past unless
//! the project (or the global config) sets `fail_on_hook_fail`.
//!
//! # Task kinds
//!
//! | Task | Runs as |
//! |------|---------|
//! | `exec` | `docker exec <container> bash -c <command>` |
//! | `exec_raw` | `docker exec <container> <argv>...` |
//! | `exec-host` | `bash -c <command>` on the host, in the project root |
//! | `composer` | `docker exec <web> composer <args>...` |

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use berth_config::{ExecCommand, Project, Task};
use berth_runner::{CommandSpec, RunnerError};
use berth_utils::error::{BerthError, HookError};

use crate::engine::Engine;

/// Ceiling for a single hook task.
pub const TASK_TIMEOUT: Duration = Duration::from_secs(3600);

/// Host shell used for `exec-host` tasks and host-side provider steps.
pub(crate) fn host_shell() -> PathBuf {
    which::which("bash").unwrap_or_else(|_| PathBuf::from("bash"))
}

impl Engine {
    /// Command line a task runs as.
    #[must_use]
    pub fn task_command(&self, project: &Project, task: &Task) -> CommandSpec {
        match task {
            Task::Exec {
                service,
                command,
                user,
            } => {
                let argv = match command {
                    ExecCommand::Shell(c) => vec!["bash".to_string(), "-c".to_string(), c.clone()],
                    ExecCommand::Raw(argv) => argv.clone(),
                };
                self.docker
                    .exec(&project.container_name(service), &argv, user.as_deref())
            }
            Task::ExecHost { command } => CommandSpec::new(host_shell())
                .arg("-c")
                .arg(command)
                .cwd(&project.approot),
            Task::Composer { command } => {
                let mut argv = vec!["composer".to_string()];
                match shell_words::split(command) {
                    Ok(words) => argv.extend(words),
                    Err(_) => argv.extend(command.split_whitespace().map(str::to_string)),
                }
                self.docker.exec(&project.container_name("web"), &argv, None)
            }
        }
    }

    /// Run every task attached to `hook`, in order.
    pub fn process_hooks(&self, project: &Project, hook: &str) -> Result<(), BerthError> {
        if self.skip_hooks {
            debug!(project = %project.name(), hook, "hooks skipped");
            return Ok(());
        }
        let tasks = project.hook_tasks(hook);
        if tasks.is_empty() {
            return Ok(());
        }
        info!(project = %project.name(), hook, tasks = tasks.len(), "running hook");

        for task in tasks {
            let spec = self.task_command(project, task);
            info!(project = %project.name(), hook, task = %task, "executing task");
            let failure = match self.docker.runner().run_streaming(&spec, TASK_TIMEOUT) {
                Ok(out) if out.success() => None,
                Ok(out) => {
                    let text = out.combined_output();
                    Some(match (text.trim(), out.exit_code) {
                        ("", Some(code)) => format!("exit status {code}"),
                        ("", None) => "terminated by signal".to_string(),
                        (t, _) => t.to_string(),
                    })
                }
                Err(e @ RunnerError::Cancelled { .. }) => return Err(e.into()),
                Err(e) => Some(e.to_string()),
            };
            let Some(output) = failure else {
                continue;
            };
            let err = HookError::TaskFailed {
                hook: hook.to_string(),
                task: task.to_string(),
                output,
            };
            if project.fail_on_hook_fail() {
                return Err(err.into());
            }
            warn!(project = %project.name(), hook, error = %err, "hook task failed; continuing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_engine, project_at};
    use berth_utils::ErrorKind;
    use tempfile::TempDir;

    fn with_hooks(root: &TempDir, hook: &str, tasks: Vec<Task>) -> Project {
        let mut p = project_at(root.path(), "alpha");
        p.config.hooks.insert(hook.to_string(), tasks);
        p
    }

    #[test]
    fn test_task_commands() {
        let (_fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = project_at(root.path(), "alpha");

        let exec = engine.task_command(&p, &Task::exec("drush cr"));
        assert_eq!(
            exec.argv(),
            vec!["docker", "exec", "ddev-alpha-web", "bash", "-c", "drush cr"]
        );

        let raw = Task::Exec {
            service: "db".into(),
            command: ExecCommand::Raw(vec!["mysql".into(), "-e".into(), "SELECT 1".into()]),
            user: Some("root".into()),
        };
        assert_eq!(
            engine.task_command(&p, &raw).argv(),
            vec!["docker", "exec", "-u", "root", "ddev-alpha-db", "mysql", "-e", "SELECT 1"]
        );

        let host = engine.task_command(&p, &Task::exec_host("echo hi"));
        assert_eq!(&host.argv()[1..], ["-c", "echo hi"]);
        assert_eq!(host.cwd.as_deref(), Some(root.path()));

        let composer = engine.task_command(
            &p,
            &Task::Composer {
                command: "require 'drush/drush:^12'".into(),
            },
        );
        assert_eq!(
            composer.argv(),
            vec!["docker", "exec", "ddev-alpha-web", "composer", "require", "drush/drush:^12"]
        );
    }

    #[test]
    fn test_tasks_run_in_order_and_stream() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = with_hooks(
            &root,
            "post-start",
            vec![Task::exec("first"), Task::exec_host("second"), Task::exec("third")],
        );
        engine.process_hooks(&p, "post-start").unwrap();
        let calls = fake.calls();
        let lines: Vec<String> = calls.iter().map(|c| c.line()).collect();
        assert_eq!(calls.len(), 3);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
        assert!(lines[2].ends_with("third"));
        assert!(calls.iter().all(|c| c.streamed));
    }

    #[test]
    fn test_failure_is_non_fatal_by_default() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = with_hooks(&root, "post-start", vec![Task::exec("boom"), Task::exec("after")]);
        fake.fail(&["boom"], 2, "boom failed");
        engine.process_hooks(&p, "post-start").unwrap();
        assert!(fake.was_run(&["after"]));
    }

    #[test]
    fn test_failure_is_fatal_with_fail_on_hook_fail() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let mut p = with_hooks(&root, "post-start", vec![Task::exec("boom"), Task::exec("after")]);
        p.config.fail_on_hook_fail = true;
        fake.fail(&["boom"], 2, "boom failed");
        let err = engine.process_hooks(&p, "post-start").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HookFailed);
        assert!(err.to_string().contains("boom failed"));
        assert!(!fake.was_run(&["after"]));
    }

    #[test]
    fn test_global_fail_on_hook_fail_applies() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let mut p = with_hooks(&root, "pre-stop", vec![Task::exec_host("false")]);
        p.global.fail_on_hook_fail = true;
        fake.fail(&["-c false"], 1, "");
        let err = engine.process_hooks(&p, "pre-stop").unwrap_err();
        assert!(err.to_string().contains("exit status 1"));
    }

    #[test]
    fn test_skip_hooks_short_circuits() {
        let (fake, engine, _home) = fake_engine();
        let engine = engine.skip_hooks(true);
        let root = TempDir::new().unwrap();
        let p = with_hooks(&root, "post-start", vec![Task::exec("anything")]);
        engine.process_hooks(&p, "post-start").unwrap();
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_unknown_event_is_noop() {
        let (fake, engine, _home) = fake_engine();
        let root = TempDir::new().unwrap();
        let p = project_at(root.path(), "alpha");
        engine.process_hooks(&p, "post-import-db").unwrap();
        assert!(fake.calls().is_empty());
    }
}
