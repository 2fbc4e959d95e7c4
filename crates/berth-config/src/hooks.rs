//! Hook names and the task mini-language attached to them.
//!
//! Hooks are validated at the YAML level before the typed parse so an unknown
//! hook or task kind surfaces as its own error kind instead of a generic
//! parse failure.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;

use berth_utils::error::ConfigError;

const HOOK_EVENTS: &[&str] = &[
    "start",
    "stop",
    "pause",
    "config",
    "composer",
    "describe",
    "exec",
    "import-db",
    "import-files",
    "pull",
    "push",
    "snapshot",
    "delete-snapshot",
    "restore-snapshot",
];

/// Task keys accepted inside a hook entry.
pub const TASK_KINDS: &[&str] = &["exec", "exec_raw", "exec-host", "composer"];

/// Modifier keys that may accompany an in-container task.
const TASK_MODIFIERS: &[&str] = &["service", "user"];

/// Every valid hook name, `pre-` and `post-` for each event.
#[must_use]
pub fn valid_hook_names() -> Vec<String> {
    HOOK_EVENTS
        .iter()
        .flat_map(|event| [format!("pre-{event}"), format!("post-{event}")])
        .collect()
}

#[must_use]
pub fn is_valid_hook_name(name: &str) -> bool {
    let event = name
        .strip_prefix("pre-")
        .or_else(|| name.strip_prefix("post-"));
    event.is_some_and(|e| HOOK_EVENTS.contains(&e))
}

/// Command of an in-container task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecCommand {
    /// Run through the container's shell.
    Shell(String),
    /// Run as an argv with no shell in between.
    Raw(Vec<String>),
}

/// One unit of work in a hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTask", into = "RawTask")]
pub enum Task {
    Exec {
        service: String,
        command: ExecCommand,
        user: Option<String>,
    },
    ExecHost {
        command: String,
    },
    Composer {
        command: String,
    },
}

impl Task {
    #[must_use]
    pub fn exec(command: impl Into<String>) -> Self {
        Self::Exec {
            service: "web".to_string(),
            command: ExecCommand::Shell(command.into()),
            user: None,
        }
    }

    #[must_use]
    pub fn exec_host(command: impl Into<String>) -> Self {
        Self::ExecHost {
            command: command.into(),
        }
    }

    /// Task kind as written in YAML.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exec {
                command: ExecCommand::Shell(_),
                ..
            } => "exec",
            Self::Exec {
                command: ExecCommand::Raw(_),
                ..
            } => "exec_raw",
            Self::ExecHost { .. } => "exec-host",
            Self::Composer { .. } => "composer",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec {
                service, command, ..
            } => match command {
                ExecCommand::Shell(c) => write!(f, "exec ({service}): {c}"),
                ExecCommand::Raw(argv) => write!(f, "exec_raw ({service}): {}", argv.join(" ")),
            },
            Self::ExecHost { command } => write!(f, "exec-host: {command}"),
            Self::Composer { command } => write!(f, "composer: {command}"),
        }
    }
}

/// YAML shape of a task entry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exec_raw: Option<Vec<String>>,
    #[serde(default, rename = "exec-host", skip_serializing_if = "Option::is_none")]
    exec_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    composer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

impl TryFrom<RawTask> for Task {
    type Error = String;

    fn try_from(raw: RawTask) -> Result<Self, Self::Error> {
        let service = raw.service.unwrap_or_else(|| "web".to_string());
        match (raw.exec, raw.exec_raw, raw.exec_host, raw.composer) {
            (Some(c), None, None, None) => Ok(Self::Exec {
                service,
                command: ExecCommand::Shell(c),
                user: raw.user,
            }),
            (None, Some(argv), None, None) => Ok(Self::Exec {
                service,
                command: ExecCommand::Raw(argv),
                user: raw.user,
            }),
            (None, None, Some(c), None) => Ok(Self::ExecHost { command: c }),
            (None, None, None, Some(c)) => Ok(Self::Composer { command: c }),
            _ => Err(format!(
                "a task must have exactly one of {}",
                TASK_KINDS.join(", ")
            )),
        }
    }
}

impl From<Task> for RawTask {
    fn from(task: Task) -> Self {
        match task {
            Task::Exec {
                service,
                command,
                user,
            } => {
                let service = (service != "web").then_some(service);
                match command {
                    ExecCommand::Shell(c) => Self {
                        exec: Some(c),
                        service,
                        user,
                        ..Self::default()
                    },
                    ExecCommand::Raw(argv) => Self {
                        exec_raw: Some(argv),
                        service,
                        user,
                        ..Self::default()
                    },
                }
            }
            Task::ExecHost { command } => Self {
                exec_host: Some(command),
                ..Self::default()
            },
            Task::Composer { command } => Self {
                composer: Some(command),
                ..Self::default()
            },
        }
    }
}

/// Hook name to ordered task list.
pub type Hooks = BTreeMap<String, Vec<Task>>;

/// Check a raw `hooks` value for unknown hook names and task kinds.
pub fn validate_hooks_value(hooks: &Value) -> Result<(), ConfigError> {
    let Some(map) = hooks.as_mapping() else {
        if hooks.is_null() {
            return Ok(());
        }
        return Err(ConfigError::invalid("hooks", "must be a mapping of hook name to tasks"));
    };

    for (name, tasks) in map {
        let name = name.as_str().unwrap_or_default();
        if !is_valid_hook_name(name) {
            return Err(ConfigError::HookUnknown {
                hook: name.to_string(),
            });
        }
        let Some(tasks) = tasks.as_sequence() else {
            if tasks.is_null() {
                continue;
            }
            return Err(ConfigError::invalid(
                format!("hooks.{name}"),
                "must be a list of tasks",
            ));
        };
        for task in tasks {
            let Some(entry) = task.as_mapping() else {
                return Err(ConfigError::TaskUnknown {
                    hook: name.to_string(),
                    task: value_label(task),
                });
            };
            let mut kinds = 0;
            for key in entry.keys() {
                let key = key.as_str().unwrap_or_default();
                if TASK_KINDS.contains(&key) {
                    kinds += 1;
                } else if !TASK_MODIFIERS.contains(&key) {
                    return Err(ConfigError::TaskUnknown {
                        hook: name.to_string(),
                        task: key.to_string(),
                    });
                }
            }
            if kinds != 1 {
                return Err(ConfigError::invalid(
                    format!("hooks.{name}"),
                    format!("each task needs exactly one of {}", TASK_KINDS.join(", ")),
                ));
            }
        }
    }
    Ok(())
}

/// `pre-start` runs before any container exists, so only host tasks fit.
pub fn validate_pre_start(hooks: &Hooks) -> Result<(), ConfigError> {
    if let Some(tasks) = hooks.get("pre-start") {
        if let Some(task) = tasks.iter().find(|t| !matches!(t, Task::ExecHost { .. })) {
            return Err(ConfigError::invalid(
                "hooks.pre-start",
                format!("only exec-host tasks can run before start, found {}", task.kind()),
            ));
        }
    }
    Ok(())
}

fn value_label(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooks_value(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_hook_names() {
        assert!(is_valid_hook_name("pre-start"));
        assert!(is_valid_hook_name("post-import-db"));
        assert!(is_valid_hook_name("post-restore-snapshot"));
        assert!(!is_valid_hook_name("start"));
        assert!(!is_valid_hook_name("pre-launch"));
        assert!(!is_valid_hook_name("during-start"));
        assert_eq!(valid_hook_names().len(), 28);
    }

    #[test]
    fn test_parse_all_task_shapes() {
        let yaml = r#"
- exec: drush cr
- exec: "mysql -e 'select 1'"
  service: db
  user: root
- exec_raw: [ls, -l, /var/www]
- exec-host: echo on host
- composer: install
"#;
        let tasks: Vec<Task> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tasks[0], Task::exec("drush cr"));
        assert_eq!(
            tasks[1],
            Task::Exec {
                service: "db".into(),
                command: ExecCommand::Shell("mysql -e 'select 1'".into()),
                user: Some("root".into()),
            }
        );
        assert_eq!(tasks[2].kind(), "exec_raw");
        assert_eq!(tasks[3], Task::exec_host("echo on host"));
        assert_eq!(
            tasks[4],
            Task::Composer {
                command: "install".into()
            }
        );
    }

    #[test]
    fn test_task_serializes_back_to_yaml_shape() {
        let yaml = serde_yaml::to_string(&vec![Task::exec("drush cr"), Task::exec_host("ls")]).unwrap();
        assert!(yaml.contains("exec: drush cr"));
        assert!(yaml.contains("exec-host: ls"));
        assert!(!yaml.contains("service"));
    }

    #[test]
    fn test_unknown_hook_rejected() {
        let err = validate_hooks_value(&hooks_value("pre-launch:\n  - exec: ls\n")).unwrap_err();
        assert!(matches!(err, ConfigError::HookUnknown { hook } if hook == "pre-launch"));
    }

    #[test]
    fn test_unknown_task_rejected() {
        let err = validate_hooks_value(&hooks_value("post-start:\n  - shell: ls\n")).unwrap_err();
        assert!(matches!(err, ConfigError::TaskUnknown { task, .. } if task == "shell"));

        let err = validate_hooks_value(&hooks_value("post-start:\n  - ls\n")).unwrap_err();
        assert!(matches!(err, ConfigError::TaskUnknown { .. }));
    }

    #[test]
    fn test_task_with_two_kinds_is_invalid() {
        let err = validate_hooks_value(&hooks_value(
            "post-start:\n  - exec: ls\n    composer: install\n",
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_valid_hooks_pass() {
        let value = hooks_value(
            "pre-start:\n  - exec-host: echo hi\npost-start:\n  - exec: ls\n    service: db\n",
        );
        assert!(validate_hooks_value(&value).is_ok());
        assert!(validate_hooks_value(&Value::Null).is_ok());
    }

    #[test]
    fn test_pre_start_only_allows_host_tasks() {
        let mut hooks = Hooks::new();
        hooks.insert("pre-start".into(), vec![Task::exec_host("ok")]);
        assert!(validate_pre_start(&hooks).is_ok());

        hooks.insert("pre-start".into(), vec![Task::exec("drush cr")]);
        let err = validate_pre_start(&hooks).unwrap_err();
        assert!(err.to_string().contains("exec-host"));
    }
}
