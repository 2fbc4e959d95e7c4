use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

// ============================================================================
// CommandSpec - argv-style process description
// ============================================================================

/// Specification for a command to execute.
///
/// All process execution goes through this type so that arguments always
/// cross the process boundary as discrete elements.
///
/// # Example
///
/// ```rust
/// use berth_runner::CommandSpec;
/// use std::ffi::OsString;
///
/// let cmd = CommandSpec::new("docker")
///     .args(["compose", "-p", "shop"])
///     .arg("up")
///     .cwd("/srv/shop/.project-config");
///
/// assert_eq!(cmd.program, OsString::from("docker"));
/// assert_eq!(cmd.args.len(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to execute
    pub program: OsString,
    /// Arguments as discrete elements
    pub args: Vec<OsString>,
    /// Optional working directory
    pub cwd: Option<PathBuf>,
    /// Environment overrides layered on top of the inherited environment
    pub env: BTreeMap<OsString, OsString>,
}

impl CommandSpec {
    /// Create a new `CommandSpec` with the given program.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Add a single argument.
    ///
    /// ```rust
    /// use berth_runner::CommandSpec;
    ///
    /// let cmd = CommandSpec::new("mkcert").arg("-install");
    /// assert_eq!(cmd.args.len(), 1);
    /// ```
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set an environment variable.
    ///
    /// ```rust
    /// use berth_runner::CommandSpec;
    ///
    /// let cmd = CommandSpec::new("docker")
    ///     .env("COMPOSE_PROJECT_NAME", "shop");
    /// assert_eq!(cmd.env.len(), 1);
    /// ```
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        for (key, value) in envs {
            self.env.insert(key.into(), value.into());
        }
        self
    }

    /// Program name as a lossy UTF-8 string, for logs and errors.
    #[must_use]
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Program plus arguments as lossy UTF-8 strings.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Convert into a `std::process::Command`.
    ///
    /// The resulting command uses `Command::new().args()` only.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd
    }
}

/// Renders the command the way a user would type it, quoting where needed.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_words::join(self.argv()))
    }
}
