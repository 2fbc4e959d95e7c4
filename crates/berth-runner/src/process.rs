use crate::error::RunnerError;
use std::time::Duration;

use super::CommandSpec;

// ============================================================================
// ProcessRunner Trait - Process Execution Interface
// ============================================================================

/// Output from a process execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Standard output from the process
    pub stdout: Vec<u8>,
    /// Standard error from the process
    pub stderr: Vec<u8>,
    /// Exit code from the process (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Whether the execution timed out
    pub timed_out: bool,
}

impl ProcessOutput {
    #[must_use]
    pub fn new(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: Option<i32>, timed_out: bool) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            timed_out,
        }
    }

    /// Successful exit with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(stdout.into().into_bytes(), Vec::new(), Some(0), false)
    }

    /// Failed exit with the given code and stderr.
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::new(Vec::new(), stderr.into().into_bytes(), Some(exit_code), false)
    }

    /// Get stdout as a UTF-8 string, lossy conversion.
    #[must_use]
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a UTF-8 string, lossy conversion.
    #[must_use]
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Stdout followed by stderr, trimmed. Used in error messages.
    #[must_use]
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout_string();
        let err = self.stderr_string();
        if !out.is_empty() && !err.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&err);
        out.trim().to_string()
    }

    /// Check if the process exited successfully (exit code 0).
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Trait for process execution.
///
/// Implementations MUST use argv-style APIs only. The interface is
/// synchronous; callers that live in an async context wrap it in
/// `spawn_blocking`.
///
/// # Example
///
/// ```rust
/// use berth_runner::{CommandSpec, ProcessOutput, ProcessRunner, RunnerError};
/// use std::time::Duration;
///
/// struct EchoRunner;
///
/// impl ProcessRunner for EchoRunner {
///     fn run(&self, cmd: &CommandSpec, _timeout: Duration) -> Result<ProcessOutput, RunnerError> {
///         Ok(ProcessOutput::ok(cmd.to_string()))
///     }
/// }
///
/// let out = EchoRunner.run(&CommandSpec::new("docker").arg("ps"), Duration::from_secs(5)).unwrap();
/// assert_eq!(out.stdout_string(), "docker ps");
/// ```
pub trait ProcessRunner: Send + Sync {
    /// Execute a command with captured output.
    ///
    /// # Returns
    ///
    /// * `Ok(ProcessOutput)` - The process completed (possibly with non-zero exit code)
    /// * `Err(RunnerError::Timeout)` - The process timed out and was killed
    /// * `Err(RunnerError::*)` - Spawn, wait or cancellation failures
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError>;

    /// Execute a command with its output streamed to the user's terminal.
    ///
    /// The returned output carries the exit status only. The default
    /// implementation captures instead of streaming.
    fn run_streaming(
        &self,
        cmd: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, RunnerError> {
        self.run(cmd, timeout)
    }
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for std::sync::Arc<T> {
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        (**self).run(cmd, timeout)
    }

    fn run_streaming(
        &self,
        cmd: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, RunnerError> {
        (**self).run_streaming(cmd, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================================
    // ProcessOutput Tests
    // ============================================================================

    #[test]
    fn test_process_output_success() {
        assert!(ProcessOutput::new(Vec::new(), Vec::new(), Some(0), false).success());
        assert!(!ProcessOutput::new(Vec::new(), Vec::new(), Some(1), false).success());
        assert!(!ProcessOutput::new(Vec::new(), Vec::new(), Some(0), true).success());
        assert!(!ProcessOutput::new(Vec::new(), Vec::new(), None, false).success());
    }

    #[test]
    fn test_process_output_constructors() {
        let ok = ProcessOutput::ok("hello");
        assert!(ok.success());
        assert_eq!(ok.stdout_string(), "hello");

        let failed = ProcessOutput::failure(3, "boom");
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.stderr_string(), "boom");
    }

    #[test]
    fn test_process_output_combined() {
        let out = ProcessOutput::new(b"out".to_vec(), b"err\n".to_vec(), Some(1), false);
        assert_eq!(out.combined_output(), "out\nerr");
        assert_eq!(ProcessOutput::failure(1, "only").combined_output(), "only");
    }

    #[test]
    fn test_process_output_lossy_utf8() {
        let invalid = vec![0xff, 0xfe, 0x00, 0x01];
        let output = ProcessOutput::new(invalid.clone(), invalid, Some(0), false);
        assert!(!output.stdout_string().is_empty());
        assert!(!output.stderr_string().is_empty());
    }

    // ============================================================================
    // ProcessRunner Trait Tests
    // ============================================================================

    struct TimeoutRunner;

    impl ProcessRunner for TimeoutRunner {
        fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
            Err(RunnerError::Timeout {
                program: cmd.program_name(),
                timeout_seconds: timeout.as_secs(),
            })
        }
    }

    #[test]
    fn test_run_streaming_defaults_to_run() {
        let result = TimeoutRunner.run_streaming(&CommandSpec::new("docker"), Duration::from_secs(60));
        match result {
            Err(RunnerError::Timeout {
                program,
                timeout_seconds,
            }) => {
                assert_eq!(program, "docker");
                assert_eq!(timeout_seconds, 60);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_arc_runner_delegates() {
        let runner: std::sync::Arc<dyn ProcessRunner> = std::sync::Arc::new(TimeoutRunner);
        assert!(runner.run(&CommandSpec::new("x"), Duration::from_secs(1)).is_err());
    }
}
