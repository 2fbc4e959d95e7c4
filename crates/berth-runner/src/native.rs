use crate::cancel::{CancelToken, kill_process};
use crate::error::RunnerError;
use std::process::Stdio;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::{CommandSpec, ProcessOutput, ProcessRunner};

// ============================================================================
// NativeRunner - host process execution
// ============================================================================

/// Native process runner using `std::process::Command`.
///
/// Timeouts are enforced by waiting on a helper thread; a child that
/// overruns is killed and reported as [`RunnerError::Timeout`]. Each child
/// is registered with the runner's [`CancelToken`] while it runs.
///
/// # Example
///
/// ```rust,no_run
/// use berth_runner::{CommandSpec, NativeRunner, ProcessRunner};
/// use std::time::Duration;
///
/// let runner = NativeRunner::new();
/// let output = runner
///     .run(&CommandSpec::new("docker").arg("version"), Duration::from_secs(30))
///     .unwrap();
/// assert!(output.success());
/// ```
#[derive(Debug, Clone, Default)]
pub struct NativeRunner {
    cancel: CancelToken,
}

impl NativeRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner whose children are interrupted when `cancel` fires.
    #[must_use]
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn execute(
        &self,
        cmd: &CommandSpec,
        timeout: Duration,
        capture: bool,
    ) -> Result<ProcessOutput, RunnerError> {
        let program = cmd.program_name();
        if self.cancel.is_cancelled() {
            return Err(RunnerError::Cancelled { program });
        }

        let mut command = cmd.to_command();
        if capture {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        } else {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }

        tracing::debug!(command = %cmd, capture, "spawning");
        let child = command.spawn().map_err(|e| RunnerError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;

        let child_id = child.id();
        self.cancel.register(child_id);

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });

        let result = match rx.recv_timeout(timeout) {
            Ok(output_result) => {
                let _ = handle.join();
                let output = output_result.map_err(|e| RunnerError::WaitFailed {
                    program: program.clone(),
                    reason: e.to_string(),
                })?;
                if self.cancel.is_cancelled() && !output.status.success() {
                    Err(RunnerError::Cancelled { program })
                } else {
                    Ok(ProcessOutput::new(
                        output.stdout,
                        output.stderr,
                        output.status.code(),
                        false,
                    ))
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                kill_process(child_id);
                let _ = handle.join();
                tracing::warn!(command = %cmd, seconds = timeout.as_secs(), "process timed out");
                Err(RunnerError::Timeout {
                    program,
                    timeout_seconds: timeout.as_secs(),
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(RunnerError::WaitFailed {
                program,
                reason: "process monitoring thread terminated unexpectedly".to_string(),
            }),
        };

        self.cancel.clear();
        result
    }
}

impl ProcessRunner for NativeRunner {
    fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        self.execute(cmd, timeout, true)
    }

    fn run_streaming(
        &self,
        cmd: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, RunnerError> {
        self.execute(cmd, timeout, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_native_runner_echo_command() {
        let runner = NativeRunner::new();
        let cmd = CommandSpec::new("echo").arg("hello world");

        let output = runner.run(&cmd, Duration::from_secs(10)).unwrap();
        assert!(output.success());
        assert!(output.stdout_string().contains("hello world"));
    }

    #[test]
    #[cfg(unix)]
    fn test_native_runner_shell_metacharacters_not_interpreted() {
        let runner = NativeRunner::new();
        let cmd = CommandSpec::new("echo").arg("$PATH");

        let output = runner.run(&cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(output.stdout_string().trim(), "$PATH");
    }

    #[test]
    fn test_native_runner_nonexistent_command() {
        let runner = NativeRunner::new();
        let cmd = CommandSpec::new("this_command_definitely_does_not_exist_12345");

        match runner.run(&cmd, Duration::from_secs(10)) {
            Err(RunnerError::SpawnFailed { program, .. }) => {
                assert_eq!(program, "this_command_definitely_does_not_exist_12345");
            }
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_native_runner_exit_code_propagation() {
        let runner = NativeRunner::new();
        let cmd = CommandSpec::new("sh").arg("-c").arg("exit 42");

        let output = runner.run(&cmd, Duration::from_secs(10)).unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(42));
    }

    #[test]
    #[cfg(unix)]
    fn test_native_runner_stderr_capture() {
        let runner = NativeRunner::new();
        let cmd = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo 'error message' >&2");

        let output = runner.run(&cmd, Duration::from_secs(10)).unwrap();
        assert!(output.stderr_string().contains("error message"));
    }

    #[test]
    #[cfg(unix)]
    fn test_native_runner_timeout_kills_child() {
        let runner = NativeRunner::new();
        let cmd = CommandSpec::new("sleep").arg("30");

        let err = runner.run(&cmd, Duration::from_millis(200)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    #[cfg(unix)]
    fn test_native_runner_env_and_cwd() {
        let dir = std::env::temp_dir();
        let runner = NativeRunner::new();
        let cmd = CommandSpec::new("sh")
            .args(["-c", "echo $BERTH_PROBE"])
            .env("BERTH_PROBE", "probe-value")
            .cwd(&dir);

        let output = runner.run(&cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(output.stdout_string().trim(), "probe-value");
    }

    #[test]
    fn test_cancelled_runner_refuses_to_spawn() {
        let token = CancelToken::new();
        token.cancel();
        let runner = NativeRunner::with_cancel(token);

        match runner.run(&CommandSpec::new("echo"), Duration::from_secs(1)) {
            Err(RunnerError::Cancelled { program }) => assert_eq!(program, "echo"),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_cancel_interrupts_running_child() {
        let token = CancelToken::new();
        let runner = NativeRunner::with_cancel(token.clone());

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            token.cancel();
        });

        let result = runner.run(&CommandSpec::new("sleep").arg("30"), Duration::from_secs(20));
        canceller.join().unwrap();
        assert!(matches!(result, Err(RunnerError::Cancelled { .. })));
    }
}
