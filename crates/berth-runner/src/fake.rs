//! Scripted runner for tests.
//!
//! `FakeRunner` records every [`CommandSpec`] it receives and answers from
//! rules keyed on substrings of the rendered command line. The most recently
//! added matching rule wins. Commands that match no rule succeed with empty
//! output, which is how an idle container engine looks to most callers.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::{CommandSpec, ProcessOutput, ProcessRunner, RunnerError};

type Responder = Box<dyn Fn(&CommandSpec) -> Result<ProcessOutput, RunnerError> + Send + Sync>;

struct Rule {
    needles: Vec<String>,
    responder: Responder,
    remaining: Option<usize>,
}

impl Rule {
    fn matches(&self, line: &str) -> bool {
        self.remaining != Some(0) && self.needles.iter().all(|n| line.contains(n.as_str()))
    }
}

/// A command the fake received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub spec: CommandSpec,
    pub streamed: bool,
}

impl RecordedCall {
    /// Program and arguments joined by single spaces.
    #[must_use]
    pub fn line(&self) -> String {
        self.spec.argv().join(" ")
    }
}

#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl std::fmt::Debug for FakeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRunner")
            .field("calls", &self.commands().len())
            .finish_non_exhaustive()
    }
}

impl FakeRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command containing all `needles` with `output`.
    pub fn on(&self, needles: &[&str], output: ProcessOutput) -> &Self {
        self.push(needles, None, Box::new(move |_| Ok(output.clone())))
    }

    /// Like [`FakeRunner::on`] but the rule is consumed after one use.
    pub fn on_once(&self, needles: &[&str], output: ProcessOutput) -> &Self {
        self.push(needles, Some(1), Box::new(move |_| Ok(output.clone())))
    }

    /// Answer matching commands with a closure.
    pub fn on_with<F>(&self, needles: &[&str], f: F) -> &Self
    where
        F: Fn(&CommandSpec) -> Result<ProcessOutput, RunnerError> + Send + Sync + 'static,
    {
        self.push(needles, None, Box::new(f))
    }

    /// Make matching commands exit with `code` and `stderr`.
    pub fn fail(&self, needles: &[&str], code: i32, stderr: &str) -> &Self {
        self.on(needles, ProcessOutput::failure(code, stderr))
    }

    fn push(&self, needles: &[&str], remaining: Option<usize>, responder: Responder) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                needles: needles.iter().map(|s| (*s).to_string()).collect(),
                responder,
                remaining,
            });
        self
    }

    /// Every call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rendered command lines, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::line).collect()
    }

    /// Rendered command lines containing all `needles`.
    #[must_use]
    pub fn commands_matching(&self, needles: &[&str]) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|line| needles.iter().all(|n| line.contains(n)))
            .collect()
    }

    #[must_use]
    pub fn was_run(&self, needles: &[&str]) -> bool {
        !self.commands_matching(needles).is_empty()
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn respond(&self, cmd: &CommandSpec, streamed: bool) -> Result<ProcessOutput, RunnerError> {
        let call = RecordedCall {
            spec: cmd.clone(),
            streamed,
        };
        let line = call.line();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);

        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rule) = rules.iter_mut().rev().find(|r| r.matches(&line)) {
            if let Some(n) = rule.remaining.as_mut() {
                *n -= 1;
            }
            return (rule.responder)(cmd);
        }
        Ok(ProcessOutput::ok(""))
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, cmd: &CommandSpec, _timeout: Duration) -> Result<ProcessOutput, RunnerError> {
        self.respond(cmd, false)
    }

    fn run_streaming(
        &self,
        cmd: &CommandSpec,
        _timeout: Duration,
    ) -> Result<ProcessOutput, RunnerError> {
        self.respond(cmd, true)
    }
}
