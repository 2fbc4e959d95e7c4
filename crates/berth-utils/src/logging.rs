//! Logging and observability for berth.
//!
//! Structured `tracing` output with a compact human format by default and a
//! JSON format for machine consumption.

use std::io::IsTerminal;
use std::time::{Duration, Instant};
use tracing::{Level, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Colour only on a TTY and when `NO_COLOR` is unset.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("berth=debug,info")
            } else {
                EnvFilter::try_new("berth=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the defaults. Logs go to stderr so that command
/// output on stdout stays machine-readable.
pub fn init_tracing(verbose: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = default_filter(verbose);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()?;
    } else if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(use_color())
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(use_color())
                    .with_target(false)
                    .without_time()
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Span wrapping one public lifecycle operation on a project.
pub fn operation_span(project: &str, op: &str) -> tracing::Span {
    span!(Level::INFO, "operation", project = %project, op = %op)
}

/// Times an operation and logs its outcome with `duration_ms`.
#[derive(Debug)]
pub struct OperationTimer {
    project: String,
    op: &'static str,
    started: Instant,
}

impl OperationTimer {
    #[must_use]
    pub fn start(project: &str, op: &'static str) -> Self {
        info!(project = %project, op, "starting");
        Self {
            project: project.to_string(),
            op,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log completion and return the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        info!(
            project = %self.project,
            op = self.op,
            duration_ms = elapsed.as_millis() as u64,
            "completed"
        );
        elapsed
    }

    /// Log failure with the rendered error.
    pub fn fail(self, err: &dyn std::fmt::Display) -> Duration {
        let elapsed = self.elapsed();
        error!(
            project = %self.project,
            op = self.op,
            duration_ms = elapsed.as_millis() as u64,
            error = %err,
            "failed"
        );
        elapsed
    }
}
