//! CLI entry point and dispatch logic
//!
//! This module owns the `run()` function which:
//! - Parses CLI arguments and initializes logging
//! - Creates the tokio runtime and the Ctrl-C listener
//! - Runs the blocking command handler off the async executor
//! - Handles all error output

use clap::Parser;
use std::sync::Arc;
use tracing::warn;

use berth_runner::{CancelToken, NativeRunner};
use berth_utils::error::UserFriendlyError;
use berth_utils::logging::init_tracing;
use berth_utils::{BerthError, ExitCode};

use super::args::Cli;
use super::commands;

/// Main CLI execution function.
///
/// Prints everything, including errors, and returns the exit code to use on
/// failure. `main` only maps the code to the process exit status.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.json_logs) {
        eprintln!("✗ Failed to initialize logging: {e}");
        return Err(ExitCode::INTERNAL);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let cancel = CancelToken::new();
    let result = rt.block_on(async {
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; stopping the running command");
                token.cancel();
            }
        });
        let runner = Arc::new(NativeRunner::with_cancel(cancel.clone()));
        tokio::task::spawn_blocking(move || commands::dispatch(cli, runner)).await
    });

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(report(&err)),
        Err(join) => {
            eprintln!("✗ Command panicked: {join}");
            Err(ExitCode::INTERNAL)
        }
    }
}

/// Print `err` for the user and pick the exit code.
pub(crate) fn report(err: &anyhow::Error) -> ExitCode {
    let Some(berth) = err.downcast_ref::<BerthError>() else {
        eprintln!("✗ {err:#}");
        return ExitCode::INTERNAL;
    };
    eprintln!("✗ {}", render(berth));
    ExitCode::from(berth)
}

/// Message, context and suggestions of a library error.
pub(crate) fn render(err: &BerthError) -> String {
    let mut out = format!("[{}] {}", err.category(), err.user_message());
    if let BerthError::Context { op, .. } = err {
        out = format!("{op}: {out}");
    }
    if let Some(ctx) = err.context() {
        out.push_str(&format!("\n  {ctx}"));
    }
    for s in err.suggestions() {
        out.push_str(&format!("\n  → {s}"));
    }
    out
}
