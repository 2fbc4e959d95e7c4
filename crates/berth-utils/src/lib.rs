//! Foundation utilities shared by every berth crate.

pub mod atomic_write;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod paths;
pub mod signature;

pub use error::{BerthError, ErrorKind, OpContext, Result};
pub use exit_codes::ExitCode;
