//! Process execution for berth.
//!
//! Every interaction with the container engine, the certificate tool, the
//! sync daemon and user host commands goes through a [`ProcessRunner`]. The
//! production implementation is [`NativeRunner`]; tests substitute the
//! scripted `FakeRunner` behind the `test-utils` feature.
//!
//! # Security Model
//!
//! All process execution goes through [`CommandSpec`] to ensure argv-style
//! invocation. Arguments are passed as discrete elements, never as a single
//! shell string. Where a shell is genuinely wanted (host hook tasks,
//! in-container `bash -c`), the caller builds that argv explicitly.

pub mod cancel;
pub mod command_spec;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod native;
pub mod process;

pub use cancel::CancelToken;
pub use command_spec::CommandSpec;
pub use error::RunnerError;
#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeRunner;
pub use native::NativeRunner;
pub use process::{ProcessOutput, ProcessRunner};
