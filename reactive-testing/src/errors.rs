//! Errors raised while setting up a harness.

use thiserror::Error;

/// Error type for harness construction failures.
///
/// These are environment failures: the harness could not bring up the
/// execution context it schedules on. They are unrelated to the stream
/// under test, whose own failures are surfaced through
/// [`TestHarness::receive_failure`](crate::TestHarness::receive_failure).
///
/// Misuse of a harness (asking for an error from a stream that finished)
/// is not represented here; it panics.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The tokio runtime backing a dispatch queue could not be built.
    #[error("failed to build dispatch runtime: {0}")]
    DispatchRuntime(#[source] std::io::Error),

    /// The OS thread hosting a dispatch queue could not be spawned.
    #[error("failed to spawn dispatch thread '{name}': {source}")]
    DispatchThread {
        /// Name the thread was given.
        name: String,
        /// Underlying spawn failure.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for harness construction.
pub type HarnessResult<T> = Result<T, HarnessError>;
