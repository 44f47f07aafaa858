//! Shared fixtures for reactive-testing integration tests.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use futures::channel::mpsc;
use reactive_testing::RecordingContext;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Failure a feed can terminate with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The upstream connection dropped.
    #[error("network error")]
    NetworkError,
    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Producer side of a stream under test.
///
/// Cloned into scheduled events so that values, failures and completion
/// land at exact offsets from the harness start.
#[derive(Debug, Clone)]
pub struct Feed<T> {
    sender: mpsc::UnboundedSender<Result<T, FeedError>>,
}

impl<T> Feed<T> {
    /// Emits a value. Ignored once the subscriber is gone.
    pub fn emit(&self, value: T) {
        let _ = self.sender.unbounded_send(Ok(value));
    }

    /// Terminates the stream with `error`.
    pub fn fail(&self, error: FeedError) {
        let _ = self.sender.unbounded_send(Err(error));
        self.sender.close_channel();
    }

    /// Terminates the stream successfully.
    pub fn complete(&self) {
        self.sender.close_channel();
    }

    /// Whether the subscriber has dropped the stream.
    pub fn is_released(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Creates a feed and the stream it drives.
pub fn feed<T>() -> (Feed<T>, mpsc::UnboundedReceiver<Result<T, FeedError>>) {
    let (sender, receiver) = mpsc::unbounded();
    (Feed { sender }, receiver)
}

/// A context that records timing failures instead of panicking.
pub fn recording_context(name: &str) -> Arc<RecordingContext> {
    Arc::new(RecordingContext::new(name))
}

/// Shorthand for millisecond durations.
pub const fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Installs a test-friendly log subscriber once per test binary.
///
/// Honors `RUST_LOG`, e.g. `RUST_LOG=reactive_testing=trace`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
