//! The test-framework side of a harness.
//!
//! A harness never talks to the test runner directly. It asks a
//! [`TestContext`] for its expectation, blocks through it, and lets it
//! decide what an unfulfilled wait means. [`CurrentTest`] fails the running
//! test; [`RecordingContext`] keeps the failures for inspection.

use crate::expectation::{Expectation, ExpectationDescription, WaitResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// A wait that ran out of time before its expectation was fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{test}: asynchronous wait failed: exceeded timeout of {timeout:?} \
     with unfulfilled expectation \"{description}\""
)]
pub struct TimingFailure {
    /// Name of the test that was waiting.
    pub test: String,
    /// Label of the unfulfilled expectation.
    pub description: ExpectationDescription,
    /// How long the wait lasted.
    pub timeout: Duration,
}

/// The enclosing test, as seen by a harness.
pub trait TestContext: Send + Sync {
    /// Name of the test, used in failure reports.
    fn name(&self) -> &str;

    /// Creates a fresh expectation owned by this test.
    fn expectation(&self, description: ExpectationDescription) -> Arc<Expectation> {
        Arc::new(Expectation::new(description))
    }

    /// Blocks until `expectation` is fulfilled or `timeout` elapses.
    ///
    /// A timed-out wait is reported through
    /// [`record_timing_failure`](Self::record_timing_failure) before
    /// returning.
    fn wait(&self, expectation: &Expectation, timeout: Duration) -> WaitResult {
        let result = expectation.wait(timeout);
        if result == WaitResult::TimedOut {
            warn!(
                test = self.name(),
                expectation = %expectation.description(),
                ?timeout,
                "expectation not fulfilled in time"
            );
            self.record_timing_failure(TimingFailure {
                test: self.name().to_owned(),
                description: expectation.description().clone(),
                timeout,
            });
        }
        result
    }

    /// Reports a wait that exceeded its timeout.
    fn record_timing_failure(&self, failure: TimingFailure);
}

/// The libtest test running on the calling thread.
///
/// libtest names each test thread after the test path, which becomes the
/// context name. Timing failures fail the test by panicking.
#[derive(Debug, Clone)]
pub struct CurrentTest {
    name: String,
}

impl CurrentTest {
    /// Captures the test running on the current thread.
    pub fn new() -> Self {
        let name = thread::current()
            .name()
            .map_or_else(|| "<unnamed test>".to_owned(), ToOwned::to_owned);
        Self { name }
    }

    /// A context with an explicit name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for CurrentTest {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext for CurrentTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn record_timing_failure(&self, failure: TimingFailure) {
        panic!("{failure}");
    }
}

/// A context that records timing failures instead of failing the test.
///
/// Useful for asserting on timeout behavior itself: after a timed-out
/// wait the harness still hands whatever it buffered to the handler, and
/// the failure can be inspected via [`failures`](Self::failures).
#[derive(Debug)]
pub struct RecordingContext {
    name: String,
    failures: Mutex<Vec<TimingFailure>>,
}

impl RecordingContext {
    /// Creates a recording context with the given test name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Timing failures recorded so far, oldest first.
    pub fn failures(&self) -> Vec<TimingFailure> {
        self.failures.lock().clone()
    }
}

impl TestContext for RecordingContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn record_timing_failure(&self, failure: TimingFailure) {
        self.failures.lock().push(failure);
    }
}
