//! One-shot wait condition shared between a harness and its callbacks.
//!
//! An [`Expectation`] is fulfilled by whichever trigger gets there first
//! (the stream finishing, the stream failing, or the subscription being torn
//! down). Later triggers are no-ops. The test thread blocks on
//! [`Expectation::wait`] until fulfillment or a timeout.

use nutype::nutype;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Human readable label of an expectation.
///
/// Shows up in timing-failure reports and log fields, so it is validated
/// once at construction:
/// - trimmed of surrounding whitespace
/// - non-empty
/// - at most 255 characters
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(Debug, Clone, PartialEq, Eq, AsRef, Display)
)]
pub struct ExpectationDescription(String);

/// Outcome of blocking on an [`Expectation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The expectation was fulfilled before the timeout.
    Completed,
    /// The timeout elapsed with the expectation still unfulfilled.
    TimedOut,
}

/// A named, single-fulfillment gate.
#[derive(Debug)]
pub struct Expectation {
    description: ExpectationDescription,
    fulfilled: Mutex<bool>,
    signal: Condvar,
}

impl Expectation {
    /// Creates an unfulfilled expectation.
    pub fn new(description: ExpectationDescription) -> Self {
        Self {
            description,
            fulfilled: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// The label this expectation was created with.
    pub const fn description(&self) -> &ExpectationDescription {
        &self.description
    }

    /// Fulfills the expectation and wakes every waiter.
    ///
    /// Returns `true` only for the call that actually fulfilled it; any
    /// later call returns `false` and has no effect.
    pub fn fulfill(&self) -> bool {
        let mut fulfilled = self.fulfilled.lock();
        if *fulfilled {
            return false;
        }
        *fulfilled = true;
        drop(fulfilled);
        self.signal.notify_all();
        true
    }

    /// Whether [`fulfill`](Self::fulfill) has taken effect.
    pub fn is_fulfilled(&self) -> bool {
        *self.fulfilled.lock()
    }

    /// Blocks the calling thread until fulfilled or `timeout` elapses.
    ///
    /// Returns immediately if the expectation is already fulfilled.
    pub fn wait(&self, timeout: Duration) -> WaitResult {
        let mut fulfilled = self.fulfilled.lock();
        let _ = self
            .signal
            .wait_while_for(&mut fulfilled, |done| !*done, timeout);
        if *fulfilled {
            WaitResult::Completed
        } else {
            WaitResult::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn expectation(label: &str) -> Expectation {
        Expectation::new(ExpectationDescription::try_new(label).expect("valid description"))
    }

    #[test]
    fn description_rejects_whitespace_only() {
        // Given/When
        let result = ExpectationDescription::try_new("   ");

        // Then
        assert!(result.is_err(), "blank descriptions should be rejected");
    }

    #[test]
    fn description_is_trimmed() {
        // Given/When
        let description =
            ExpectationDescription::try_new("  stream completes  ").expect("valid description");

        // Then
        assert_eq!(description.as_ref(), "stream completes");
    }

    #[test]
    fn description_rejects_overlong_labels() {
        // Given
        let label = "x".repeat(256);

        // When
        let result = ExpectationDescription::try_new(label);

        // Then
        assert!(result.is_err());
    }

    #[test]
    fn only_first_fulfill_takes_effect() {
        // Given
        let expectation = expectation("single fulfillment");

        // When
        let first = expectation.fulfill();
        let second = expectation.fulfill();
        let third = expectation.fulfill();

        // Then
        assert!(first);
        assert!(!second);
        assert!(!third);
        assert!(expectation.is_fulfilled());
    }

    #[test]
    fn wait_returns_immediately_once_fulfilled() {
        // Given
        let expectation = expectation("already fulfilled");
        let _ = expectation.fulfill();

        // When
        let started = Instant::now();
        let result = expectation.wait(Duration::from_secs(5));

        // Then
        assert_eq!(result, WaitResult::Completed);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_times_out_when_nobody_fulfills() {
        // Given
        let expectation = expectation("never fulfilled");

        // When
        let started = Instant::now();
        let result = expectation.wait(Duration::from_millis(50));

        // Then
        assert_eq!(result, WaitResult::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!expectation.is_fulfilled());
    }

    #[test]
    fn racing_fulfillers_produce_exactly_one_effective_call() {
        // Given
        let expectation = Arc::new(expectation("racing triggers"));

        // When: three triggers race to fulfill
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let expectation = Arc::clone(&expectation);
                thread::spawn(move || expectation.fulfill())
            })
            .collect();
        let effective = handles
            .into_iter()
            .map(|handle| handle.join().expect("fulfiller thread"))
            .filter(|effective| *effective)
            .count();

        // Then
        assert_eq!(effective, 1);
        assert_eq!(expectation.wait(Duration::ZERO), WaitResult::Completed);
    }

    #[test]
    fn waiter_wakes_when_another_thread_fulfills() {
        // Given
        let expectation = Arc::new(expectation("cross-thread wake"));
        let fulfiller = Arc::clone(&expectation);

        // When
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            fulfiller.fulfill()
        });
        let result = expectation.wait(Duration::from_secs(5));

        // Then
        assert_eq!(result, WaitResult::Completed);
        assert!(handle.join().expect("fulfiller thread"));
    }
}
