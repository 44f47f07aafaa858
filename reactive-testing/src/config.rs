//! Harness configuration.

use crate::expectation::ExpectationDescription;
use std::time::Duration;

/// Slack added on top of the harness timeout when blocking in `receive`.
///
/// The timeout teardown runs on the dispatch thread at exactly `timeout`;
/// the waiting thread gives it this much extra time to land before the
/// wait itself is reported as a timing failure.
pub const DEFAULT_WAIT_GRACE: Duration = Duration::from_millis(10);

/// Label used for the harness expectation unless overridden.
pub const DEFAULT_DESCRIPTION: &str = "TestHarness timeout expectation";

/// Configuration for a [`TestHarness`](crate::TestHarness).
///
/// # Example
///
/// ```rust,ignore
/// let config = HarnessConfig::new(Duration::from_secs(1))
///     .with_wait_grace(Duration::from_millis(50))
///     .with_description(ExpectationDescription::try_new("prices settle")?);
/// ```
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    timeout: Duration,
    wait_grace: Duration,
    description: ExpectationDescription,
}

impl HarnessConfig {
    /// Creates a configuration with the given timeout and default grace.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            wait_grace: DEFAULT_WAIT_GRACE,
            description: ExpectationDescription::try_new(DEFAULT_DESCRIPTION)
                .expect("default description is valid"),
        }
    }

    /// Overrides the slack granted to the teardown before the wait fails.
    #[must_use]
    pub const fn with_wait_grace(mut self, wait_grace: Duration) -> Self {
        self.wait_grace = wait_grace;
        self
    }

    /// Overrides the expectation label.
    #[must_use]
    pub fn with_description(mut self, description: ExpectationDescription) -> Self {
        self.description = description;
        self
    }

    /// Time after which the subscription is torn down.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Slack granted to the teardown before the wait fails.
    pub const fn wait_grace(&self) -> Duration {
        self.wait_grace
    }

    /// How long `receive` blocks at most.
    pub fn wait_limit(&self) -> Duration {
        self.timeout.saturating_add(self.wait_grace)
    }

    /// Label of the harness expectation.
    pub const fn description(&self) -> &ExpectationDescription {
        &self.description
    }
}
