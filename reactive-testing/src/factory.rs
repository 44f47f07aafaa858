//! Entry points for building a harness from inside a test.

use crate::context::{CurrentTest, TestContext};
use crate::errors::HarnessResult;
use crate::harness::TestHarness;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;

/// Builds a harness for the test running on the calling thread.
///
/// Equivalent to `TestHarness::create(timeout, Arc::new(CurrentTest::new()), stream)`.
///
/// # Example
///
/// ```rust,ignore
/// #[test]
/// fn emits_prices() {
///     let harness = test_harness(Duration::from_secs(1), price_feed()).unwrap();
///     harness.receive(|prices| assert_eq!(prices, [100, 101]));
/// }
/// ```
pub fn test_harness<S, T, E>(timeout: Duration, stream: S) -> HarnessResult<TestHarness<T, E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    TestHarness::create(timeout, Arc::new(CurrentTest::new()), stream)
}

/// Builds harnesses bound to an explicit test context.
pub trait TestContextExt {
    /// Builds a harness whose expectation belongs to this context.
    fn test_harness<S, T, E>(
        &self,
        timeout: Duration,
        stream: S,
    ) -> HarnessResult<TestHarness<T, E>>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Send + Sync + 'static,
        E: Send + Sync + 'static;
}

impl<C> TestContextExt for Arc<C>
where
    C: TestContext + 'static,
{
    fn test_harness<S, T, E>(
        &self,
        timeout: Duration,
        stream: S,
    ) -> HarnessResult<TestHarness<T, E>>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let context: Arc<dyn TestContext> = Arc::<C>::clone(self);
        TestHarness::create(timeout, context, stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecordingContext;
    use futures::stream;

    #[test]
    fn test_harness_binds_to_the_current_test() {
        // Given/When
        let harness = test_harness(
            Duration::from_secs(1),
            stream::iter(vec![Ok::<_, String>("ready")]),
        )
        .expect("harness starts");

        // Then
        let debug = format!("{harness:?}");
        let current = CurrentTest::new();
        assert!(
            debug.contains(current.name()),
            "harness should name the running test: {debug}"
        );
        harness.receive(|values| assert_eq!(values, ["ready"]));
    }

    #[test]
    fn context_extension_uses_the_given_context() {
        // Given
        let context = Arc::new(RecordingContext::new("explicit context"));

        // When
        let harness = context
            .test_harness(Duration::from_millis(100), stream::pending::<Result<u8, String>>())
            .expect("harness starts");
        let values = harness.receive(<[u8]>::to_vec);

        // Then
        assert!(values.is_empty());
        assert!(format!("{harness:?}").contains("explicit context"));
    }
}
