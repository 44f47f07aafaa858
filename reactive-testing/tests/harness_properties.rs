//! Property tests for the outcome a harness delivers.

mod common;

use common::FeedError;
use futures::stream;
use proptest::prelude::*;
use reactive_testing::{test_harness, Completion};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

fn arb_error() -> impl Strategy<Value = FeedError> {
    prop_oneof![
        Just(FeedError::NetworkError),
        "[a-z ]{1,16}".prop_map(FeedError::Decode),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn finished_stream_delivers_every_value_in_order(
        values in prop::collection::vec(any::<i64>(), 0..64)
    ) {
        let items: Vec<Result<i64, FeedError>> = values.iter().copied().map(Ok).collect();
        let harness = test_harness(TIMEOUT, stream::iter(items)).expect("harness starts");

        let received = harness.receive(<[i64]>::to_vec);

        prop_assert_eq!(received, values);
        prop_assert_eq!(harness.completion(), Some(Completion::Finished));
    }

    #[test]
    fn failed_stream_delivers_its_error_and_the_prefix_before_it(
        prefix in prop::collection::vec(any::<u16>(), 0..32),
        suffix in prop::collection::vec(any::<u16>(), 0..8),
        error in arb_error(),
    ) {
        let items: Vec<Result<u16, FeedError>> = prefix
            .iter()
            .copied()
            .map(Ok)
            .chain(std::iter::once(Err(error.clone())))
            .chain(suffix.iter().copied().map(Ok))
            .collect();
        let harness = test_harness(TIMEOUT, stream::iter(items)).expect("harness starts");

        let received_error = harness.receive_failure(Clone::clone);
        let received_values = harness.receive(<[u16]>::to_vec);

        prop_assert_eq!(received_error, error);
        prop_assert_eq!(received_values, prefix);
        prop_assert_eq!(harness.completion(), Some(Completion::Failed));
    }

    #[test]
    fn repeated_finish_calls_never_change_the_outcome(
        values in prop::collection::vec(any::<u8>(), 0..16),
        finishes in 1usize..5,
    ) {
        let items: Vec<Result<u8, FeedError>> = values.iter().copied().map(Ok).collect();
        let harness = test_harness(TIMEOUT, stream::iter(items)).expect("harness starts");
        let received = harness.receive(<[u8]>::to_vec);

        for _ in 0..finishes {
            harness.finish();
        }

        prop_assert_eq!(harness.completion(), Some(Completion::Finished));
        prop_assert_eq!(harness.receive(<[u8]>::to_vec), received);
    }
}
