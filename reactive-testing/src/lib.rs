//! `reactive-testing` - assertions on the asynchronous output of streams
//!
//! A [`TestHarness`] subscribes to a `futures::Stream<Item = Result<T, E>>`,
//! buffers the values it emits and waits, up to a timeout, for the stream
//! to finish or fail. The test then asserts on the buffered values with
//! [`TestHarness::receive`] or on the error with
//! [`TestHarness::receive_failure`]. Synthetic events can be injected at
//! fixed offsets from the harness start with
//! [`TestHarness::schedule_event`].
//!
//! ```rust,ignore
//! use reactive_testing::test_harness;
//! use std::time::Duration;
//!
//! let (sender, receiver) = futures::channel::mpsc::unbounded::<Result<u32, MyError>>();
//! let harness = test_harness(Duration::from_secs(1), receiver)?;
//!
//! let first = sender.clone();
//! harness.schedule_event(Duration::from_millis(100), move || {
//!     first.unbounded_send(Ok(1)).ok();
//! });
//! harness.schedule_event(Duration::from_millis(200), move || sender.close_channel());
//!
//! harness.receive(|values| assert_eq!(values, [1]));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod expectation;
mod factory;
pub mod harness;

pub use config::HarnessConfig;
pub use context::{CurrentTest, RecordingContext, TestContext, TimingFailure};
pub use dispatch::DispatchQueue;
pub use errors::{HarnessError, HarnessResult};
pub use expectation::{Expectation, ExpectationDescription, WaitResult};
pub use factory::{test_harness, TestContextExt};
pub use harness::{Completion, HarnessId, TestHarness};
