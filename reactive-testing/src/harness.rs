//! Test harness for asserting on the output of a single stream.
//!
//! The harness subscribes to a `Stream<Item = Result<T, E>>` on a
//! [`DispatchQueue`], buffers every `Ok` value, and races three triggers
//! for its one expectation:
//!
//! - the stream ending (finished)
//! - the stream yielding an `Err` (failed)
//! - the subscription being torn down by [`TestHarness::finish`], by the
//!   timeout, or by dropping the harness (cancelled)
//!
//! Whichever lands first fulfills the expectation; the rest are no-ops.
//! The test thread then blocks in [`TestHarness::receive`] or
//! [`TestHarness::receive_failure`].

use crate::config::HarnessConfig;
use crate::context::TestContext;
use crate::dispatch::DispatchQueue;
use crate::errors::HarnessResult;
use crate::expectation::{Expectation, WaitResult};
use crate::dispatch::panic_message;
use futures::{FutureExt, Stream, StreamExt};
use std::panic::AssertUnwindSafe;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info_span, trace, warn, Instrument};
use uuid::Uuid;

/// Identifier of a harness instance, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HarnessId(Uuid);

impl HarnessId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUIDv7.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for HarnessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How the subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The stream ran to its end.
    Finished,
    /// The stream yielded an error.
    Failed,
    /// The subscription was torn down before the stream ended.
    Cancelled,
    /// Polling the stream panicked.
    Panicked,
}

/// Frozen result of a subscription, written once when it ends.
struct Outcome<T, E> {
    results: Vec<T>,
    error: Option<E>,
    completion: Completion,
    panic: Option<String>,
}

/// State shared with the stream driver and the timeout callback.
///
/// Both only ever hold it through a `Weak`.
struct HarnessState<T, E> {
    id: HarnessId,
    buffer: Mutex<Vec<T>>,
    outcome: OnceLock<Outcome<T, E>>,
    teardown: Mutex<Option<oneshot::Sender<()>>>,
    expectation: Arc<Expectation>,
}

impl<T, E> HarnessState<T, E> {
    /// Appends a value; refused once the outcome is frozen.
    fn record_value(&self, value: T) -> bool {
        let mut buffer = self.buffer.lock();
        if self.outcome.get().is_some() {
            return false;
        }
        buffer.push(value);
        true
    }

    fn complete(&self, completion: Completion, error: Option<E>) {
        self.freeze(completion, error, None);
    }

    fn abort(&self, message: String) {
        self.freeze(Completion::Panicked, None, Some(message));
    }

    fn freeze(&self, completion: Completion, error: Option<E>, panic: Option<String>) {
        {
            // Held across the write so `record_value` cannot slip in between.
            let mut buffer = self.buffer.lock();
            if self.outcome.get().is_some() {
                return;
            }
            let results = std::mem::take(&mut *buffer);
            let _ = self.outcome.set(Outcome {
                results,
                error,
                completion,
                panic,
            });
        }
        if self.expectation.fulfill() {
            debug!(harness = %self.id, ?completion, "expectation fulfilled");
        }
    }

    /// Signals the driver to drop the stream. Only the first call does anything.
    fn tear_down(&self) -> bool {
        let Some(signal) = self.teardown.lock().take() else {
            return false;
        };
        // The driver is gone if the stream already ended.
        let _ = signal.send(());
        true
    }

    fn completion(&self) -> Option<Completion> {
        self.outcome.get().map(|outcome| outcome.completion)
    }
}

/// Subscribes to one stream and collects its outcome for assertions.
///
/// # Example
///
/// ```rust,ignore
/// let (sender, receiver) = futures::channel::mpsc::unbounded();
/// let harness = test_harness(Duration::from_secs(1), receiver)?;
///
/// let tx = sender.clone();
/// harness.schedule_event(Duration::from_millis(100), move || {
///     tx.unbounded_send(Ok(1)).ok();
/// });
/// harness.schedule_event(Duration::from_millis(300), move || sender.close_channel());
///
/// harness.receive(|values| assert_eq!(values, [1]));
/// ```
pub struct TestHarness<T, E> {
    config: HarnessConfig,
    context: Arc<dyn TestContext>,
    queue: DispatchQueue,
    started_at: Instant,
    state: Arc<HarnessState<T, E>>,
}

impl<T, E> fmt::Debug for TestHarness<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestHarness")
            .field("id", &self.state.id)
            .field("test", &self.context.name())
            .field("timeout", &self.config.timeout())
            .field("completion", &self.state.completion())
            .finish_non_exhaustive()
    }
}

impl<T, E> TestHarness<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Subscribes to `stream` on a dedicated dispatch queue.
    ///
    /// The subscription is torn down `timeout` after this call unless the
    /// stream ends first. Never blocks.
    pub fn create<S>(
        timeout: Duration,
        context: Arc<dyn TestContext>,
        stream: S,
    ) -> HarnessResult<Self>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        let queue = DispatchQueue::new()?;
        Ok(Self::start(HarnessConfig::new(timeout), context, queue, stream))
    }

    /// Subscribes to `stream` on an existing dispatch queue.
    ///
    /// Sharing a queue between harnesses orders their scheduled events and
    /// timeouts against each other.
    pub fn start<S>(
        config: HarnessConfig,
        context: Arc<dyn TestContext>,
        queue: DispatchQueue,
        stream: S,
    ) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        let started_at = Instant::now();
        let id = HarnessId::new();
        let expectation = context.expectation(config.description().clone());
        let (teardown, teardown_requested) = oneshot::channel();
        let state = Arc::new(HarnessState {
            id,
            buffer: Mutex::new(Vec::new()),
            outcome: OnceLock::new(),
            teardown: Mutex::new(Some(teardown)),
            expectation,
        });

        debug!(
            harness = %id,
            test = context.name(),
            timeout = ?config.timeout(),
            queue = queue.name(),
            "subscribing to stream"
        );
        queue.spawn(
            drive(stream, Arc::downgrade(&state), teardown_requested)
                .instrument(info_span!("harness", id = %id)),
        );

        match started_at.checked_add(config.timeout()) {
            Some(deadline) => {
                let harness = Arc::downgrade(&state);
                queue.schedule_at(deadline, move || {
                    if let Some(state) = harness.upgrade() {
                        if state.tear_down() {
                            debug!(harness = %state.id, "timeout elapsed; subscription torn down");
                        }
                    }
                });
            }
            None => trace!(harness = %id, "timeout out of range; no teardown scheduled"),
        }

        Self {
            config,
            context,
            queue,
            started_at,
            state,
        }
    }

    /// Runs `event` once at `deadline` after the harness started.
    ///
    /// Events run on the dispatch thread, in deadline order relative to each
    /// other and to the timeout teardown.
    pub fn schedule_event<F>(&self, deadline: Duration, event: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.started_at.checked_add(deadline) {
            Some(at) => self.queue.schedule_at(at, event),
            None => trace!(
                harness = %self.state.id,
                ?deadline,
                "deadline out of range; event never fires"
            ),
        }
    }
}

impl<T, E> TestHarness<T, E> {
    /// Tears down the subscription. Idempotent.
    ///
    /// If the stream had not ended yet, the expectation is fulfilled with
    /// [`Completion::Cancelled`].
    pub fn finish(&self) {
        if self.state.tear_down() {
            debug!(harness = %self.state.id, "finish requested; subscription torn down");
        }
    }

    /// Waits for the outcome and hands the buffered values to `handler`.
    ///
    /// Values are delivered in emission order whether the stream finished,
    /// failed or was cancelled. The handler runs without any harness lock
    /// held once the subscription has ended, so it may query the harness.
    ///
    /// # Panics
    ///
    /// If polling the stream panicked, or if the expectation was fulfilled
    /// without the harness recording how the stream ended.
    pub fn receive<F, R>(&self, handler: F) -> R
    where
        F: FnOnce(&[T]) -> R,
    {
        let waited = self.wait();
        if let Some(outcome) = self.state.outcome.get() {
            self.raise_stream_panic(outcome);
            return handler(&outcome.results);
        }
        if waited == WaitResult::Completed {
            panic!(
                "harness {}: results not found: {}",
                self.state.id, "expectation fulfilled without a recorded completion"
            );
        }

        // Timed out with the subscription still live: hand over what is
        // buffered so far.
        let partial = self.state.buffer.lock();
        match self.state.outcome.get() {
            Some(outcome) => {
                drop(partial);
                self.raise_stream_panic(outcome);
                handler(&outcome.results)
            }
            None => handler(&partial),
        }
    }

    /// Waits for the outcome and hands the stream's error to `handler`.
    ///
    /// # Panics
    ///
    /// If the stream did not fail. Calling this on a stream that finished
    /// or was cancelled is a mistake in the test.
    pub fn receive_failure<F, R>(&self, handler: F) -> R
    where
        F: FnOnce(&E) -> R,
    {
        let _ = self.wait();
        let outcome = self.state.outcome.get();
        if let Some(outcome) = outcome {
            self.raise_stream_panic(outcome);
        }
        match outcome.and_then(|outcome| outcome.error.as_ref()) {
            Some(error) => handler(error),
            None => panic!(
                "harness {}: error not found: stream completion was {:?}",
                self.state.id,
                outcome.map(|outcome| outcome.completion)
            ),
        }
    }

    /// How the subscription ended, if it has.
    pub fn completion(&self) -> Option<Completion> {
        self.state.completion()
    }

    /// Whether the subscription is still live.
    pub fn is_active(&self) -> bool {
        self.completion().is_none()
    }

    /// Time since the harness subscribed.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Identifier of this harness in log output.
    pub fn id(&self) -> HarnessId {
        self.state.id
    }

    /// The configuration the harness was started with.
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn raise_stream_panic(&self, outcome: &Outcome<T, E>) {
        if let Some(message) = &outcome.panic {
            panic!("harness {}: stream panicked while being polled: {message}", self.state.id);
        }
    }

    fn wait(&self) -> WaitResult {
        let result = self
            .context
            .wait(&self.state.expectation, self.config.wait_limit());
        debug!(
            harness = %self.state.id,
            ?result,
            elapsed = ?self.started_at.elapsed(),
            "wait finished"
        );
        result
    }
}

impl<T, E> Drop for TestHarness<T, E> {
    fn drop(&mut self) {
        let _ = self.state.tear_down();
    }
}

async fn drive<S, T, E>(
    stream: S,
    harness: Weak<HarnessState<T, E>>,
    teardown: oneshot::Receiver<()>,
) where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    // The stream is dropped inside `pump`, also when it unwinds, so the
    // subscription is released before anyone waiting can observe the outcome.
    let ended = AssertUnwindSafe(pump(stream, &harness, teardown))
        .catch_unwind()
        .await;
    let Some(state) = harness.upgrade() else {
        return;
    };
    match ended {
        Ok(Some((completion, error))) => {
            debug!(?completion, "subscription ended");
            state.complete(completion, error);
        }
        Ok(None) => {}
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(%message, "stream panicked while being polled");
            state.abort(message);
        }
    }
}

/// Values a torn-down stream may still hand over without blocking.
const MAX_READY_ON_TEARDOWN: usize = 1 << 16;

/// Polls `stream` until it ends or the teardown signal arrives.
///
/// Returns `None` once the harness is gone or refuses further values.
async fn pump<S, T, E>(
    stream: S,
    harness: &Weak<HarnessState<T, E>>,
    mut teardown: oneshot::Receiver<()>,
) -> Option<(Completion, Option<E>)>
where
    S: Stream<Item = Result<T, E>>,
{
    let mut stream = Box::pin(stream);
    loop {
        tokio::select! {
            biased;

            _ = &mut teardown => break,
            next = stream.next() => match next {
                Some(Ok(value)) => record(harness, value)?,
                Some(Err(error)) => return Some((Completion::Failed, Some(error))),
                None => return Some((Completion::Finished, None)),
            },
        }
    }

    // Whatever the stream already has ready was emitted before the teardown.
    for _ in 0..MAX_READY_ON_TEARDOWN {
        match stream.next().now_or_never() {
            None => return Some((Completion::Cancelled, None)),
            Some(Some(Ok(value))) => record(harness, value)?,
            Some(Some(Err(error))) => return Some((Completion::Failed, Some(error))),
            Some(None) => return Some((Completion::Finished, None)),
        }
    }
    warn!(
        limit = MAX_READY_ON_TEARDOWN,
        "stream still ready after teardown; dropping the rest"
    );
    Some((Completion::Cancelled, None))
}

fn record<T, E>(harness: &Weak<HarnessState<T, E>>, value: T) -> Option<()> {
    let state = harness.upgrade()?;
    if !state.record_value(value) {
        return None;
    }
    trace!("value received");
    Some(())
}
