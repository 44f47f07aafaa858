//! Serialized execution context for harness callbacks.
//!
//! A [`DispatchQueue`] owns one OS thread running a current-thread tokio
//! runtime. Every callback scheduled on it, and every future spawned on
//! it, runs on that thread, so they never run concurrently with each
//! other. Callbacks fire in deadline order; callbacks sharing a deadline
//! fire in the order they were scheduled.
//!
//! The thread stops once the last handle to the queue is dropped. Pending
//! callbacks and spawned futures are discarded at that point.

use crate::errors::{HarnessError, HarnessResult};
use std::any::Any;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::{self, Handle};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Name given to the dispatch thread unless overridden.
pub const DEFAULT_QUEUE_NAME: &str = "reactive-testing-dispatch";

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ScheduledJob {
    deadline: Instant,
    job: Job,
}

/// A job waiting in the heap; `sequence` breaks deadline ties.
struct PendingJob {
    deadline: Instant,
    sequence: u64,
    job: Job,
}

impl PendingJob {
    const fn key(&self) -> (Instant, u64) {
        (self.deadline, self.sequence)
    }
}

impl PartialEq for PendingJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingJob {}

impl PartialOrd for PendingJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Handle to a serialized execution context.
///
/// Cloning is cheap; clones share the same thread, which lets several
/// harnesses order their callbacks against each other.
#[derive(Clone)]
pub struct DispatchQueue {
    name: Arc<str>,
    jobs: mpsc::UnboundedSender<ScheduledJob>,
    runtime: Handle,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DispatchQueue {
    /// Starts a queue on a thread named [`DEFAULT_QUEUE_NAME`].
    pub fn new() -> HarnessResult<Self> {
        Self::named(DEFAULT_QUEUE_NAME)
    }

    /// Starts a queue on a thread with the given name.
    pub fn named(name: impl Into<String>) -> HarnessResult<Self> {
        let name: String = name.into();
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(HarnessError::DispatchRuntime)?;
        let handle = runtime.handle().clone();
        let (jobs, receiver) = mpsc::unbounded_channel();

        let queue_name: Arc<str> = Arc::from(name.as_str());
        let thread_queue_name = Arc::clone(&queue_name);
        let _detached = thread::Builder::new()
            .name(name.clone())
            .spawn(move || runtime.block_on(drive(receiver, thread_queue_name)))
            .map_err(|source| HarnessError::DispatchThread { name, source })?;

        Ok(Self {
            name: queue_name,
            jobs,
            runtime: handle,
        })
    }

    /// Name of the dispatch thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `job` once, on the dispatch thread, no earlier than `deadline`.
    ///
    /// A deadline in the past runs as soon as the queue gets to it.
    pub fn schedule_at<F>(&self, deadline: Instant, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let scheduled = ScheduledJob {
            deadline,
            job: Box::new(job),
        };
        if self.jobs.send(scheduled).is_err() {
            warn!(queue = %self.name, "dispatch queue stopped; dropping scheduled callback");
        }
    }

    /// Runs `job` once, on the dispatch thread, after `delay`.
    ///
    /// A delay too large to represent as a deadline never fires.
    pub fn schedule_after<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match Instant::now().checked_add(delay) {
            Some(deadline) => self.schedule_at(deadline, job),
            None => trace!(queue = %self.name, ?delay, "delay out of range; callback never fires"),
        }
    }

    /// Spawns `future` on the dispatch thread.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _detached = self.runtime.spawn(future);
    }
}

async fn drive(mut jobs: mpsc::UnboundedReceiver<ScheduledJob>, name: Arc<str>) {
    debug!(queue = %name, "dispatch queue started");
    let mut pending: BinaryHeap<Reverse<PendingJob>> = BinaryHeap::new();
    let mut sequence: u64 = 0;

    loop {
        let next_deadline = pending.peek().map(|Reverse(next)| next.deadline);
        let wake_at = tokio::time::Instant::from_std(next_deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            biased;

            received = jobs.recv() => match received {
                Some(ScheduledJob { deadline, job }) => {
                    pending.push(Reverse(PendingJob { deadline, sequence, job }));
                    sequence += 1;
                }
                None => break,
            },
            () = tokio::time::sleep_until(wake_at), if next_deadline.is_some() => {
                let now = Instant::now();
                while pending.peek().is_some_and(|Reverse(next)| next.deadline <= now) {
                    if let Some(Reverse(due)) = pending.pop() {
                        run_job(&name, due.job);
                    }
                }
            }
        }
    }

    debug!(queue = %name, discarded = pending.len(), "dispatch queue stopped");
}

fn run_job(name: &str, job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        error!(
            queue = %name,
            panic = %panic_message(payload.as_ref()),
            "scheduled callback panicked"
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_owned())
}
