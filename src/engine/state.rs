//! Shared engine state: the FIFO hand-off, lifecycle latches, the
//! single-item execution wrapper, and queue statistics.
//!
//! Every dispatch strategy drives the same [`Shared`] core. The one place
//! a callback ever executes is [`Shared::run_item`]; the one place the
//! "did the queue just fully drain" determination is made is
//! [`Shared::maybe_fire_completed`], serialized under a dedicated lock so
//! the completion event fires exactly once no matter which worker finishes
//! last.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::options::{ErrorPolicy, QueueOptions};

/// Bounded re-check interval for parked workers and waiters, so
/// cooperative cancellation is observed even without an explicit wake.
pub(crate) const RECHECK_INTERVAL: Duration = Duration::from_millis(50);

/// The per-item callback supplied by the embedder.
pub(crate) type Handler<T> = Box<dyn Fn(T) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle hooks registered on the builder.
#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) on_started: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) on_completed: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) on_faulted: Option<Box<dyn Fn(&anyhow::Error) + Send + Sync>>,
}

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the queue handle, its waiters, and every worker
/// unit of the active dispatch strategy.
pub(crate) struct Shared<T> {
    pub(crate) options: QueueOptions,
    queue: SegQueue<T>,
    /// Pending + in-flight items. Approximate under concurrency.
    len: AtomicUsize,
    complete: AtomicBool,
    disposed: AtomicBool,
    started: AtomicBool,
    completed_fired: AtomicBool,
    fault_latched: AtomicBool,
    /// Serializes the drained determination.
    completion: Mutex<()>,
    signal: Mutex<()>,
    condvar: Condvar,
    token: CancellationToken,
    handler: Handler<T>,
    hooks: Hooks,
    stats: SharedStats,
    fault: Mutex<Option<anyhow::Error>>,
}

impl<T> Shared<T> {
    pub(crate) fn new(
        options: QueueOptions,
        token: CancellationToken,
        handler: Handler<T>,
        hooks: Hooks,
    ) -> Self {
        Self {
            options,
            queue: SegQueue::new(),
            len: AtomicUsize::new(0),
            complete: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            completed_fired: AtomicBool::new(false),
            fault_latched: AtomicBool::new(false),
            completion: Mutex::new(()),
            signal: Mutex::new(()),
            condvar: Condvar::new(),
            token,
            handler,
            hooks,
            stats: SharedStats::new(),
            fault: Mutex::new(None),
        }
    }

    pub(crate) fn threads(&self) -> usize {
        self.options.threads
    }

    pub(crate) fn label(&self) -> &str {
        self.options.label()
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn is_complete_marked(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Accepts an item unless the queue is disposed, cancelled, or
    /// complete-marked. Returns whether the item was taken.
    pub(crate) fn accept(&self, item: T) -> bool {
        if self.is_disposed() || self.is_cancelled() || self.is_complete_marked() {
            return false;
        }
        if !self.started.swap(true, Ordering::SeqCst) {
            debug!(queue = self.label(), "work started");
            if let Some(hook) = &self.hooks.on_started {
                hook();
            }
        }
        self.len.fetch_add(1, Ordering::SeqCst);
        self.queue.push(item);
        self.notify_all();
        true
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Marks completion: no further items are accepted, already-queued
    /// items still drain.
    pub(crate) fn mark_complete(&self) {
        if !self.complete.swap(true, Ordering::SeqCst) {
            debug!(queue = self.label(), "completion marked");
        }
        self.maybe_fire_completed();
        self.notify_all();
    }

    pub(crate) fn set_disposed(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.notify_all();
    }

    /// Discards items still waiting in the hand-off queue. Items already
    /// picked up by a worker are unaffected.
    pub(crate) fn drain_pending(&self) {
        let mut discarded = 0usize;
        while let Some(item) = self.queue.pop() {
            drop(item);
            self.len.fetch_sub(1, Ordering::SeqCst);
            discarded += 1;
        }
        if discarded > 0 {
            debug!(queue = self.label(), discarded, "discarded pending items");
        }
        self.maybe_fire_completed();
        self.notify_all();
    }

    /// Bookkeeping for an item that was taken off the queue but whose
    /// worker could never run it (e.g. thread spawn failure).
    pub(crate) fn abandon_one(&self) {
        self.finish_item();
    }

    /// Executes one item. This is the single point where the embedder's
    /// callback runs: pre-condition check, panic containment, fault
    /// policy, and guaranteed count/completion bookkeeping.
    pub(crate) fn run_item(&self, item: T) {
        if self.is_disposed() || self.is_cancelled() {
            self.finish_item();
            return;
        }
        self.stats.enter_active();
        let started_at = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(item)));
        let elapsed = started_at.elapsed();
        self.stats.exit_active();
        match outcome {
            Ok(Ok(())) => self.stats.record_executed(elapsed),
            Ok(Err(err)) => {
                self.stats.record_faulted(elapsed);
                self.handle_fault(err);
            }
            Err(payload) => {
                self.stats.record_faulted(elapsed);
                let message = panic_message(payload.as_ref());
                self.handle_fault(anyhow::anyhow!("work callback panicked: {message}"));
            }
        }
        self.finish_item();
    }

    fn finish_item(&self) {
        self.len.fetch_sub(1, Ordering::SeqCst);
        self.maybe_fire_completed();
        self.notify_all();
    }

    fn handle_fault(&self, err: anyhow::Error) {
        match self.options.error_policy {
            ErrorPolicy::IsolateAndReport => {
                warn!(queue = self.label(), error = %err, "work item faulted; isolating");
                if let Some(hook) = &self.hooks.on_faulted {
                    hook(&err);
                }
            }
            ErrorPolicy::Propagate => {
                if self.fault_latched.swap(true, Ordering::SeqCst) {
                    debug!(queue = self.label(), error = %err, "fault after queue already faulted; dropping");
                    return;
                }
                error!(queue = self.label(), error = %err, "work item faulted; halting queue");
                if let Some(hook) = &self.hooks.on_faulted {
                    hook(&err);
                }
                *lock(&self.fault) = Some(err);
                self.complete.store(true, Ordering::SeqCst);
                self.drain_pending();
            }
        }
    }

    /// Removes and returns the fault that latched the queue under
    /// [`ErrorPolicy::Propagate`].
    pub(crate) fn take_fault(&self) -> Option<anyhow::Error> {
        lock(&self.fault).take()
    }

    /// The single serialization point for the drained determination. The
    /// completion event fires at most once per queue, and only after the
    /// started event has fired.
    fn maybe_fire_completed(&self) {
        let fire = {
            let _guard = lock(&self.completion);
            self.complete.load(Ordering::SeqCst)
                && self.started.load(Ordering::SeqCst)
                && self.len.load(Ordering::SeqCst) == 0
                && !self.completed_fired.swap(true, Ordering::SeqCst)
        };
        if fire {
            debug!(queue = self.label(), "work completed");
            if let Some(hook) = &self.hooks.on_completed {
                hook();
            }
            self.notify_all();
        }
    }

    /// Wakes every parked worker and waiter.
    pub(crate) fn notify_all(&self) {
        let _guard = lock(&self.signal);
        self.condvar.notify_all();
    }

    /// Parks the calling worker for up to `timeout` while there is nothing
    /// to do. The predicate is re-checked under the signal lock so wakes
    /// raced against the check are not lost.
    pub(crate) fn park_while_idle(&self, timeout: Duration) {
        let guard = lock(&self.signal);
        let idle = self.queue.is_empty()
            && !self.is_disposed()
            && !self.is_cancelled()
            && !(self.is_complete_marked() && self.len() == 0);
        if idle {
            let _ = self.condvar.wait_timeout(guard, timeout);
        }
    }

    /// Blocks until the queue drains, the timeout elapses, or cancellation
    /// fires. `None` blocks indefinitely; `Some(Duration::ZERO)` polls.
    pub(crate) fn wait_until_drained(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = lock(&self.signal);
        loop {
            if self.len() == 0 {
                return true;
            }
            if self.is_cancelled() {
                drop(guard);
                self.drain_pending();
                return self.len() == 0;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    RECHECK_INTERVAL.min(deadline - now)
                }
                None => RECHECK_INTERVAL,
            };
            match self.condvar.wait_timeout(guard, slice) {
                Ok((next, _)) => guard = next,
                Err(poisoned) => guard = poisoned.into_inner().0,
            }
        }
    }

    pub(crate) fn stats_snapshot(&self) -> QueueStats {
        self.stats.snapshot(self.threads())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Atomic counters behind [`QueueStats`].
struct SharedStats {
    executed: AtomicU64,
    faulted: AtomicU64,
    active: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedStats {
    fn new() -> Self {
        Self {
            executed: AtomicU64::new(0),
            faulted: AtomicU64::new(0),
            active: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    fn enter_active(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_active(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn record_executed(&self, duration: Duration) {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_faulted(&self, duration: Duration) {
        self.faulted.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn snapshot(&self, threads: usize) -> QueueStats {
        let executed = self.executed.load(Ordering::SeqCst);
        let faulted = self.faulted.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let total = executed + faulted;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };
        QueueStats {
            threads,
            active: self.active.load(Ordering::SeqCst) as usize,
            executed,
            faulted,
            average_duration,
        }
    }
}

/// Point-in-time statistics for a work queue.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// The queue's concurrency bound.
    pub threads: usize,
    /// Callbacks executing right now.
    pub active: usize,
    /// Callbacks that returned `Ok`.
    pub executed: u64,
    /// Callbacks that returned `Err` or panicked.
    pub faulted: u64,
    /// Average callback duration across executed and faulted items.
    pub average_duration: Duration,
}

impl QueueStats {
    /// Total callbacks that have finished, successfully or not.
    pub fn total_processed(&self) -> u64 {
        self.executed + self.faulted
    }
}
