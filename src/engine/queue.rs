//! The work queue handle and its builder.

use std::marker::PhantomData;
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::state::{Handler, Hooks, QueueStats, Shared};
use crate::error::QueueError;
use crate::options::{QueueOptions, ThreadLimits};
use crate::strategy::{DispatchKind, DispatchStrategy};

/// A bounded-concurrency work queue.
///
/// Producers hand items to [`enqueue`](WorkQueue::enqueue); the configured
/// dispatch strategy executes the per-item callback with at most
/// `options.threads` callbacks running at once. Worker infrastructure is
/// bootstrapped lazily on the first accepted item.
///
/// Dropping the queue disposes it: completion is forced, and queued items
/// are drained first only when `wait_on_teardown` is set.
pub struct WorkQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    strategy: Box<dyn DispatchStrategy<T>>,
    bootstrap: Once,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Starts building a queue with the given strategy and options.
    pub fn builder(kind: DispatchKind, options: QueueOptions) -> WorkQueueBuilder<T> {
        WorkQueueBuilder {
            kind,
            options,
            limits: None,
            token: CancellationToken::new(),
            hooks: Hooks::default(),
            _marker: PhantomData,
        }
    }

    /// Builds a queue with no hooks and a fresh cancellation token.
    pub fn new<F>(kind: DispatchKind, options: QueueOptions, handler: F) -> Self
    where
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::builder(kind, options).build(handler)
    }

    /// Hands an item to the queue. Silently ignored once the queue is
    /// complete-marked, cancelled, or disposed, so producers need not
    /// special-case shutdown races.
    pub fn enqueue(&self, item: T) {
        if !self.shared.accept(item) {
            return;
        }
        let shared = &self.shared;
        let strategy = self.strategy.as_ref();
        self.bootstrap.call_once(|| strategy.bootstrap(shared));
        strategy.notify();
    }

    /// Marks the queue complete: no further items are accepted, items
    /// already queued still drain. Idempotent.
    pub fn complete(&self) -> Result<(), QueueError> {
        self.ensure_live()?;
        self.shared.mark_complete();
        self.strategy.notify();
        Ok(())
    }

    /// Discards items still waiting in the hand-off queue. Items already
    /// picked up by a worker are unaffected.
    pub fn clear(&self) -> Result<(), QueueError> {
        self.ensure_live()?;
        self.shared.drain_pending();
        self.strategy.notify();
        Ok(())
    }

    /// Blocks until the queue drains, the timeout elapses, or the
    /// cancellation token fires. `None` blocks indefinitely;
    /// `Some(Duration::ZERO)` polls without blocking. Returns `Ok(true)`
    /// iff the queue drained.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool, QueueError> {
        self.ensure_live()?;
        Ok(self.shared.wait_until_drained(timeout))
    }

    /// Stops the queue. With `enforce == false` queued work finishes
    /// first; with `enforce == true` queued-but-not-started items are
    /// discarded. Either way every worker unit is joined before this
    /// returns, and the queue ends disposed.
    pub fn stop(&self, enforce: bool) -> Result<(), QueueError> {
        self.ensure_live()?;
        info!(queue = self.shared.label(), enforce, "stopping work queue");
        self.shared.mark_complete();
        self.strategy.notify();
        if !enforce {
            let _ = self.shared.wait_until_drained(None);
        }
        self.shared.set_disposed();
        self.shared.drain_pending();
        self.strategy.notify();
        self.strategy.teardown();
        info!(queue = self.shared.label(), "work queue stopped");
        Ok(())
    }

    /// Disposes the queue: `stop(!wait_on_teardown)`. Safe to call more
    /// than once; also invoked on drop.
    pub fn dispose(&self) {
        if self.shared.is_disposed() {
            return;
        }
        let enforce = !self.shared.options.wait_on_teardown;
        let _ = self.stop(enforce);
    }

    /// Pending + in-flight items. Approximate under concurrency.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether the queue holds no pending or in-flight items.
    pub fn is_empty(&self) -> bool {
        self.shared.len() == 0
    }

    /// Whether any items are pending or in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.len() > 0
    }

    /// Whether completion has been marked.
    pub fn is_complete_marked(&self) -> bool {
        self.shared.is_complete_marked()
    }

    /// Whether the queue has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// The resolved concurrency bound.
    pub fn threads(&self) -> usize {
        self.shared.threads()
    }

    /// Point-in-time queue statistics.
    pub fn stats(&self) -> QueueStats {
        self.shared.stats_snapshot()
    }

    /// Removes and returns the fault that latched the queue under
    /// [`ErrorPolicy::Propagate`](crate::options::ErrorPolicy::Propagate).
    pub fn take_fault(&self) -> Option<anyhow::Error> {
        self.shared.take_fault()
    }

    fn ensure_live(&self) -> Result<(), QueueError> {
        if self.shared.is_disposed() {
            return Err(QueueError::Disposed);
        }
        Ok(())
    }
}

impl<T: Send + 'static> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Builder for [`WorkQueue`]: cancellation token, lifecycle hooks, and the
/// per-item callback.
pub struct WorkQueueBuilder<T: Send + 'static> {
    kind: DispatchKind,
    options: QueueOptions,
    limits: Option<ThreadLimits>,
    token: CancellationToken,
    hooks: Hooks,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> WorkQueueBuilder<T> {
    /// Uses the given cancellation token instead of a fresh one. Workers
    /// check it cooperatively at every dispatch point; it never preempts a
    /// callback already in flight.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Overrides the detected worker-count limits. Intended for embedders
    /// (and tests) that know the environment better than `num_cpus` does.
    pub fn thread_limits(mut self, limits: ThreadLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Called exactly once, on the first accepted item.
    pub fn on_work_started<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_started = Some(Box::new(hook));
        self
    }

    /// Called exactly once, when the queue is complete-marked and fully
    /// drained. Never fires before the started hook.
    pub fn on_work_completed<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_completed = Some(Box::new(hook));
        self
    }

    /// Called when a callback faults: per isolated item under
    /// `IsolateAndReport`, once for the latching fault under `Propagate`.
    pub fn on_work_faulted<F>(mut self, hook: F) -> Self
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        self.hooks.on_faulted = Some(Box::new(hook));
        self
    }

    /// Finishes the build with the per-item callback.
    pub fn build<F>(self, handler: F) -> WorkQueue<T>
    where
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let limits = self.limits.unwrap_or_else(ThreadLimits::detect);
        let options = self.options.resolve(&limits);
        let handler: Handler<T> = Box::new(handler);
        let shared = Arc::new(Shared::new(options, self.token, handler, self.hooks));
        WorkQueue {
            shared,
            strategy: self.kind.strategy(),
            bootstrap: Once::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counting_queue(kind: DispatchKind, threads: usize) -> (WorkQueue<usize>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let queue = WorkQueue::builder(kind, QueueOptions::new(threads))
            .thread_limits(ThreadLimits::for_cpus(8))
            .build(move |n| {
                seen.fetch_add(n, Ordering::SeqCst);
                Ok(())
            });
        (queue, counter)
    }

    #[test]
    fn test_idle_queue_reports_drained() {
        let (queue, counter) = counting_queue(DispatchKind::FixedThreads, 2);
        assert_eq!(queue.len(), 0);
        assert!(!queue.is_busy());
        assert!(queue.wait(Some(Duration::ZERO)).expect("queue is live"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enqueue_complete_wait_drains() {
        let (queue, counter) = counting_queue(DispatchKind::FixedThreads, 2);
        for n in 1..=10 {
            queue.enqueue(n);
        }
        queue.complete().expect("queue is live");
        assert!(queue.wait(None).expect("queue is live"));
        assert_eq!(counter.load(Ordering::SeqCst), 55);
        assert_eq!(queue.stats().executed, 10);
    }

    #[test]
    fn test_operations_fail_after_stop() {
        let (queue, _counter) = counting_queue(DispatchKind::FixedThreads, 1);
        queue.enqueue(1);
        queue.stop(false).expect("first stop succeeds");
        assert!(queue.is_disposed());

        assert!(matches!(queue.complete(), Err(QueueError::Disposed)));
        assert!(matches!(queue.clear(), Err(QueueError::Disposed)));
        assert!(matches!(queue.wait(None), Err(QueueError::Disposed)));
        assert!(matches!(queue.stop(true), Err(QueueError::Disposed)));
    }

    #[test]
    fn test_enqueue_after_dispose_is_silent() {
        let (queue, counter) = counting_queue(DispatchKind::FixedThreads, 1);
        queue.enqueue(1);
        queue.stop(false).expect("first stop succeeds");
        let executed = counter.load(Ordering::SeqCst);

        queue.enqueue(100);
        assert_eq!(queue.len(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), executed);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (queue, _counter) = counting_queue(DispatchKind::FixedThreads, 1);
        queue.enqueue(1);
        queue.dispose();
        queue.dispose();
        assert!(queue.is_disposed());
    }

    #[test]
    fn test_builder_resolves_thread_count() {
        let queue: WorkQueue<()> =
            WorkQueue::builder(DispatchKind::FixedThreads, QueueOptions::new(0))
                .thread_limits(ThreadLimits::for_cpus(4))
                .build(|_| Ok(()));
        assert_eq!(queue.threads(), 4);
    }
}
