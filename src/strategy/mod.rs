//! Dispatch strategies: four interchangeable concurrency mechanisms
//! behind one engine.
//!
//! - [`DispatchKind::SpawnPerItem`]: a dispatcher thread spawns one
//!   worker thread per item; execution is gated by a counting semaphore of
//!   `threads` permits (unbounded creation, bounded execution).
//! - [`DispatchKind::FixedThreads`]: exactly `threads` long-lived worker
//!   threads parked on a condition variable.
//! - [`DispatchKind::TaskPool`]: `threads` scheduler tasks on a
//!   strategy-owned runtime, draining the hand-off cooperatively.
//! - [`DispatchKind::BatchBarrier`]: one dispatcher launches work in
//!   lock-step groups of exactly `threads`; groups never interleave.
//!
//! Every strategy enforces the same bound: no more than `threads`
//! callbacks execute at once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::state::Shared;

mod batch;
mod elastic;
mod fixed;
mod tasks;

use batch::BatchPool;
use elastic::ElasticPool;
use fixed::FixedPool;
use tasks::TaskPool;

/// The concurrency mechanism behind a work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchKind {
    /// Thread-per-item, slot-limited by a counting semaphore.
    SpawnPerItem,
    /// A fixed pool of worker threads woken by a condition variable.
    FixedThreads,
    /// A fixed pool of scheduler tasks draining the shared queue.
    TaskPool,
    /// Lock-step batches of exactly `threads` items, joined at a barrier.
    BatchBarrier,
}

impl DispatchKind {
    pub(crate) fn strategy<T: Send + 'static>(self) -> Box<dyn DispatchStrategy<T>> {
        match self {
            DispatchKind::SpawnPerItem => Box::new(ElasticPool::new()),
            DispatchKind::FixedThreads => Box::new(FixedPool::new()),
            DispatchKind::TaskPool => Box::new(TaskPool::new()),
            DispatchKind::BatchBarrier => Box::new(BatchPool::new()),
        }
    }
}

/// A pluggable concurrency mechanism driving the shared engine core.
///
/// `bootstrap` is called exactly once, on the first accepted item.
/// `notify` is called after every state change a parked worker could be
/// waiting on (enqueue, complete, clear, stop); strategies parked on the
/// engine's condition variable are woken by the engine itself and can
/// leave it as a no-op. `teardown` joins every worker unit and releases
/// the strategy's resources; it is called at most once, after the engine
/// is marked disposed.
pub(crate) trait DispatchStrategy<T: Send + 'static>: Send + Sync {
    fn bootstrap(&self, shared: &Arc<Shared<T>>);

    fn notify(&self) {}

    fn teardown(&self);
}
