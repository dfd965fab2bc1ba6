//! Batch-barrier pool: lock-step groups of exactly `threads` items.
//!
//! A single dispatcher task reads the hand-off queue in chunks of
//! `threads`, launches one scheduler task per item, and joins the whole
//! chunk before reading the next. No item of chunk *k+1* ever executes
//! concurrently with an item of chunk *k*. Once completion is marked and
//! the hand-off is empty, a final partial chunk is flushed through the
//! same barrier.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::engine::state::{lock, Shared, RECHECK_INTERVAL};
use crate::strategy::tasks::{build_runtime, join_off_runtime};
use crate::strategy::DispatchStrategy;

pub(crate) struct BatchPool {
    notify: Arc<Notify>,
    state: Mutex<Option<BatchPoolState>>,
}

struct BatchPoolState {
    runtime: tokio::runtime::Runtime,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl BatchPool {
    pub(crate) fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            state: Mutex::new(None),
        }
    }
}

impl<T: Send + 'static> DispatchStrategy<T> for BatchPool {
    fn bootstrap(&self, shared: &Arc<Shared<T>>) {
        let threads = shared.threads();
        let label = shared.label().to_string();
        let runtime = match build_runtime(&label, threads) {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "failed to build batch pool runtime");
                return;
            }
        };

        let dispatcher = runtime.spawn(dispatch_loop(
            Arc::clone(shared),
            Arc::clone(&self.notify),
        ));
        *lock(&self.state) = Some(BatchPoolState {
            runtime,
            dispatcher,
        });
        info!(queue = %label, threads, "batch pool started");
    }

    fn notify(&self) {
        self.notify.notify_waiters();
    }

    fn teardown(&self) {
        let Some(BatchPoolState {
            runtime,
            dispatcher,
        }) = lock(&self.state).take()
        else {
            return;
        };
        self.notify.notify_waiters();
        join_off_runtime(runtime, vec![dispatcher]);
    }
}

async fn dispatch_loop<T: Send + 'static>(shared: Arc<Shared<T>>, notify: Arc<Notify>) {
    let chunk = shared.threads();
    let mut batch: Vec<T> = Vec::with_capacity(chunk);
    loop {
        if shared.is_disposed() || shared.is_cancelled() {
            break;
        }
        while batch.len() < chunk {
            match shared.pop() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        let flush = batch.len() == chunk
            || (!batch.is_empty() && shared.is_complete_marked() && shared.queue_is_empty());
        if flush {
            run_batch(&shared, &mut batch).await;
            continue;
        }
        if batch.is_empty() && shared.is_complete_marked() && shared.len() == 0 {
            break;
        }
        let _ = tokio::time::timeout(RECHECK_INTERVAL, notify.notified()).await;
    }
    if shared.is_cancelled() {
        shared.drain_pending();
    }
    // Items already pulled into a partial batch still need their
    // bookkeeping; the run_item pre-condition check skips their callbacks.
    for item in batch.drain(..) {
        shared.run_item(item);
    }
    debug!(queue = shared.label(), "batch dispatcher exiting");
}

/// Launches one task per item and blocks until the whole group finishes.
async fn run_batch<T: Send + 'static>(shared: &Arc<Shared<T>>, batch: &mut Vec<T>) {
    let units: Vec<_> = batch
        .drain(..)
        .map(|item| {
            let shared = Arc::clone(shared);
            tokio::spawn(async move { shared.run_item(item) })
        })
        .collect();
    for outcome in futures::future::join_all(units).await {
        if outcome.is_err() {
            error!("batch unit panicked");
        }
    }
}
