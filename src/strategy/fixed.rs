//! Condition-variable fixed pool: `threads` long-lived worker threads.
//!
//! Workers park on the engine's condition variable with a bounded re-check
//! interval, so they stay responsive to cancellation even without an
//! explicit wake. Each wake dequeues and executes one item; the finish
//! bookkeeping notifies the condvar again, waking a peer or a waiter.

use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, info};

use crate::engine::state::{lock, Shared, RECHECK_INTERVAL};
use crate::strategy::DispatchStrategy;

pub(crate) struct FixedPool {
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl FixedPool {
    pub(crate) fn new() -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Send + 'static> DispatchStrategy<T> for FixedPool {
    fn bootstrap(&self, shared: &Arc<Shared<T>>) {
        let threads = shared.threads();
        let label = shared.label().to_string();
        let mut workers = lock(&self.workers);
        for index in 0..threads {
            let shared = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name(format!("{label}-worker-{index}"))
                .spawn(move || worker_loop(shared, index));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => error!(error = %err, worker = index, "failed to spawn worker thread"),
            }
        }
        info!(queue = %label, threads, "fixed pool started");
    }

    fn teardown(&self) {
        let handles: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop<T: Send + 'static>(shared: Arc<Shared<T>>, index: usize) {
    debug!(worker = index, "worker started");
    loop {
        if shared.is_disposed() {
            break;
        }
        if shared.is_cancelled() {
            shared.drain_pending();
            break;
        }
        match shared.pop() {
            Some(item) => shared.run_item(item),
            None => {
                if shared.is_complete_marked() && shared.len() == 0 {
                    break;
                }
                shared.park_while_idle(RECHECK_INTERVAL);
            }
        }
    }
    debug!(worker = index, "worker stopped");
}
