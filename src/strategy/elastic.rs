//! Semaphore-gated elastic pool: thread-per-item, slot-limited execution.
//!
//! A single dispatcher thread drains the hand-off queue and spawns a fresh
//! worker thread for every item. The worker must acquire one of `threads`
//! permits before invoking the callback, so creation is unbounded while
//! execution stays bounded. The permit pool is a pre-filled bounded
//! channel: acquire = `recv`, release = `send`.

use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::engine::state::{lock, Shared, RECHECK_INTERVAL};
use crate::strategy::DispatchStrategy;

pub(crate) struct ElasticPool {
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
    workers: Arc<Mutex<Vec<thread::JoinHandle<()>>>>,
}

impl ElasticPool {
    pub(crate) fn new() -> Self {
        Self {
            dispatcher: Mutex::new(None),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Send + 'static> DispatchStrategy<T> for ElasticPool {
    fn bootstrap(&self, shared: &Arc<Shared<T>>) {
        let threads = shared.threads();
        let label = shared.label().to_string();
        let (permit_tx, permit_rx) = bounded::<()>(threads);
        for _ in 0..threads {
            let _ = permit_tx.try_send(());
        }

        info!(queue = %label, threads, "elastic pool started");

        let shared = Arc::clone(shared);
        let workers = Arc::clone(&self.workers);
        let spawned = thread::Builder::new()
            .name(format!("{label}-dispatch"))
            .spawn(move || dispatch_loop(shared, workers, permit_tx, permit_rx, label));
        match spawned {
            Ok(handle) => *lock(&self.dispatcher) = Some(handle),
            Err(err) => error!(error = %err, "failed to spawn dispatcher thread"),
        }
    }

    fn teardown(&self) {
        if let Some(handle) = lock(&self.dispatcher).take() {
            if handle.join().is_err() {
                error!("dispatcher thread panicked during shutdown");
            }
        }
        let handles: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
    }
}

fn dispatch_loop<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    workers: Arc<Mutex<Vec<thread::JoinHandle<()>>>>,
    permit_tx: Sender<()>,
    permit_rx: Receiver<()>,
    label: String,
) {
    loop {
        if shared.is_disposed() {
            break;
        }
        if shared.is_cancelled() {
            shared.drain_pending();
            break;
        }
        match shared.pop() {
            Some(item) => {
                let worker_shared = Arc::clone(&shared);
                let acquire = permit_rx.clone();
                let release = permit_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{label}-worker"))
                    .spawn(move || {
                        let held = acquire_permit(&worker_shared, &acquire);
                        worker_shared.run_item(item);
                        if held {
                            let _ = release.send(());
                        }
                    });
                match spawned {
                    Ok(handle) => lock(&workers).push(handle),
                    Err(err) => {
                        error!(error = %err, "failed to spawn worker thread");
                        shared.abandon_one();
                    }
                }
            }
            None => {
                if shared.is_complete_marked() && shared.len() == 0 {
                    break;
                }
                shared.park_while_idle(RECHECK_INTERVAL);
            }
        }
    }
    debug!(queue = %label, "dispatcher exiting");
}

/// Blocks for a permit, re-checking disposal and cancellation on a bounded
/// interval. Returns whether a permit was actually acquired; when it was
/// not, the caller's `run_item` pre-condition check skips the callback.
fn acquire_permit<T>(shared: &Shared<T>, permits: &Receiver<()>) -> bool {
    loop {
        if shared.is_disposed() || shared.is_cancelled() {
            return false;
        }
        match permits.recv_timeout(RECHECK_INTERVAL) {
            Ok(()) => return true,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}
