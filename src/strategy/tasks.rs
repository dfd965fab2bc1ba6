//! Scheduler-task fixed pool: `threads` tasks on a strategy-owned runtime.
//!
//! Each task runs a two-pass drain loop: drain while the queue has work,
//! yield, then mop up stragglers enqueued during the yield. Between rounds
//! the task parks on a [`Notify`] under a bounded timeout so it observes
//! cancellation cooperatively. The runtime is created at bootstrap and
//! torn down from a dedicated thread, so disposal is safe even when the
//! embedder drops the queue from inside another runtime.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::state::{lock, Shared, RECHECK_INTERVAL};
use crate::strategy::DispatchStrategy;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub(crate) struct TaskPool {
    notify: Arc<Notify>,
    state: Mutex<Option<TaskPoolState>>,
}

struct TaskPoolState {
    runtime: Runtime,
    units: Vec<JoinHandle<()>>,
}

impl TaskPool {
    pub(crate) fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            state: Mutex::new(None),
        }
    }
}

impl<T: Send + 'static> DispatchStrategy<T> for TaskPool {
    fn bootstrap(&self, shared: &Arc<Shared<T>>) {
        let threads = shared.threads();
        let label = shared.label().to_string();
        let runtime = match build_runtime(&label, threads) {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "failed to build task pool runtime");
                return;
            }
        };

        let mut units = Vec::with_capacity(threads);
        for index in 0..threads {
            let shared = Arc::clone(shared);
            let notify = Arc::clone(&self.notify);
            units.push(runtime.spawn(drain_loop(shared, notify, index)));
        }
        *lock(&self.state) = Some(TaskPoolState { runtime, units });
        info!(queue = %label, threads, "task pool started");
    }

    fn notify(&self) {
        self.notify.notify_waiters();
    }

    fn teardown(&self) {
        let Some(TaskPoolState { runtime, units }) = lock(&self.state).take() else {
            return;
        };
        self.notify.notify_waiters();
        join_off_runtime(runtime, units);
    }
}

pub(crate) fn build_runtime(label: &str, threads: usize) -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name(format!("{label}-task"))
        .enable_time()
        .build()
}

/// Joins the given task handles and drops the runtime from a dedicated
/// thread. `Runtime::block_on` and dropping a runtime both panic when the
/// calling thread is already driving a runtime; teardown must not.
pub(crate) fn join_off_runtime(runtime: Runtime, units: Vec<JoinHandle<()>>) {
    let joiner = thread::Builder::new()
        .name("workgate-shutdown".to_string())
        .spawn(move || {
            runtime.block_on(async {
                for unit in units {
                    if unit.await.is_err() {
                        error!("scheduler task panicked during shutdown");
                    }
                }
            });
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        });
    match joiner {
        Ok(handle) => {
            let _ = handle.join();
        }
        Err(err) => error!(error = %err, "failed to spawn shutdown thread"),
    }
}

async fn drain_loop<T: Send + 'static>(shared: Arc<Shared<T>>, notify: Arc<Notify>, index: usize) {
    debug!(unit = index, "task started");
    loop {
        if shared.is_disposed() {
            break;
        }
        if shared.is_cancelled() {
            shared.drain_pending();
            break;
        }
        // First pass: drain while completion has not been marked.
        while !shared.is_complete_marked() {
            match shared.pop() {
                Some(item) => shared.run_item(item),
                None => break,
            }
        }
        tokio::task::yield_now().await;
        // Second pass: mop up stragglers enqueued during the yield, and
        // the final drain once completion is marked.
        while let Some(item) = shared.pop() {
            shared.run_item(item);
        }
        if shared.is_complete_marked() && shared.len() == 0 {
            break;
        }
        let _ = tokio::time::timeout(RECHECK_INTERVAL, notify.notified()).await;
    }
    debug!(unit = index, "task stopped");
}
