//! workgate: bounded-concurrency work queues with interchangeable
//! dispatch strategies.
//!
//! A [`WorkQueue`] accepts items from any number of producers and executes
//! a per-item callback with at most `threads` callbacks running at once.
//! The concurrency mechanism is chosen per queue via [`DispatchKind`]:
//! thread-per-item behind a counting semaphore, a fixed condvar-woken
//! thread pool, a fixed scheduler-task pool, or lock-step batches joined
//! at a barrier.
//!
//! Worker infrastructure is bootstrapped lazily on the first accepted
//! item. Producers mark the queue complete when they are done; queued
//! items still drain, and the completion hook fires exactly once when the
//! last one finishes.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use workgate::{DispatchKind, QueueOptions, WorkQueue};
//!
//! let total = Arc::new(AtomicUsize::new(0));
//! let sink = Arc::clone(&total);
//!
//! let queue = WorkQueue::builder(DispatchKind::FixedThreads, QueueOptions::new(2))
//!     .build(move |n: usize| {
//!         sink.fetch_add(n, Ordering::SeqCst);
//!         Ok(())
//!     });
//!
//! for n in 1..=10 {
//!     queue.enqueue(n);
//! }
//! queue.complete()?;
//! assert!(queue.wait(None)?);
//! assert_eq!(total.load(Ordering::SeqCst), 55);
//! # Ok::<(), workgate::QueueError>(())
//! ```
//!
//! Cancellation is cooperative: pass a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) to the
//! builder and workers will stop dequeuing when it fires; a callback
//! already in flight is never preempted.

pub mod engine;
pub mod error;
pub mod options;
pub mod strategy;

pub use engine::{QueueStats, WorkQueue, WorkQueueBuilder};
pub use error::QueueError;
pub use options::{ErrorPolicy, QueueOptions, ThreadLimits};
pub use strategy::DispatchKind;
