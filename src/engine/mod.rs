//! The work-execution engine: one lifecycle, pluggable dispatch.
//!
//! All four dispatch strategies share the same engine core: the FIFO
//! hand-off, the complete/disposed latches, the serialized completion
//! check, and the single-item execution wrapper. The strategy only decides
//! *what kind of worker units* drain the hand-off and how their
//! concurrency is bounded.
//!
//! ```text
//!  Producers ──enqueue──▶ ┌─────────────────┐
//!                         │  FIFO hand-off  │
//!                         └────────┬────────┘
//!                                  │ pop
//!              ┌───────────────────┼──────────────────┐
//!              ▼                   ▼                  ▼
//!        worker unit 1       worker unit 2  …   worker unit N
//!        (strategy-owned: threads or scheduler tasks)
//! ```
//!
//! See [`crate::strategy`] for the four strategies.

pub(crate) mod state;

mod queue;

pub use queue::{WorkQueue, WorkQueueBuilder};
pub use state::QueueStats;
