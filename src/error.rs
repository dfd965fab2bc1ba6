//! Error types for work queue operations.

use thiserror::Error;

/// Errors that can occur on the work queue surface.
///
/// The surface is deliberately small: invalid worker counts are clamped at
/// construction rather than rejected, and `enqueue` silently drops items
/// after completion or disposal so producers need not special-case
/// shutdown races.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue has been stopped or dropped; its workers are gone.
    #[error("work queue has been disposed")]
    Disposed,
}
