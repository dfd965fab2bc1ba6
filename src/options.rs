//! Configuration for work queues.
//!
//! All settings are resolved once, at construction. Worker counts are
//! clamped against limits derived from the machine's available parallelism
//! at the moment the queue is built; there is no process-global mutable
//! configuration.

use serde::{Deserialize, Serialize};

/// Worker-count limits derived from the host environment.
///
/// Captured at queue construction via [`ThreadLimits::detect`] and applied
/// by [`QueueOptions::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadLimits {
    /// Smallest permitted worker count.
    pub min: usize,
    /// Largest permitted worker count.
    pub max: usize,
    /// Worker count used when the caller asks for auto-detection.
    pub default: usize,
}

impl ThreadLimits {
    /// Derives limits from the number of logical CPUs.
    pub fn detect() -> Self {
        Self::for_cpus(num_cpus::get())
    }

    /// Derives limits for an explicit CPU count.
    pub fn for_cpus(cpus: usize) -> Self {
        let cpus = cpus.max(1);
        Self {
            min: 1,
            max: cpus * 2,
            default: cpus,
        }
    }
}

/// How a fault raised by the per-item callback is handled.
///
/// The policy is uniform across every dispatch strategy. Callback panics
/// are caught and treated as faults under the same policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// The first fault latches the queue: completion is marked, pending
    /// items are discarded, and the fault is stored for retrieval.
    Propagate,
    /// The fault is confined to its item and forwarded to the
    /// `work_faulted` hook; the queue keeps draining.
    #[default]
    IsolateAndReport,
}

/// Immutable settings for a [`WorkQueue`](crate::WorkQueue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Concurrency bound: the maximum number of callbacks executing at
    /// once. `0` means auto-detect from available parallelism. Clamped
    /// into the detected [`ThreadLimits`] at construction.
    pub threads: usize,
    /// Optional diagnostic label, used in worker thread names and tracing
    /// fields.
    pub name: Option<String>,
    /// Whether disposal drains queued items before tearing workers down.
    /// When `false`, queued-but-not-started items are abandoned.
    pub wait_on_teardown: bool,
    /// Fault handling policy for the per-item callback.
    pub error_policy: ErrorPolicy,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            name: None,
            wait_on_teardown: false,
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl QueueOptions {
    /// Creates options with the given concurrency bound (`0` = auto).
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            ..Default::default()
        }
    }

    /// Sets the diagnostic label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets whether disposal waits for queued items to drain.
    pub fn with_wait_on_teardown(mut self, wait: bool) -> Self {
        self.wait_on_teardown = wait;
        self
    }

    /// Sets the fault handling policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Resolves auto-detection and clamps the worker count into `limits`.
    pub fn resolve(mut self, limits: &ThreadLimits) -> Self {
        let requested = if self.threads == 0 {
            limits.default
        } else {
            self.threads
        };
        self.threads = requested.clamp(limits.min, limits.max);
        self
    }

    /// The label used for worker thread names and tracing fields.
    pub(crate) fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("workgate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_limits_for_cpus() {
        let limits = ThreadLimits::for_cpus(8);
        assert_eq!(limits.min, 1);
        assert_eq!(limits.max, 16);
        assert_eq!(limits.default, 8);

        // A pathological zero-CPU report still yields usable limits.
        let limits = ThreadLimits::for_cpus(0);
        assert_eq!(limits.min, 1);
        assert_eq!(limits.max, 2);
        assert_eq!(limits.default, 1);
    }

    #[test]
    fn test_options_builder() {
        let options = QueueOptions::new(4)
            .with_name("encoder")
            .with_wait_on_teardown(true)
            .with_error_policy(ErrorPolicy::Propagate);

        assert_eq!(options.threads, 4);
        assert_eq!(options.name.as_deref(), Some("encoder"));
        assert!(options.wait_on_teardown);
        assert_eq!(options.error_policy, ErrorPolicy::Propagate);
    }

    #[test]
    fn test_resolve_clamps_and_auto_detects() {
        let limits = ThreadLimits::for_cpus(4);

        let auto = QueueOptions::new(0).resolve(&limits);
        assert_eq!(auto.threads, 4);

        let too_many = QueueOptions::new(100).resolve(&limits);
        assert_eq!(too_many.threads, 8);

        let in_range = QueueOptions::new(3).resolve(&limits);
        assert_eq!(in_range.threads, 3);
    }

    #[test]
    fn test_default_label() {
        assert_eq!(QueueOptions::default().label(), "workgate");
        assert_eq!(QueueOptions::default().with_name("scan").label(), "scan");
    }
}
