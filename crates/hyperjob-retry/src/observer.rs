use std::time::Duration;

use crate::error::OperationError;

/// Hooks into a running execution. Every method defaults to a no-op.
///
/// Called inline from the coordinator, so implementations must not block.
pub trait RetryObserver: Send + Sync {
    /// Attempt `attempt` is about to run.
    fn on_attempt(&self, _attempt: u32) {}

    /// Attempt `attempt` failed. `will_retry` is false when this failure is
    /// final.
    fn on_failure(&self, _attempt: u32, _error: &OperationError, _will_retry: bool) {}

    /// About to sleep `delay` before `next_attempt`.
    fn on_backoff(&self, _next_attempt: u32, _delay: Duration) {}

    /// Started (`true`) or finished (`false`) waiting for the network.
    fn on_network_wait(&self, _waiting: bool) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RetryObserver for NoopObserver {}
