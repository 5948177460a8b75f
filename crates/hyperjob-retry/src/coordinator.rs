use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OperationError, RetryError};
use crate::gate::NetworkGate;
use crate::observer::{NoopObserver, RetryObserver};
use crate::policy::RetryPolicy;

/// One attempt as it actually ran.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// `None` when the attempt succeeded.
    pub error: Option<String>,
    /// Backoff planned after this attempt, if another one follows.
    pub delay: Option<Duration>,
}

/// Everything that happened during one execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryReport {
    /// Attempts actually started. Never exceeds the policy's maximum.
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
    /// Time spent sleeping backoff delays.
    pub backoff_wait: Duration,
    /// Time spent waiting for the network to recover.
    pub outage_wait: Duration,
}

#[derive(Debug)]
pub struct Execution<T> {
    pub outcome: Result<T, RetryError>,
    pub report: RetryReport,
}

impl<T> Execution<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Runs an operation under a [`RetryPolicy`], optionally gated on network
/// state.
#[derive(Clone, Default)]
pub struct RetryCoordinator {
    network: Option<Arc<dyn NetworkGate>>,
}

impl RetryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(mut self, gate: Arc<dyn NetworkGate>) -> Self {
        self.network = Some(gate);
        self
    }

    pub async fn execute<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        op: F,
    ) -> Execution<T>
    where
        F: FnMut(u32, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.execute_observed(policy, cancel, &NoopObserver, op)
            .await
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs
    /// out of attempts or `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number and a token it should
    /// honour; the attempt is also raced against cancellation.
    pub async fn execute_observed<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        observer: &dyn RetryObserver,
        mut op: F,
    ) -> Execution<T>
    where
        F: FnMut(u32, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut report = RetryReport::default();
        let mut attempt: u32 = 1;
        let mut pending_delay: Option<Duration> = None;

        loop {
            if self.is_down() {
                warn!(attempt, wait = "network", "network down, holding attempt until it recovers");
                observer.on_network_wait(true);
                let started = Instant::now();
                let recovered = match &self.network {
                    Some(gate) => gate.wait_for_network(cancel).await,
                    None => true,
                };
                let outage = started.elapsed();
                report.outage_wait += outage;
                observer.on_network_wait(false);
                if !recovered {
                    return cancelled(report);
                }
                info!(
                    attempt,
                    wait = "network",
                    outage_ms = outage.as_millis() as u64,
                    "network recovered, retrying immediately"
                );
                // The outage already served as the delay.
                pending_delay = None;
            }

            if let Some(delay) = pending_delay.take() {
                if delay.is_zero() {
                    debug!(attempt, "retrying without delay");
                } else {
                    observer.on_backoff(attempt, delay);
                    info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        wait = "backoff",
                        "backing off before retry"
                    );
                    let started = Instant::now();
                    let interrupted = tokio::select! {
                        _ = cancel.cancelled() => return cancelled(report),
                        _ = sleep(delay) => false,
                        _ = self.outage() => true,
                    };
                    report.backoff_wait += started.elapsed();
                    if interrupted {
                        info!(attempt, wait = "network", "network went down during backoff");
                        continue;
                    }
                }
            }

            if cancel.is_cancelled() {
                return cancelled(report);
            }

            observer.on_attempt(attempt);
            report.attempts = attempt;
            let started_at = Utc::now();
            let started = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => return cancelled(report),
                r = op(attempt, cancel.clone()) => r,
            };
            let elapsed = started.elapsed();

            let error = match result {
                Ok(value) => {
                    report.history.push(AttemptRecord {
                        attempt,
                        started_at,
                        elapsed,
                        error: None,
                        delay: None,
                    });
                    if attempt > 1 {
                        info!(attempt, "operation succeeded after retry");
                    }
                    return Execution {
                        outcome: Ok(value),
                        report,
                    };
                }
                Err(e) => e,
            };

            let retryable = policy.is_retryable(&error);
            let exhausted = attempt >= max_attempts;
            let delay = (retryable && !exhausted).then(|| policy.next_delay(attempt));
            observer.on_failure(attempt, &error, delay.is_some());
            report.history.push(AttemptRecord {
                attempt,
                started_at,
                elapsed,
                error: Some(error.to_string()),
                delay,
            });

            if !retryable {
                warn!(attempt, category = %error.category, error = %error.message, "non-retryable error, giving up");
                return Execution {
                    outcome: Err(RetryError::NonRetryable {
                        attempt,
                        source: error,
                    }),
                    report,
                };
            }
            if exhausted {
                warn!(attempts = attempt, error = %error, "retry attempts exhausted");
                return Execution {
                    outcome: Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: error,
                    }),
                    report,
                };
            }

            debug!(attempt, max_attempts, error = %error, "attempt failed, will retry");
            pending_delay = delay;
            attempt += 1;
        }
    }

    fn is_down(&self) -> bool {
        self.network
            .as_ref()
            .is_some_and(|gate| gate.current_state().is_down())
    }

    async fn outage(&self) {
        match &self.network {
            Some(gate) => gate.wait_for_outage().await,
            None => std::future::pending().await,
        }
    }
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("network_gated", &self.network.is_some())
            .finish()
    }
}

fn cancelled<T>(report: RetryReport) -> Execution<T> {
    info!(attempts = report.attempts, "retry execution cancelled");
    Execution {
        outcome: Err(RetryError::Cancelled {
            attempts: report.attempts,
        }),
        report,
    }
}
