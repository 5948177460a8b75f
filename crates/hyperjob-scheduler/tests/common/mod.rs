#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hyperjob_core::config::SchedulerConfig;
use hyperjob_core::Clock;
use hyperjob_retry::{RetryCoordinator, RetryPolicy};
use hyperjob_scheduler::{JobId, JobRecord, JobState, SchedulerEngine, SchedulerHandle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub handle: SchedulerHandle,
    pub cancel: CancellationToken,
    engine: Option<SchedulerEngine>,
    task: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self::build(max_concurrent_jobs, RetryCoordinator::new(), None, SchedulerConfig::default())
    }

    pub fn build(
        max_concurrent_jobs: usize,
        coordinator: RetryCoordinator,
        clock: Option<Arc<dyn Clock>>,
        base: SchedulerConfig,
    ) -> Self {
        let config = SchedulerConfig {
            max_concurrent_jobs,
            tick_interval_ms: 10,
            ..base
        };
        let quick = RetryPolicy::new(
            1,
            hyperjob_core::BackoffStrategy::Linear,
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        let mut engine = SchedulerEngine::new(config, coordinator).with_default_policy(quick);
        if let Some(clock) = clock {
            engine = engine.with_clock(clock);
        }
        Self {
            handle: engine.handle(),
            cancel: CancellationToken::new(),
            engine: Some(engine),
            task: None,
        }
    }

    /// Start the dispatch loop. Jobs submitted before this are all visible
    /// to the first pass.
    pub fn start(&mut self) {
        if let Some(engine) = self.engine.take() {
            let cancel = self.cancel.clone();
            self.task = Some(tokio::spawn(async move {
                engine.run(cancel).await.unwrap();
            }));
        }
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.unwrap();
        }
    }

    pub async fn wait_for(&self, id: &JobId, state: JobState) -> JobRecord {
        self.wait_until(id, |r| r.state == state).await
    }

    pub async fn wait_until(&self, id: &JobId, pred: impl Fn(&JobRecord) -> bool) -> JobRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let record = self.handle.status(id).unwrap();
            if pred(&record) {
                return record;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {}",
                record.state
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
