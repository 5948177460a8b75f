//! Synthetic workload: submits a batch of jobs with random priorities,
//! short dependency chains and transient failures, then streams the
//! lifecycle events as JSON lines until every job has settled.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use hyperjob_core::config::HyperjobConfig;
use hyperjob_network::NetworkMonitor;
use hyperjob_retry::{category, OperationError, RetryCoordinator, RetryPolicy};
use hyperjob_scheduler::{
    Dependency, DependencyCondition, JobDefinition, JobId, SchedulerEngine, SchedulerHandle,
};
use rand::Rng;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Options {
    pub jobs: usize,
    pub failure_rate: f64,
    pub work: Duration,
    pub offline: bool,
}

pub async fn run(config: HyperjobConfig, opts: Options) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let mut coordinator = RetryCoordinator::new();
    let monitor = if opts.offline {
        None
    } else {
        let monitor = NetworkMonitor::new(config.network.clone());
        monitor.start(cancel.child_token()).await?;
        info!(state = %monitor.current_state(), "network monitor started");
        coordinator = coordinator.with_network(Arc::new(monitor.clone()));
        Some(monitor)
    };

    let engine = SchedulerEngine::new(config.scheduler.clone(), coordinator)
        .with_default_policy(RetryPolicy::from(&config.retry));
    let handle = engine.handle();
    let mut events = handle.event_stream();

    let engine_task = {
        let cancel = cancel.child_token();
        tokio::spawn(async move { engine.run(cancel).await })
    };

    let ids = submit_workload(&handle, &opts)?;
    info!(jobs = ids.len(), "workload submitted");

    let mut settled = HashSet::new();
    while settled.len() < ids.len() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break };
                if event.is_terminal() {
                    settled.insert(event.job_id());
                }
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    cancel.cancel();
    engine_task.await??;
    if let Some(monitor) = monitor {
        monitor.stop().await;
    }

    let mut summary: BTreeMap<String, usize> = BTreeMap::new();
    for record in handle.list() {
        *summary.entry(record.state.to_string()).or_default() += 1;
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn submit_workload(handle: &SchedulerHandle, opts: &Options) -> anyhow::Result<Vec<JobId>> {
    let mut rng = rand::thread_rng();
    let mut ids: Vec<JobId> = Vec::with_capacity(opts.jobs);

    for i in 0..opts.jobs {
        let mut definition = synthetic_job(format!("job-{i}"), opts.failure_rate, opts.work)
            .with_priority(rng.gen_range(0..=100));
        // Every fourth job follows its predecessor whatever the outcome.
        if i % 4 == 3 {
            if let Some(prev) = ids.last() {
                definition =
                    definition.depends_on(Dependency::on(*prev, DependencyCondition::CompletedAny));
            }
        }
        ids.push(handle.submit(definition)?);
    }
    Ok(ids)
}

fn synthetic_job(name: String, failure_rate: f64, work: Duration) -> JobDefinition {
    JobDefinition::new(name, move |_, cancel| {
        let fail = rand::thread_rng().gen_bool(failure_rate);
        async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(OperationError::new(category::TIMEOUT, "cancelled mid-attempt"));
                }
                _ = tokio::time::sleep(work) => {}
            }
            if fail {
                Err(OperationError::new(category::NETWORK, "simulated connection reset"))
            } else {
                Ok(())
            }
        }
    })
}
