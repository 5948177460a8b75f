mod common;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Harness;
use hyperjob_core::BackoffStrategy;
use hyperjob_retry::{OperationError, RetryPolicy};
use hyperjob_scheduler::{JobDefinition, JobEvent, JobState};
use tokio::sync::Notify;
use tokio_stream::StreamExt;

fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>) -> JobDefinition {
    let log = Arc::clone(log);
    let label = name.to_string();
    JobDefinition::new(name, move |_, _| {
        log.lock().unwrap().push(label.clone());
        async { Ok(()) }
    })
}

#[tokio::test]
async fn higher_priority_dispatches_first_under_ceiling_of_one() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut h = Harness::new(1);
    let low = h.handle.submit(recording("low", &log).with_priority(50)).unwrap();
    let high = h.handle.submit(recording("high", &log).with_priority(90)).unwrap();
    h.start();

    h.wait_for(&low, JobState::Succeeded).await;
    h.wait_for(&high, JobState::Succeeded).await;
    assert_eq!(*log.lock().unwrap(), vec!["high", "low"]);
    h.shutdown().await;
}

#[tokio::test]
async fn equal_priority_keeps_submission_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut h = Harness::new(1);
    let ids: Vec<_> = ["first", "second", "third"]
        .iter()
        .map(|n| h.handle.submit(recording(n, &log)).unwrap())
        .collect();
    h.start();

    for id in &ids {
        h.wait_for(id, JobState::Succeeded).await;
    }
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    h.shutdown().await;
}

#[tokio::test]
async fn concurrency_ceiling_is_respected() {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut h = Harness::new(2);

    let ids: Vec<_> = (0..6)
        .map(|i| {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            let def = JobDefinition::new(format!("job-{i}"), move |_, _| {
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            });
            h.handle.submit(def).unwrap()
        })
        .collect();
    h.start();

    for id in &ids {
        h.wait_for(id, JobState::Succeeded).await;
    }
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(h.handle.running_jobs(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn skip_if_running_never_invokes_second_instance() {
    let invocations = Arc::new(AtomicU32::new(0));
    let release = Arc::new(Notify::new());
    let export = |invocations: Arc<AtomicU32>, release: Arc<Notify>| {
        JobDefinition::new("export", move |_, _| {
            invocations.fetch_add(1, Ordering::SeqCst);
            let release = Arc::clone(&release);
            async move {
                release.notified().await;
                Ok(())
            }
        })
        .skip_if_running(true)
    };

    let mut h = Harness::new(4);
    h.start();
    let first = h
        .handle
        .submit(export(invocations.clone(), release.clone()))
        .unwrap();
    h.wait_for(&first, JobState::Running).await;

    let second = h
        .handle
        .submit(export(invocations.clone(), release.clone()))
        .unwrap();
    let skipped = h.wait_for(&second, JobState::Skipped).await;
    assert_eq!(skipped.attempts, 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    release.notify_one();
    h.wait_for(&first, JobState::Succeeded).await;
    h.shutdown().await;
}

#[tokio::test]
async fn retries_are_counted_and_announced() {
    let mut h = Harness::new(1);
    let mut events = h.handle.event_stream();
    let policy = RetryPolicy::new(
        3,
        BackoffStrategy::Linear,
        Duration::from_millis(5),
        Duration::from_millis(50),
    )
    .without_jitter();
    let id = h
        .handle
        .submit(
            JobDefinition::new("flaky", |attempt, _| async move {
                if attempt < 3 {
                    Err(OperationError::new("network", "connection reset"))
                } else {
                    Ok(())
                }
            })
            .with_retry_policy(policy),
        )
        .unwrap();
    h.start();

    let done = h.wait_for(&id, JobState::Succeeded).await;
    assert_eq!(done.attempts, 3);
    assert!(done.finished_at >= done.started_at);

    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
        let terminal = event.is_terminal();
        seen.push(event);
        if terminal {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            JobEvent::Submitted { job_id: id, name: "flaky".into(), priority: 50 },
            JobEvent::Started { job_id: id, attempt: 1 },
            JobEvent::Retrying { job_id: id, attempt: 2, delay_ms: 5 },
            JobEvent::Started { job_id: id, attempt: 2 },
            JobEvent::Retrying { job_id: id, attempt: 3, delay_ms: 10 },
            JobEvent::Started { job_id: id, attempt: 3 },
            JobEvent::Succeeded { job_id: id, attempts: 3 },
        ]
    );
    h.shutdown().await;
}

#[tokio::test]
async fn non_retryable_failure_is_recorded() {
    let mut h = Harness::new(1);
    let policy = RetryPolicy::default().never_retry_on(["invalid_input"]);
    let id = h
        .handle
        .submit(
            JobDefinition::new("convert", |_, _| async {
                Err(OperationError::new("invalid_input", "unsupported disk format"))
            })
            .with_retry_policy(policy),
        )
        .unwrap();
    h.start();

    let failed = h.wait_for(&id, JobState::Failed).await;
    assert_eq!(failed.attempts, 1);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("invalid_input: unsupported disk format")
    );
    h.shutdown().await;
}

#[tokio::test]
async fn exhausted_job_keeps_the_operation_error() {
    let mut h = Harness::new(1);
    let policy = RetryPolicy::new(
        2,
        BackoffStrategy::Linear,
        Duration::from_millis(1),
        Duration::from_millis(5),
    )
    .without_jitter();
    let id = h
        .handle
        .submit(
            JobDefinition::new("fetch", |_, _| async {
                Err(OperationError::new("timeout", "upstream took too long"))
            })
            .with_retry_policy(policy),
        )
        .unwrap();
    h.start();

    let failed = h.wait_for(&id, JobState::Failed).await;
    assert_eq!(failed.attempts, 2);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("timeout: upstream took too long")
    );
    h.shutdown().await;
}

#[tokio::test]
async fn panic_on_a_later_attempt_keeps_the_attempt_count() {
    let mut h = Harness::new(1);
    let mut events = h.handle.event_stream();
    let policy = RetryPolicy::new(
        5,
        BackoffStrategy::Linear,
        Duration::from_millis(1),
        Duration::from_millis(5),
    )
    .without_jitter();
    let id = h
        .handle
        .submit(
            JobDefinition::new("crashy", |attempt, _| async move {
                if attempt < 3 {
                    return Err(OperationError::new("network", "connection reset"));
                }
                panic!("corrupt state on attempt {attempt}");
            })
            .with_retry_policy(policy),
        )
        .unwrap();
    h.start();

    let failed = h.wait_for(&id, JobState::Failed).await;
    assert_eq!(failed.attempts, 3);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("io: job operation panicked")
    );

    let mut terminal = None;
    while let Some(event) = events.next().await {
        if event.job_id() == id && event.is_terminal() {
            terminal = Some(event);
            break;
        }
    }
    assert_eq!(
        terminal,
        Some(JobEvent::Failed {
            job_id: id,
            attempts: 3,
            error: "io: job operation panicked".into(),
        })
    );
    h.shutdown().await;
}

#[tokio::test]
async fn panic_before_the_future_is_built_fails_the_job() {
    let mut h = Harness::new(1);
    let id = h
        .handle
        .submit(JobDefinition::new("eager", |attempt, _| {
            if attempt > 0 {
                panic!("bad arguments");
            }
            async { Ok(()) }
        }))
        .unwrap();
    h.start();

    let failed = h.wait_for(&id, JobState::Failed).await;
    assert_eq!(failed.attempts, 1);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("io: job operation panicked")
    );
    assert_eq!(h.handle.running_jobs(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_running_job_settles_cancelled() {
    let mut h = Harness::new(1);
    let id = h
        .handle
        .submit(JobDefinition::new("upload", |_, cancel| async move {
            cancel.cancelled().await;
            Err(OperationError::new("cancelled", "stopped by caller"))
        }))
        .unwrap();
    h.start();
    h.wait_for(&id, JobState::Running).await;

    h.handle.cancel(&id).unwrap();
    let record = h.wait_for(&id, JobState::Cancelled).await;
    assert!(record.finished_at.is_some());
    assert_eq!(h.handle.running_jobs(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_running_and_waiting_jobs() {
    let mut h = Harness::new(1);
    let slow = || {
        JobDefinition::new("slow", |_, _| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
    };
    let running = h.handle.submit(slow()).unwrap();
    let queued = h.handle.submit(slow()).unwrap();
    h.start();
    h.wait_for(&running, JobState::Running).await;

    let handle = h.handle.clone();
    h.shutdown().await;

    assert_eq!(handle.status(&running).unwrap().state, JobState::Cancelled);
    assert_eq!(handle.status(&queued).unwrap().state, JobState::Cancelled);
    assert_eq!(handle.running_jobs(), 0);
    assert!(handle.submit(slow()).is_err());
}

#[tokio::test]
async fn list_reports_every_job_in_submission_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut h = Harness::new(2);
    let a = h.handle.submit(recording("a", &log).with_priority(10)).unwrap();
    let b = h.handle.submit(recording("b", &log).with_priority(99)).unwrap();
    h.start();
    h.wait_for(&a, JobState::Succeeded).await;
    h.wait_for(&b, JobState::Succeeded).await;

    let ids: Vec<_> = h.handle.list().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a, b]);
    h.shutdown().await;
}
