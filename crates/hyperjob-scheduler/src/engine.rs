use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use hyperjob_core::config::{DependencyTimeoutPolicy, SchedulerConfig};
use hyperjob_core::{Clock, SystemClock};
use hyperjob_retry::{
    category, OperationError, RetryCoordinator, RetryError, RetryObserver, RetryPolicy,
    RetryReport,
};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dependency::{self, DependencyStatus};
use crate::error::{Result, SchedulerError};
use crate::events::JobEvent;
use crate::registry::{Jobs, JobRegistry};
use crate::types::{JobDefinition, JobId, JobOperation, JobRecord, JobState, MAX_PRIORITY};
use crate::window;

/// State shared by the engine loop, its handles and running job tasks.
struct Shared {
    config: SchedulerConfig,
    default_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    registry: JobRegistry,
    events: broadcast::Sender<JobEvent>,
    /// Cancellation tokens of Running jobs.
    running: DashMap<JobId, CancellationToken>,
    running_count: AtomicUsize,
    wake: Notify,
    stopped: AtomicBool,
}

impl Shared {
    fn emit(&self, event: JobEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Cloneable front end for submitting, cancelling and inspecting jobs while
/// the engine loop runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Register a job and return its id. Dispatch happens asynchronously.
    pub fn submit(&self, definition: JobDefinition) -> Result<JobId> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Stopped);
        }
        self.validate(&definition)?;

        let now = self.shared.clock.now();
        let record = self.shared.registry.insert(definition, now);
        info!(job_id = %record.id, name = %record.name, priority = record.priority, "job submitted");
        self.shared.emit(JobEvent::Submitted {
            job_id: record.id,
            name: record.name,
            priority: record.priority,
        });
        self.shared.wake.notify_one();
        Ok(record.id)
    }

    /// Cancel a job. Waiting jobs settle as Cancelled at once; a Running job
    /// settles once its retry coordinator observes the cancellation. Already
    /// terminal jobs are left untouched.
    pub fn cancel(&self, id: &JobId) -> Result<()> {
        let mut jobs = self.shared.registry.lock();
        let state = jobs.state_of(id).ok_or_else(|| SchedulerError::JobNotFound {
            id: id.to_string(),
        })?;

        match state {
            JobState::Running => {
                if let Some(token) = self.shared.running.get(id) {
                    info!(job_id = %id, "cancelling running job");
                    token.cancel();
                }
            }
            s if s.is_terminal() => {
                debug!(job_id = %id, state = %s, "cancel on terminal job ignored");
            }
            _ => {
                jobs.transition(id, JobState::Cancelled);
                if let Some(entry) = jobs.get_mut(id) {
                    entry.record.finished_at = Some(self.shared.clock.now());
                }
                drop(jobs);
                info!(job_id = %id, "job cancelled before dispatch");
                self.shared.emit(JobEvent::Cancelled { job_id: *id });
                // Dependents may now be unsatisfiable.
                self.shared.wake.notify_one();
            }
        }
        Ok(())
    }

    pub fn status(&self, id: &JobId) -> Result<JobRecord> {
        self.shared
            .registry
            .snapshot(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    /// Every job ever submitted, in submission order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.shared.registry.list()
    }

    pub fn running_jobs(&self) -> usize {
        self.shared.running_count.load(Ordering::SeqCst)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Lifecycle events as a stream. Events missed by a lagging consumer are
    /// dropped.
    pub fn event_stream(&self) -> impl Stream<Item = JobEvent> {
        BroadcastStream::new(self.subscribe_events()).filter_map(|e| e.ok())
    }

    fn validate(&self, def: &JobDefinition) -> Result<()> {
        let invalid = |msg: String| Err(SchedulerError::InvalidDefinition(msg));
        if def.name.trim().is_empty() {
            return invalid("job name must not be empty".into());
        }
        if def.priority > MAX_PRIORITY {
            return invalid(format!("priority {} exceeds {MAX_PRIORITY}", def.priority));
        }
        if let Some(policy) = &def.retry_policy {
            policy
                .validate()
                .map_err(|e| SchedulerError::InvalidDefinition(e.to_string()))?;
        }
        for w in &def.windows {
            w.validate()?;
        }
        if let Some(dep) = def
            .dependencies
            .iter()
            .find(|d| !self.shared.registry.contains(&d.job_id))
        {
            return invalid(format!("unknown dependency target {}", dep.job_id));
        }
        Ok(())
    }
}

/// Result of one job task, handed back to the loop.
struct Completion {
    id: JobId,
    outcome: std::result::Result<(), RetryError>,
    report: RetryReport,
    charged: u32,
}

/// Dispatch loop: the single writer of job state transitions.
pub struct SchedulerEngine {
    shared: Arc<Shared>,
    coordinator: RetryCoordinator,
    started: AtomicBool,
}

impl SchedulerEngine {
    pub fn new(config: SchedulerConfig, coordinator: RetryCoordinator) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                default_policy: RetryPolicy::default(),
                clock: Arc::new(SystemClock),
                registry: JobRegistry::new(),
                events,
                running: DashMap::new(),
                running_count: AtomicUsize::new(0),
                wake: Notify::new(),
                stopped: AtomicBool::new(false),
            }),
            coordinator,
            started: AtomicBool::new(false),
        }
    }

    /// Replace the wall clock used for windows and dependency timeouts.
    /// Must be called before any handle is taken.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.clock = clock;
        } else {
            warn!("with_clock called after a handle was taken, ignoring");
        }
        self
    }

    /// Policy for jobs that carry none of their own. Must be called before
    /// any handle is taken.
    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.default_policy = policy;
        } else {
            warn!("with_default_policy called after a handle was taken, ignoring");
        }
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Main loop. Runs dispatch passes on every tick, submission, cancellation
    /// and completion until `cancel` fires, then cancels running jobs and
    /// waits for them to settle.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let shared = &self.shared;
        info!(
            max_concurrent = shared.config.max_concurrent_jobs,
            tick_ms = shared.config.tick_interval_ms,
            "scheduler engine started"
        );

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut ticker =
            tokio::time::interval(Duration::from_millis(shared.config.tick_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = shared.wake.notified() => {}
                Some(done) = done_rx.recv() => self.settle(done),
            }
            self.dispatch_pass(&cancel, &done_tx);
        }

        info!(
            running = self.running_count(),
            jobs = shared.registry.len(),
            "scheduler engine shutting down"
        );
        shared.stopped.store(true, Ordering::SeqCst);
        for token in shared.running.iter() {
            token.cancel();
        }
        while self.running_count() > 0 {
            match done_rx.recv().await {
                Some(done) => self.settle(done),
                None => break,
            }
        }
        self.cancel_waiting();
        info!("scheduler engine stopped");
        Ok(())
    }

    fn running_count(&self) -> usize {
        self.shared.running_count.load(Ordering::SeqCst)
    }

    /// Evaluate every open job once and admit what fits.
    fn dispatch_pass(&self, engine_cancel: &CancellationToken, done_tx: &mpsc::UnboundedSender<Completion>) {
        let shared = &self.shared;
        let now = shared.clock.now();
        let mut events = Vec::new();
        let mut admitted = Vec::new();

        {
            let mut jobs = shared.registry.lock();
            let mut eligible = Vec::new();

            // Submission order: a dependency always precedes its dependents,
            // so failures propagate down a chain within one pass.
            for id in jobs.open_ids() {
                if jobs.state_of(&id) == Some(JobState::Running) {
                    continue;
                }
                if self.gate(&mut jobs, &id, now, &mut events) {
                    eligible.push(id);
                }
            }

            eligible.sort_by_key(|id| {
                let e = jobs.get(id).map(|e| (e.record.priority, e.seq));
                let (priority, seq) = e.unwrap_or_default();
                (std::cmp::Reverse(priority), seq)
            });

            for id in eligible {
                let Some(entry) = jobs.get(&id) else { continue };
                let definition = Arc::clone(&entry.definition);
                let charged = entry.charged_attempts;

                if definition.skip_if_running && jobs.running_named(&definition.name) {
                    jobs.transition(&id, JobState::Skipped);
                    if let Some(entry) = jobs.get_mut(&id) {
                        entry.record.finished_at = Some(now);
                    }
                    info!(job_id = %id, name = %definition.name, "another instance is running, job skipped");
                    events.push(JobEvent::Skipped {
                        job_id: id,
                        reason: format!("{} already running", definition.name),
                    });
                    continue;
                }

                if self.running_count() >= shared.config.max_concurrent_jobs {
                    jobs.transition(&id, JobState::Pending);
                    continue;
                }

                jobs.transition(&id, JobState::Running);
                if let Some(entry) = jobs.get_mut(&id) {
                    entry.record.started_at = Some(now);
                }
                let token = engine_cancel.child_token();
                shared.running.insert(id, token.clone());
                shared.running_count.fetch_add(1, Ordering::SeqCst);
                admitted.push((id, definition, token, charged));
            }
        }

        for event in events {
            shared.emit(event);
        }
        for (id, definition, token, charged) in admitted {
            self.spawn_job(id, definition, token, charged, done_tx.clone());
        }
    }

    /// Apply the dependency resolver and window gate to one waiting job.
    /// Returns true when the job may be dispatched.
    fn gate(&self, jobs: &mut Jobs, id: &JobId, now: chrono::DateTime<chrono::Utc>, events: &mut Vec<JobEvent>) -> bool {
        let Some(entry) = jobs.get(id) else {
            return false;
        };
        let definition = Arc::clone(&entry.definition);
        let status = dependency::evaluate(
            &definition.dependencies,
            |target| jobs.state_of(target),
            entry.waiting_since,
            now,
        );

        match status {
            DependencyStatus::Satisfied => {}
            DependencyStatus::Waiting(targets) => {
                jobs.transition(id, JobState::WaitingOnDependency);
                if let Some(entry) = jobs.get_mut(id) {
                    entry.record.waiting_on = targets;
                }
                return false;
            }
            DependencyStatus::Unsatisfiable(target) => {
                let error = format!("dependency {target} can never be satisfied");
                self.fail_waiting(jobs, id, now, error, events);
                return false;
            }
            DependencyStatus::TimedOut(target) => {
                self.dependency_timed_out(jobs, id, target, &definition, now, events);
                return false;
            }
        }

        if !window::is_open(&definition.windows, now) {
            let next = window::next_opening(&definition.windows, now);
            if jobs.state_of(id) != Some(JobState::WaitingOnWindow) {
                debug!(job_id = %id, next_window = ?next, "outside every time window");
            }
            jobs.transition(id, JobState::WaitingOnWindow);
            if let Some(entry) = jobs.get_mut(id) {
                entry.record.next_window = next;
            }
            return false;
        }
        true
    }

    fn dependency_timed_out(
        &self,
        jobs: &mut Jobs,
        id: &JobId,
        target: JobId,
        definition: &JobDefinition,
        now: chrono::DateTime<chrono::Utc>,
        events: &mut Vec<JobEvent>,
    ) {
        let error = format!("dependency {target} did not settle in time");
        let max_attempts = self.policy_for(definition).max_attempts.max(1);

        if self.shared.config.dependency_timeout == DependencyTimeoutPolicy::Retry {
            if let Some(entry) = jobs.get_mut(id) {
                entry.charged_attempts += 1;
                entry.record.attempts = entry.charged_attempts;
                entry.record.last_error = Some(error.clone());
                if entry.charged_attempts < max_attempts {
                    entry.waiting_since = now;
                    warn!(job_id = %id, %target, attempt = entry.charged_attempts, "dependency timed out, waiting again");
                    return;
                }
            }
        }
        self.fail_waiting(jobs, id, now, error, events);
    }

    /// Fail a job that never started.
    fn fail_waiting(
        &self,
        jobs: &mut Jobs,
        id: &JobId,
        now: chrono::DateTime<chrono::Utc>,
        error: String,
        events: &mut Vec<JobEvent>,
    ) {
        if !jobs.transition(id, JobState::Failed) {
            return;
        }
        let Some(entry) = jobs.get_mut(id) else { return };
        entry.record.finished_at = Some(now);
        entry.record.last_error = Some(error.clone());
        warn!(job_id = %id, %error, "job failed before dispatch");
        events.push(JobEvent::Failed {
            job_id: *id,
            attempts: entry.record.attempts,
            error,
        });
    }

    fn policy_for(&self, definition: &JobDefinition) -> RetryPolicy {
        definition
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.shared.default_policy.clone())
    }

    fn spawn_job(
        &self,
        id: JobId,
        definition: Arc<JobDefinition>,
        token: CancellationToken,
        charged: u32,
        done_tx: mpsc::UnboundedSender<Completion>,
    ) {
        let mut policy = self.policy_for(&definition);
        // Attempts charged while waiting on dependencies come off the budget.
        policy.max_attempts = policy.max_attempts.saturating_sub(charged).max(1);
        let coordinator = self.coordinator.clone();
        let progress = JobProgress {
            id,
            offset: charged,
            shared: Arc::clone(&self.shared),
        };

        info!(job_id = %id, name = %definition.name, "dispatching job");
        tokio::spawn(async move {
            let operation = Arc::clone(&definition.operation);
            let exec = coordinator
                .execute_observed(&policy, &token, &progress, |attempt, cancel| {
                    guarded_attempt(id, Arc::clone(&operation), attempt, cancel)
                })
                .await;
            let _ = done_tx.send(Completion {
                id,
                outcome: exec.outcome,
                report: exec.report,
                charged,
            });
        });
    }

    /// Write a finished job's outcome back into the registry.
    fn settle(&self, done: Completion) {
        let shared = &self.shared;
        shared.running.remove(&done.id);
        shared.running_count.fetch_sub(1, Ordering::SeqCst);

        let (state, error) = match &done.outcome {
            Ok(()) => (JobState::Succeeded, None),
            Err(e) if e.is_cancelled() => (JobState::Cancelled, None),
            Err(e) => {
                let message = e
                    .last_error()
                    .map_or_else(|| e.to_string(), ToString::to_string);
                (JobState::Failed, Some(message))
            }
        };
        let attempts = done.charged + done.report.attempts;

        {
            let mut jobs = shared.registry.lock();
            jobs.transition(&done.id, state);
            if let Some(entry) = jobs.get_mut(&done.id) {
                let record = &mut entry.record;
                record.finished_at = Some(shared.clock.now());
                record.attempts = attempts;
                record.waiting_for_network = false;
                if error.is_some() {
                    record.last_error = error.clone();
                }
            }
        }

        let event = match state {
            JobState::Succeeded => {
                info!(job_id = %done.id, attempts, "job succeeded");
                JobEvent::Succeeded {
                    job_id: done.id,
                    attempts,
                }
            }
            JobState::Cancelled => {
                info!(job_id = %done.id, attempts, "job cancelled");
                JobEvent::Cancelled { job_id: done.id }
            }
            _ => {
                let error = error.unwrap_or_default();
                warn!(job_id = %done.id, attempts, %error, "job failed");
                JobEvent::Failed {
                    job_id: done.id,
                    attempts,
                    error,
                }
            }
        };
        shared.emit(event);
    }

    /// On shutdown, jobs that never started settle as Cancelled.
    fn cancel_waiting(&self) {
        let now = self.shared.clock.now();
        let mut cancelled = Vec::new();
        {
            let mut jobs = self.shared.registry.lock();
            for id in jobs.open_ids() {
                if jobs.transition(&id, JobState::Cancelled) {
                    if let Some(entry) = jobs.get_mut(&id) {
                        entry.record.finished_at = Some(now);
                    }
                    cancelled.push(id);
                }
            }
        }
        for job_id in cancelled {
            self.shared.emit(JobEvent::Cancelled { job_id });
        }
    }
}

/// Feeds retry progress into the job's record and the event stream.
struct JobProgress {
    id: JobId,
    /// Attempts charged before dispatch.
    offset: u32,
    shared: Arc<Shared>,
}

impl JobProgress {
    fn update(&self, f: impl FnOnce(&mut JobRecord)) {
        let mut jobs = self.shared.registry.lock();
        if let Some(entry) = jobs.get_mut(&self.id) {
            f(&mut entry.record);
        }
    }
}

/// Run one attempt, turning a panic in the operation into a permanent
/// failure of that attempt.
async fn guarded_attempt(
    id: JobId,
    operation: JobOperation,
    attempt: u32,
    cancel: CancellationToken,
) -> std::result::Result<(), OperationError> {
    let call = std::panic::catch_unwind(AssertUnwindSafe(|| (operation)(attempt, cancel)));
    let outcome = match call {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(payload) => Err(payload),
    };
    outcome.unwrap_or_else(|_| {
        warn!(job_id = %id, attempt, "job operation panicked");
        Err(OperationError::permanent(category::IO, "job operation panicked"))
    })
}

impl RetryObserver for JobProgress {
    fn on_attempt(&self, attempt: u32) {
        let attempts = self.offset + attempt;
        self.update(|r| r.attempts = attempts);
        self.shared.emit(JobEvent::Started {
            job_id: self.id,
            attempt: attempts,
        });
    }

    fn on_failure(&self, _attempt: u32, error: &OperationError, _will_retry: bool) {
        let message = error.to_string();
        self.update(|r| r.last_error = Some(message));
    }

    fn on_backoff(&self, next_attempt: u32, delay: Duration) {
        self.shared.emit(JobEvent::Retrying {
            job_id: self.id,
            attempt: self.offset + next_attempt,
            delay_ms: delay.as_millis() as u64,
        });
    }

    fn on_network_wait(&self, waiting: bool) {
        self.update(|r| r.waiting_for_network = waiting);
        self.shared.emit(JobEvent::NetworkWait {
            job_id: self.id,
            waiting,
        });
    }
}
