use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyperjob_retry::{OperationError, RetryPolicy};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dependency::Dependency;
use crate::window::TimeWindow;

pub const MAX_PRIORITY: u8 = 100;
pub const DEFAULT_PRIORITY: u8 = 50;

/// Unique, time-ordered job identifier (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The caller-supplied unit of work: `(attempt, cancellation) -> result`.
pub type JobOperation =
    Arc<dyn Fn(u32, CancellationToken) -> BoxFuture<'static, Result<(), OperationError>> + Send + Sync>;

/// What to run and under which constraints.
#[derive(Clone)]
pub struct JobDefinition {
    /// Human-readable label. Jobs sharing a name count as instances of the
    /// same definition for "skip if running".
    pub name: String,
    /// 0..=100, higher runs first.
    pub priority: u8,
    pub dependencies: Vec<Dependency>,
    /// Falls back to the scheduler's default policy when `None`.
    pub retry_policy: Option<RetryPolicy>,
    /// Empty means always allowed.
    pub windows: Vec<TimeWindow>,
    pub skip_if_running: bool,
    pub operation: JobOperation,
}

impl JobDefinition {
    pub fn new<F, Fut>(name: impl Into<String>, operation: F) -> Self
    where
        F: Fn(u32, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            dependencies: Vec::new(),
            retry_policy: None,
            windows: Vec::new(),
            skip_if_running: false,
            operation: Arc::new(move |attempt: u32, cancel: CancellationToken| {
                operation(attempt, cancel).boxed()
            }),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.windows.push(window);
        self
    }

    pub fn skip_if_running(mut self, skip: bool) -> Self {
        self.skip_if_running = skip;
        self
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("retry_policy", &self.retry_policy)
            .field("windows", &self.windows)
            .field("skip_if_running", &self.skip_if_running)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible, waiting for a concurrency slot.
    Pending,
    WaitingOnDependency,
    WaitingOnWindow,
    /// Handed to the retry coordinator.
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Not run because another instance was running.
    Skipped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled | JobState::Skipped
        )
    }

    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            JobState::Pending | JobState::WaitingOnDependency | JobState::WaitingOnWindow
        )
    }

    /// Waiting states may move among themselves; Running and terminal
    /// states never move backwards.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            s if s.is_waiting() => next != *s && next != JobState::Succeeded,
            JobState::Running => matches!(
                next,
                JobState::Succeeded | JobState::Failed | JobState::Cancelled
            ),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::WaitingOnDependency => "waiting_on_dependency",
            JobState::WaitingOnWindow => "waiting_on_window",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time snapshot of a job, as returned by `status` and `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub priority: u8,
    pub state: JobState,
    /// Attempts spent so far, including dependency timeouts charged under
    /// the `retry` dependency timeout policy.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// True while the retry coordinator holds the job for a network outage.
    pub waiting_for_network: bool,
    /// Next window opening while the job is `waiting_on_window`.
    pub next_window: Option<DateTime<Utc>>,
    /// Dependencies not yet satisfied while `waiting_on_dependency`.
    pub waiting_on: Vec<JobId>,
}

impl JobRecord {
    pub(crate) fn new(id: JobId, definition: &JobDefinition, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: definition.name.clone(),
            priority: definition.priority,
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
            submitted_at: now,
            started_at: None,
            finished_at: None,
            waiting_for_network: false,
            next_window: None,
            waiting_on: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_move() {
        for s in [
            JobState::Succeeded,
            JobState::Failed,
            JobState::Cancelled,
            JobState::Skipped,
        ] {
            assert!(s.is_terminal());
            assert!(!s.can_transition_to(JobState::Pending));
            assert!(!s.can_transition_to(JobState::Running));
        }
    }

    #[test]
    fn running_only_settles() {
        assert!(JobState::Running.can_transition_to(JobState::Succeeded));
        assert!(JobState::Running.can_transition_to(JobState::Cancelled));
        assert!(!JobState::Running.can_transition_to(JobState::Pending));
        assert!(!JobState::Running.can_transition_to(JobState::Skipped));
    }

    #[test]
    fn waiting_states_may_alternate() {
        assert!(JobState::WaitingOnWindow.can_transition_to(JobState::WaitingOnDependency));
        assert!(JobState::WaitingOnDependency.can_transition_to(JobState::Pending));
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::Skipped));
        assert!(!JobState::Pending.can_transition_to(JobState::Succeeded));
    }

    #[test]
    fn job_id_round_trips_through_display() {
        let a = JobId::new();
        assert_ne!(a, JobId::new());
        assert_eq!(a.to_string().parse::<JobId>().unwrap(), a);
    }

    #[test]
    fn builder_sets_constraints() {
        let def = JobDefinition::new("export", |_, _| async { Ok(()) })
            .with_priority(90)
            .skip_if_running(true);
        assert_eq!(def.name, "export");
        assert_eq!(def.priority, 90);
        assert!(def.skip_if_running);
        assert!(def.retry_policy.is_none());
    }
}
