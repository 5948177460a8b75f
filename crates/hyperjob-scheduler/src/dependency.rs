//! Dependency resolver: decides whether a job's upstream jobs allow it to run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{JobId, JobState};

/// Terminal state a dependency must reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyCondition {
    #[default]
    Succeeded,
    Failed,
    /// Succeeded or Failed.
    CompletedAny,
}

impl DependencyCondition {
    fn accepts(&self, state: JobState) -> bool {
        match self {
            DependencyCondition::Succeeded => state == JobState::Succeeded,
            DependencyCondition::Failed => state == JobState::Failed,
            DependencyCondition::CompletedAny => {
                matches!(state, JobState::Succeeded | JobState::Failed)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub job_id: JobId,
    #[serde(default)]
    pub condition: DependencyCondition,
    /// Measured from when the dependent started waiting. `None` waits forever.
    #[serde(default)]
    pub wait_timeout: Option<Duration>,
}

impl Dependency {
    pub fn on(job_id: JobId, condition: DependencyCondition) -> Self {
        Self {
            job_id,
            condition,
            wait_timeout: None,
        }
    }

    pub fn succeeded(job_id: JobId) -> Self {
        Self::on(job_id, DependencyCondition::Succeeded)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    Satisfied,
    /// Still waiting on these targets.
    Waiting(Vec<JobId>),
    /// The target is unknown or did not settle within its wait timeout.
    TimedOut(JobId),
    /// The target settled in a state that can never meet the condition.
    Unsatisfiable(JobId),
}

/// Evaluate every dependency of one job.
///
/// `state_of` looks up a target's current state; `waiting_since` is when the
/// dependent started waiting (its submission, or the last charged timeout).
pub fn evaluate(
    dependencies: &[Dependency],
    state_of: impl Fn(&JobId) -> Option<JobState>,
    waiting_since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DependencyStatus {
    let waited = (now - waiting_since).to_std().unwrap_or_default();
    let mut pending = Vec::new();

    for dep in dependencies {
        let Some(state) = state_of(&dep.job_id) else {
            return DependencyStatus::TimedOut(dep.job_id);
        };
        if state.is_terminal() {
            if dep.condition.accepts(state) {
                continue;
            }
            return DependencyStatus::Unsatisfiable(dep.job_id);
        }
        if dep.wait_timeout.is_some_and(|limit| waited >= limit) {
            return DependencyStatus::TimedOut(dep.job_id);
        }
        pending.push(dep.job_id);
    }

    if pending.is_empty() {
        DependencyStatus::Satisfied
    } else {
        DependencyStatus::Waiting(pending)
    }
}
