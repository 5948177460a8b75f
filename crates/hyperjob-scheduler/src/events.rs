use serde::Serialize;

use crate::types::JobId;

/// Job lifecycle notification, fanned out over a broadcast channel for
/// downstream notification layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted {
        job_id: JobId,
        name: String,
        priority: u8,
    },
    /// An attempt is about to run.
    Started { job_id: JobId, attempt: u32 },
    /// An attempt failed and the next one starts after `delay_ms`.
    Retrying {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
    },
    /// The job is held (`waiting = true`) or released by a network outage.
    NetworkWait { job_id: JobId, waiting: bool },
    Succeeded { job_id: JobId, attempts: u32 },
    Failed {
        job_id: JobId,
        attempts: u32,
        error: String,
    },
    Cancelled { job_id: JobId },
    Skipped { job_id: JobId, reason: String },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Submitted { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Retrying { job_id, .. }
            | JobEvent::NetworkWait { job_id, .. }
            | JobEvent::Succeeded { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id }
            | JobEvent::Skipped { job_id, .. } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Succeeded { .. }
                | JobEvent::Failed { .. }
                | JobEvent::Cancelled { .. }
                | JobEvent::Skipped { .. }
        )
    }
}
