//! In-memory job registry behind a single mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::{JobDefinition, JobId, JobRecord, JobState};

/// One registered job: its definition plus the mutable record.
#[derive(Debug)]
pub(crate) struct Entry {
    pub definition: Arc<JobDefinition>,
    pub record: JobRecord,
    /// Submission order, used as the priority tie-break.
    pub seq: u64,
    /// Start of the current dependency wait.
    pub waiting_since: DateTime<Utc>,
    /// Attempts already charged by dependency timeouts.
    pub charged_attempts: u32,
}

#[derive(Debug, Default)]
pub(crate) struct Jobs {
    entries: HashMap<JobId, Entry>,
    order: Vec<JobId>,
    next_seq: u64,
}

impl Jobs {
    pub fn get(&self, id: &JobId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &JobId) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    pub fn state_of(&self, id: &JobId) -> Option<JobState> {
        self.entries.get(id).map(|e| e.record.state)
    }

    /// Ids of every job not yet terminal, in submission order.
    pub fn open_ids(&self) -> Vec<JobId> {
        self.order
            .iter()
            .filter(|id| self.state_of(id).is_some_and(|s| !s.is_terminal()))
            .copied()
            .collect()
    }

    pub fn running_named(&self, name: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.record.state == JobState::Running && e.record.name == name)
    }

    /// Move a job to `next`. Illegal moves are refused and logged.
    pub fn transition(&mut self, id: &JobId, next: JobState) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        let current = entry.record.state;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(job_id = %id, from = %current, to = %next, "refusing illegal job state transition");
            return false;
        }
        entry.record.state = next;
        if next != JobState::WaitingOnWindow {
            entry.record.next_window = None;
        }
        if next != JobState::WaitingOnDependency {
            entry.record.waiting_on.clear();
        }
        true
    }
}

/// Holds every submitted job for the lifetime of the process.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<Jobs>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().expect("job registry poisoned")
    }

    pub(crate) fn insert(&self, definition: JobDefinition, now: DateTime<Utc>) -> JobRecord {
        let id = JobId::new();
        let record = JobRecord::new(id, &definition, now);
        let mut jobs = self.lock();
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.entries.insert(
            id,
            Entry {
                definition: Arc::new(definition),
                record: record.clone(),
                seq,
                waiting_since: now,
                charged_attempts: 0,
            },
        );
        jobs.order.push(id);
        record
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn snapshot(&self, id: &JobId) -> Option<JobRecord> {
        self.lock().get(id).map(|e| e.record.clone())
    }

    /// Every record, in submission order.
    pub fn list(&self) -> Vec<JobRecord> {
        let jobs = self.lock();
        jobs.order
            .iter()
            .filter_map(|id| jobs.get(id))
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
