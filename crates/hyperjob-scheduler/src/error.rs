use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job definition was rejected at submission.
    #[error("Invalid job definition: {0}")]
    InvalidDefinition(String),

    /// No job with the given ID exists in the registry.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// `run` was called on an engine that is already running.
    #[error("Scheduler engine already running")]
    AlreadyRunning,

    /// The engine has shut down and accepts no new work.
    #[error("Scheduler stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
