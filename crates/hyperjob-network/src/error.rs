use thiserror::Error;

/// Errors that can occur within the network monitor.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// `start` was called on a monitor that is already running.
    #[error("network monitor already started")]
    AlreadyStarted,

    /// The caller's cancellation fired before the network came back.
    #[error("wait for network cancelled")]
    Cancelled,

    /// The monitor was stopped (or never started) while the caller waited.
    #[error("network monitor stopped")]
    Stopped,

    /// Reading interface state from sysfs failed.
    #[error("interface statistics unavailable: {0}")]
    Stats(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
