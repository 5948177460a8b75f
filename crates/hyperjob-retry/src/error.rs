use std::io;

use thiserror::Error;

/// Well-known error categories. Policies may name any string; these are the
/// ones produced by the built-in conversions.
pub mod category {
    pub const NETWORK: &str = "network";
    pub const TIMEOUT: &str = "timeout";
    pub const RESOURCE_EXHAUSTED: &str = "resource_exhausted";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const NOT_FOUND: &str = "not_found";
    pub const IO: &str = "io";
}

/// Failure of a single attempt, as reported by the operation.
///
/// The category is matched against the policy's allow/deny lists. An
/// explicit retryability marker overrides both lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category}: {message}")]
pub struct OperationError {
    pub category: String,
    pub message: String,
    retryable: Option<bool>,
}

impl OperationError {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            retryable: None,
        }
    }

    /// Never retried, whatever the policy says.
    pub fn permanent(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: Some(false),
            ..Self::new(category, message)
        }
    }

    /// Always retried while attempts remain, whatever the policy says.
    pub fn transient(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: Some(true),
            ..Self::new(category, message)
        }
    }

    pub fn retryable_override(&self) -> Option<bool> {
        self.retryable
    }
}

impl From<io::Error> for OperationError {
    fn from(e: io::Error) -> Self {
        use io::ErrorKind::*;
        let category = match e.kind() {
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | AddrNotAvailable | BrokenPipe => category::NETWORK,
            TimedOut => category::TIMEOUT,
            PermissionDenied => category::PERMISSION_DENIED,
            InvalidInput | InvalidData => category::INVALID_INPUT,
            NotFound => category::NOT_FOUND,
            OutOfMemory => category::RESOURCE_EXHAUSTED,
            _ => category::IO,
        };
        Self::new(category, e.to_string())
    }
}

/// Final outcome of a retried execution that did not succeed.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// The caller's cancellation fired, during an attempt or a wait.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    /// The policy classified the error as not retryable.
    #[error("non-retryable error on attempt {attempt}: {source}")]
    NonRetryable {
        attempt: u32,
        #[source]
        source: OperationError,
    },

    /// Every attempt failed; carries the last error.
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: OperationError,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Cancelled { attempts } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
            RetryError::NonRetryable { attempt, .. } => *attempt,
        }
    }

    pub fn last_error(&self) -> Option<&OperationError> {
        match self {
            RetryError::Cancelled { .. } => None,
            RetryError::NonRetryable { source, .. } | RetryError::Exhausted { source, .. } => {
                Some(source)
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}
