//! `hyperjob-retry` — bounded retries with backoff, jitter and selective
//! retryability, paused while the network is known to be down.
//!
//! The coordinator consults a [`NetworkGate`] before every attempt. While the
//! gate reports Down it neither sleeps the backoff delay nor spends an
//! attempt; it waits for recovery and then retries at once.

pub mod coordinator;
pub mod error;
pub mod gate;
pub mod observer;
pub mod policy;

pub use coordinator::{AttemptRecord, Execution, RetryCoordinator, RetryReport};
pub use error::{category, OperationError, RetryError};
pub use gate::NetworkGate;
pub use observer::{NoopObserver, RetryObserver};
pub use policy::RetryPolicy;
