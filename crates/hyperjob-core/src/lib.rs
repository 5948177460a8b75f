//! `hyperjob-core` — configuration, clock and error types shared by every
//! hyperjob crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{HyperjobError, Result};
pub use types::BackoffStrategy;
