//! `hyperjob-scheduler` — in-memory priority scheduler for retried jobs.
//!
//! # Overview
//!
//! Jobs are held in a [`registry::JobRegistry`]. The [`engine::SchedulerEngine`]
//! loop wakes on a fixed tick, on every submission and on every completion,
//! and runs one dispatch pass:
//!
//! 1. keep jobs whose dependencies are satisfied and whose time windows are open
//! 2. order them by descending priority, then submission order
//! 3. skip jobs marked "skip if running" whose namesake is Running
//! 4. admit the rest until the concurrency ceiling is reached
//!
//! Each admitted job runs in its own task under a
//! [`hyperjob_retry::RetryCoordinator`]; the outcome is written back by the
//! loop, which then re-evaluates dependents.
//!
//! # Job states
//!
//! | State                 | Meaning                                        |
//! |-----------------------|------------------------------------------------|
//! | `pending`             | eligible, waiting for a concurrency slot       |
//! | `waiting_on_dependency` | at least one dependency not yet satisfied    |
//! | `waiting_on_window`   | every time window is closed                    |
//! | `running`             | handed to the retry coordinator                |
//! | `succeeded`           | terminal                                       |
//! | `failed`              | terminal                                       |
//! | `cancelled`           | terminal                                       |
//! | `skipped`             | terminal, operation never invoked              |

pub mod dependency;
pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod types;
pub mod window;

pub use dependency::{Dependency, DependencyCondition, DependencyStatus};
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use events::JobEvent;
pub use registry::JobRegistry;
pub use types::{JobDefinition, JobId, JobOperation, JobRecord, JobState};
pub use window::TimeWindow;
