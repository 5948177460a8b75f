//! `hyperjob-network` — process-wide network reachability monitor.
//!
//! # Overview
//!
//! Two producers feed one [`reducer::StateReducer`]:
//!
//! | Path     | Source                                   | Latency            |
//! |----------|------------------------------------------|--------------------|
//! | Event    | link up/down notifications (sysfs poll)  | sub-second         |
//! | Periodic | TCP dials against configured targets     | `check_interval_ms`|
//!
//! The reduced state is published three ways: a lock-free snapshot
//! ([`NetworkMonitor::current_state`]), per-subscriber "latest wins" queues
//! ([`NetworkMonitor::subscribe`]) and a wait primitive
//! ([`NetworkMonitor::wait_for_network`]). The monitor knows nothing about
//! jobs or retries.

pub mod error;
pub mod monitor;
pub mod probe;
pub mod reducer;
pub mod state;
pub mod subscription;
pub mod sysfs;

pub use error::{NetworkError, Result};
pub use monitor::NetworkMonitor;
pub use probe::{ProbeOutcome, ProbeTarget, ProbeTransport, TcpProbe};
pub use reducer::{Hysteresis, LinkEvent, MonitorInput, ProbeCycle, StateReducer};
pub use state::NetworkState;
pub use subscription::StateSubscription;
pub use sysfs::{InterfaceStats, SysfsLinkWatcher};
