use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

pub use hyperjob_core::config::ProbeTargetConfig as ProbeTarget;

/// Result of probing a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Reachable,
    Unreachable,
    /// The probe itself could not run (e.g. name resolution failed), which
    /// says nothing about the target's real reachability.
    Inconclusive,
}

/// "Can I reach this host within this timeout" primitive.
///
/// Production uses [`TcpProbe`]; tests plug in a fake.
#[async_trait]
pub trait ProbeTransport: Send + Sync + 'static {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> ProbeOutcome;
}

/// Dials each of the target's ports over TCP until one connects.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl ProbeTransport for TcpProbe {
    async fn probe(&self, target: &ProbeTarget, limit: Duration) -> ProbeOutcome {
        let mut definitive_failure = false;

        for &port in &target.ports {
            let addrs = match timeout(limit, lookup_host((target.host.as_str(), port))).await {
                Ok(Ok(addrs)) => addrs.collect::<Vec<_>>(),
                Ok(Err(e)) => {
                    debug!(host = %target.host, port, error = %e, "probe resolution failed");
                    continue;
                }
                Err(_) => {
                    debug!(host = %target.host, port, "probe resolution timed out");
                    continue;
                }
            };
            if addrs.is_empty() {
                continue;
            }

            match timeout(limit, TcpStream::connect(&addrs[..])).await {
                Ok(Ok(_stream)) => {
                    debug!(host = %target.host, port, "connectivity check succeeded");
                    return ProbeOutcome::Reachable;
                }
                // A refusal travelled there and back: the path works.
                Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                    debug!(host = %target.host, port, "connection refused, path is up");
                    return ProbeOutcome::Reachable;
                }
                Ok(Err(e)) => {
                    debug!(host = %target.host, port, error = %e, "connectivity check failed");
                    definitive_failure = true;
                }
                Err(_) => {
                    debug!(host = %target.host, port, "connectivity check timed out");
                    definitive_failure = true;
                }
            }
        }

        if definitive_failure {
            ProbeOutcome::Unreachable
        } else {
            ProbeOutcome::Inconclusive
        }
    }
}
