use async_trait::async_trait;
use hyperjob_network::{NetworkError, NetworkMonitor, NetworkState};
use tokio_util::sync::CancellationToken;

/// What the coordinator needs from the network monitor.
///
/// Only `Down` holds retries back; `Unknown` and `Degraded` proceed.
#[async_trait]
pub trait NetworkGate: Send + Sync {
    fn current_state(&self) -> NetworkState;

    /// Resolve once the network is Up, or the gate can no longer tell.
    /// `false` only when `cancel` fired first.
    async fn wait_for_network(&self, cancel: &CancellationToken) -> bool;

    /// Resolve once the network goes Down.
    async fn wait_for_outage(&self);
}

#[async_trait]
impl NetworkGate for NetworkMonitor {
    fn current_state(&self) -> NetworkState {
        NetworkMonitor::current_state(self)
    }

    async fn wait_for_network(&self, cancel: &CancellationToken) -> bool {
        !matches!(
            NetworkMonitor::wait_for_network(self, cancel).await,
            Err(NetworkError::Cancelled)
        )
    }

    async fn wait_for_outage(&self) {
        NetworkMonitor::wait_for_outage(self).await
    }
}
