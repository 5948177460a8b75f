use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use hyperjob_core::config::NetworkConfig;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{NetworkError, Result};
use crate::probe::{ProbeTransport, TcpProbe};
use crate::reducer::{Hysteresis, LinkEvent, MonitorInput, ProbeCycle, StateReducer};
use crate::state::NetworkState;
use crate::subscription::{Slot, StateSubscription};
use crate::sysfs::{self, InterfaceStats, SysfsLinkWatcher};

/// Process-wide network reachability monitor.
///
/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    config: NetworkConfig,
    transport: Arc<dyn ProbeTransport>,
    /// Serialises every transition. Held while publishing so subscribers
    /// see transitions in the order they were decided.
    reducer: Mutex<StateReducer>,
    /// Lock-free snapshot for `current_state`.
    state: AtomicU8,
    state_tx: watch::Sender<NetworkState>,
    subscribers: Mutex<Vec<Weak<Slot>>>,
    cycle_seq: AtomicU64,
    reprobe: Notify,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkMonitor {
    /// Monitor that probes over TCP.
    pub fn new(config: NetworkConfig) -> Self {
        Self::with_transport(config, Arc::new(TcpProbe))
    }

    pub fn with_transport(config: NetworkConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        let (state_tx, _) = watch::channel(NetworkState::Unknown);
        let hysteresis = Hysteresis::from(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                reducer: Mutex::new(StateReducer::new(hysteresis)),
                state: AtomicU8::new(NetworkState::Unknown as u8),
                state_tx,
                subscribers: Mutex::new(Vec::new()),
                cycle_seq: AtomicU64::new(0),
                reprobe: Notify::new(),
                running: Mutex::new(None),
            }),
        }
    }

    /// Run an initial probe cycle, then start the periodic and link-watch
    /// paths. Both stop when `cancel` fires or [`stop`](Self::stop) is called.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let token = cancel.child_token();
        {
            let mut running = self.inner.running.lock().expect("monitor lock poisoned");
            if running.is_some() {
                return Err(NetworkError::AlreadyStarted);
            }
            *running = Some(Running {
                cancel: token.clone(),
                tasks: Vec::new(),
            });
        }

        let config = &self.inner.config;
        if !config.enabled {
            info!("network monitoring disabled, state stays unknown");
            return Ok(());
        }

        let mut tasks = Vec::new();
        if config.link_watch {
            let watcher = SysfsLinkWatcher::new(
                &config.sysfs_root,
                Duration::from_millis(config.link_poll_ms.max(1)),
            );
            tasks.push(tokio::spawn(watcher.run(self.clone(), token.clone())));
        }

        let initial = self.probe_now().await;
        info!(
            state = %initial,
            targets = config.targets.len(),
            interval_ms = config.check_interval_ms,
            "network monitor started"
        );

        tasks.push(tokio::spawn(self.clone().probe_loop(token.clone())));

        let mut running = self.inner.running.lock().expect("monitor lock poisoned");
        match running.as_mut() {
            Some(r) if !token.is_cancelled() => r.tasks.extend(tasks),
            // Stopped while the first cycle was in flight.
            _ => tasks.iter().for_each(|t| t.abort()),
        }
        Ok(())
    }

    /// Stop both detection paths, reset the state to Unknown and end every
    /// subscription. A stopped monitor may be started again.
    pub async fn stop(&self) {
        let running = self
            .inner
            .running
            .lock()
            .expect("monitor lock poisoned")
            .take();
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        for task in running.tasks {
            let _ = task.await;
        }

        {
            let mut reducer = self.inner.reducer.lock().expect("reducer lock poisoned");
            *reducer = StateReducer::new(Hysteresis::from(&self.inner.config));
            self.inner
                .state
                .store(NetworkState::Unknown as u8, Ordering::SeqCst);
            self.inner.state_tx.send_replace(NetworkState::Unknown);
        }

        let slots: Vec<_> = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .drain(..)
            .collect();
        for slot in slots.iter().filter_map(Weak::upgrade) {
            slot.close();
        }
        info!("network monitor stopped");
    }

    pub fn current_state(&self) -> NetworkState {
        NetworkState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_up(&self) -> bool {
        self.current_state().is_up()
    }

    /// Every transition after this call, oldest first.
    pub fn subscribe(&self) -> StateSubscription {
        let slot = Slot::new(self.inner.config.subscriber_buffer);
        let mut subscribers = self.inner.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.retain(|w| w.strong_count() > 0);
        subscribers.push(Arc::downgrade(&slot));
        StateSubscription::new(slot)
    }

    /// Resolve once the state is Up. Returns immediately if it already is.
    ///
    /// Fails with [`NetworkError::Stopped`] when the monitor is not running
    /// and the state is no longer Down, which is where [`stop`](Self::stop)
    /// leaves it.
    pub async fn wait_for_network(&self, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_up() {
                return Ok(());
            }
            if !state.is_down() && !self.is_running() {
                return Err(NetworkError::Stopped);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(NetworkError::Cancelled);
                    }
                }
                _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
            }
        }
    }

    fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .expect("monitor lock poisoned")
            .is_some()
    }

    /// Resolve once the state is Down. Pends forever otherwise.
    pub async fn wait_for_outage(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let down = rx.borrow_and_update().is_down();
            if down {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Probe every target once and feed the cycle to the reducer.
    pub async fn probe_now(&self) -> NetworkState {
        let seq = self.inner.cycle_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = Duration::from_millis(self.inner.config.check_timeout_ms);
        let transport = &self.inner.transport;

        let outcomes = join_all(
            self.inner
                .config
                .targets
                .iter()
                .map(|target| transport.probe(target, limit)),
        )
        .await;

        for (target, outcome) in self.inner.config.targets.iter().zip(&outcomes) {
            debug!(host = %target.host, ?outcome, seq, "probe result");
        }

        self.apply(MonitorInput::Probe(ProbeCycle { seq, outcomes }));
        self.current_state()
    }

    /// Event path entry point. Loopback and interfaces outside
    /// `preferred_interfaces` are ignored; a link coming up triggers an
    /// immediate re-probe.
    pub fn handle_link_event(&self, event: LinkEvent) {
        if !self.monitors_interface(&event.interface) {
            return;
        }
        let up = event.up;
        self.apply(MonitorInput::Link(event));
        if up {
            self.inner.reprobe.notify_one();
        }
    }

    /// Read-only per-interface counters. Not used for state decisions.
    pub fn interface_stats(&self) -> Result<BTreeMap<String, InterfaceStats>> {
        let mut stats = sysfs::read_interface_stats(Path::new(&self.inner.config.sysfs_root))?;
        stats.retain(|name, _| self.monitors_interface(name));
        Ok(stats)
    }

    fn monitors_interface(&self, name: &str) -> bool {
        if name == "lo" {
            return false;
        }
        let preferred = &self.inner.config.preferred_interfaces;
        preferred.is_empty() || preferred.iter().any(|p| p == name)
    }

    fn apply(&self, input: MonitorInput) {
        let mut reducer = self.inner.reducer.lock().expect("reducer lock poisoned");
        let Some(to) = reducer.apply(input) else {
            return;
        };

        let from = NetworkState::from_u8(self.inner.state.swap(to as u8, Ordering::SeqCst));
        self.inner.state_tx.send_replace(to);
        info!(%from, %to, "network state changed");

        let mut subscribers = self.inner.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.retain(|weak| match weak.upgrade() {
            Some(slot) => {
                slot.push(to);
                true
            }
            None => false,
        });
    }

    async fn probe_loop(self, cancel: CancellationToken) {
        let period = Duration::from_millis(self.inner.config.check_interval_ms.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately and start() has already probed.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.inner.reprobe.notified() => {
                    debug!("link event, probing immediately");
                    ticker.reset();
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.probe_now() => {}
            }
        }
        debug!("probe loop exited");
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("state", &self.current_state())
            .field("targets", &self.inner.config.targets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeOutcome, ProbeTarget};
    use async_trait::async_trait;

    struct Fixed(Mutex<ProbeOutcome>);

    #[async_trait]
    impl ProbeTransport for Fixed {
        async fn probe(&self, _: &ProbeTarget, _: Duration) -> ProbeOutcome {
            *self.0.lock().unwrap()
        }
    }

    fn monitor(outcome: ProbeOutcome) -> (NetworkMonitor, Arc<Fixed>) {
        let transport = Arc::new(Fixed(Mutex::new(outcome)));
        let config = NetworkConfig {
            link_watch: false,
            down_after: 1,
            targets: vec![ProbeTarget::new("a", &[53]), ProbeTarget::new("b", &[53])],
            ..NetworkConfig::default()
        };
        (NetworkMonitor::with_transport(config, transport.clone()), transport)
    }

    #[tokio::test]
    async fn starts_unknown_until_first_cycle() {
        let (m, _) = monitor(ProbeOutcome::Reachable);
        assert_eq!(m.current_state(), NetworkState::Unknown);
        assert_eq!(m.probe_now().await, NetworkState::Up);
        assert!(m.is_up());
    }

    #[tokio::test]
    async fn wait_for_network_returns_immediately_when_up() {
        let (m, _) = monitor(ProbeOutcome::Reachable);
        m.probe_now().await;
        m.wait_for_network(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_network_honours_cancellation() {
        let (m, _) = monitor(ProbeOutcome::Unreachable);
        m.probe_now().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = m.wait_for_network(&cancel).await.unwrap_err();
        assert!(matches!(err, NetworkError::Cancelled));
    }

    #[tokio::test]
    async fn stop_releases_network_waiters() {
        let (m, _) = monitor(ProbeOutcome::Unreachable);
        let cancel = CancellationToken::new();
        m.start(cancel.clone()).await.unwrap();
        assert_eq!(m.current_state(), NetworkState::Down);

        let waiter = {
            let m = m.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { m.wait_for_network(&cancel).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        m.stop().await;
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter released by stop")
            .unwrap();
        assert!(matches!(result, Err(NetworkError::Stopped)));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn never_started_monitor_does_not_block_waiters() {
        let (m, _) = monitor(ProbeOutcome::Reachable);
        let err = m.wait_for_network(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, NetworkError::Stopped));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (m, _) = monitor(ProbeOutcome::Reachable);
        let cancel = CancellationToken::new();
        m.start(cancel.clone()).await.unwrap();
        assert!(matches!(
            m.start(cancel.clone()).await,
            Err(NetworkError::AlreadyStarted)
        ));
        m.stop().await;
        assert_eq!(m.current_state(), NetworkState::Unknown);
    }

    #[tokio::test]
    async fn link_events_outside_preferred_interfaces_are_ignored() {
        let transport = Arc::new(Fixed(Mutex::new(ProbeOutcome::Reachable)));
        let config = NetworkConfig {
            link_watch: false,
            preferred_interfaces: vec!["eth0".into()],
            ..NetworkConfig::default()
        };
        let m = NetworkMonitor::with_transport(config, transport);
        m.probe_now().await;

        m.handle_link_event(LinkEvent::down("wlan0"));
        m.handle_link_event(LinkEvent::down("lo"));
        assert_eq!(m.current_state(), NetworkState::Up);

        m.handle_link_event(LinkEvent::down("eth0"));
        assert_eq!(m.current_state(), NetworkState::Down);
    }
}
