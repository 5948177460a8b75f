//! Pure state reducer shared by the event and periodic detection paths.
//!
//! Neither path writes the state directly: both hand a [`MonitorInput`] to
//! [`StateReducer::apply`], which decides whether a transition happens. The
//! reducer does no I/O, so tests drive each path by constructing inputs.

use std::collections::BTreeMap;

use hyperjob_core::config::NetworkConfig;

use crate::probe::ProbeOutcome;
use crate::state::NetworkState;

/// How many consistent cycles are needed before the state flips to Down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hysteresis {
    /// Consecutive all-unreachable cycles before Up/Degraded → Down.
    pub down_after: u32,
    /// Consecutive all-inconclusive cycles before forcing Down.
    pub inconclusive_after: u32,
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self {
            down_after: 2,
            inconclusive_after: 3,
        }
    }
}

impl From<&NetworkConfig> for Hysteresis {
    fn from(c: &NetworkConfig) -> Self {
        Self {
            down_after: c.down_after.max(1),
            inconclusive_after: c.inconclusive_after.max(1),
        }
    }
}

/// Link-layer change reported by the event path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub interface: String,
    pub up: bool,
}

impl LinkEvent {
    pub fn up(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            up: true,
        }
    }

    pub fn down(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            up: false,
        }
    }
}

/// Results of one probe pass over every configured target.
///
/// `seq` is taken when the cycle starts; a cycle that finishes after a newer
/// one has been applied is stale and ignored.
#[derive(Debug, Clone)]
pub struct ProbeCycle {
    pub seq: u64,
    pub outcomes: Vec<ProbeOutcome>,
}

#[derive(Debug, Clone)]
pub enum MonitorInput {
    Probe(ProbeCycle),
    Link(LinkEvent),
}

#[derive(Debug)]
pub struct StateReducer {
    state: NetworkState,
    hysteresis: Hysteresis,
    /// Last known link state per monitored interface.
    links: BTreeMap<String, bool>,
    down_streak: u32,
    inconclusive_streak: u32,
    last_cycle: Option<u64>,
}

impl StateReducer {
    pub fn new(hysteresis: Hysteresis) -> Self {
        Self {
            state: NetworkState::Unknown,
            hysteresis,
            links: BTreeMap::new(),
            down_streak: 0,
            inconclusive_streak: 0,
            last_cycle: None,
        }
    }

    pub fn state(&self) -> NetworkState {
        self.state
    }

    /// True once at least one monitored link is known and none is up.
    pub fn link_down(&self) -> bool {
        !self.links.is_empty() && !self.links.values().any(|up| *up)
    }

    /// Feed one input. Returns the new state when a transition happened.
    pub fn apply(&mut self, input: MonitorInput) -> Option<NetworkState> {
        let next = match input {
            MonitorInput::Probe(cycle) => self.reduce_probe(cycle),
            MonitorInput::Link(event) => self.reduce_link(event),
        };
        match next {
            Some(to) if to != self.state => {
                self.state = to;
                Some(to)
            }
            _ => None,
        }
    }

    fn reduce_link(&mut self, event: LinkEvent) -> Option<NetworkState> {
        self.links.insert(event.interface, event.up);
        if self.link_down() {
            // The link layer is authoritative; no hysteresis.
            self.reset_streaks();
            return Some(NetworkState::Down);
        }
        // A link coming up proves nothing until a probe cycle confirms it.
        None
    }

    fn reduce_probe(&mut self, cycle: ProbeCycle) -> Option<NetworkState> {
        if self.last_cycle.is_some_and(|last| cycle.seq <= last) {
            return None;
        }
        self.last_cycle = Some(cycle.seq);

        if self.link_down() {
            return Some(NetworkState::Down);
        }

        let total = cycle.outcomes.len();
        if total == 0 {
            return None;
        }
        let reachable = count(&cycle.outcomes, ProbeOutcome::Reachable);
        let unreachable = count(&cycle.outcomes, ProbeOutcome::Unreachable);

        if reachable == total {
            self.reset_streaks();
            return Some(NetworkState::Up);
        }
        if reachable > 0 {
            self.reset_streaks();
            return Some(NetworkState::Degraded);
        }

        if unreachable > 0 {
            self.inconclusive_streak = 0;
            self.down_streak += 1;
            let confirmed = self.down_streak >= self.hysteresis.down_after;
            if confirmed || matches!(self.state, NetworkState::Unknown | NetworkState::Down) {
                return Some(NetworkState::Down);
            }
            return None;
        }

        // Every target was inconclusive: the probe transport itself failed.
        self.inconclusive_streak += 1;
        if self.inconclusive_streak >= self.hysteresis.inconclusive_after {
            return Some(NetworkState::Down);
        }
        None
    }

    fn reset_streaks(&mut self) {
        self.down_streak = 0;
        self.inconclusive_streak = 0;
    }
}

fn count(outcomes: &[ProbeOutcome], which: ProbeOutcome) -> usize {
    outcomes.iter().filter(|o| **o == which).count()
}
