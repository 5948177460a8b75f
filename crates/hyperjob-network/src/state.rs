use serde::{Deserialize, Serialize};
use std::fmt;

/// Reachability of the outside world as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NetworkState {
    /// No conclusive probe cycle yet.
    #[default]
    Unknown = 0,
    /// Every probe target answered.
    Up = 1,
    /// No target answered, or every monitored link is down.
    Down = 2,
    /// Some but not all targets answered.
    Degraded = 3,
}

impl NetworkState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => NetworkState::Up,
            2 => NetworkState::Down,
            3 => NetworkState::Degraded,
            _ => NetworkState::Unknown,
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, NetworkState::Up)
    }

    pub fn is_down(&self) -> bool {
        matches!(self, NetworkState::Down)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkState::Unknown => "unknown",
            NetworkState::Up => "up",
            NetworkState::Down => "down",
            NetworkState::Degraded => "degraded",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_round_trip_covers_every_state() {
        for s in [
            NetworkState::Unknown,
            NetworkState::Up,
            NetworkState::Down,
            NetworkState::Degraded,
        ] {
            assert_eq!(NetworkState::from_u8(s as u8), s);
        }
        assert_eq!(NetworkState::from_u8(200), NetworkState::Unknown);
    }
}
