//! Linux sysfs access: link state for the event path and per-interface
//! counters for the read-only statistics view.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::monitor::NetworkMonitor;
use crate::reducer::LinkEvent;

const IFF_UP: u32 = 0x1;
const IFF_LOOPBACK: u32 = 0x8;

/// Link state of one interface as read from sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub up: bool,
    pub loopback: bool,
}

/// Read-only counters for one interface. Not an input to the state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceStats {
    pub name: String,
    pub is_up: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub mtu: u32,
    pub mac_address: String,
}

/// List every interface under `root` (normally `/sys/class/net`).
pub fn read_links(root: &Path) -> io::Result<Vec<LinkInfo>> {
    let mut links = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let dir = entry.path();
        let flags = read_flags(&dir);
        let operstate = read_trimmed(&dir.join("operstate")).unwrap_or_default();
        // Virtual links often report "unknown"; fall back to IFF_UP.
        let up = operstate == "up" || (operstate == "unknown" && flags & IFF_UP != 0);
        links.push(LinkInfo {
            loopback: flags & IFF_LOOPBACK != 0 || name == "lo",
            name,
            up,
        });
    }
    links.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(links)
}

/// Counters for every non-loopback interface that exposes statistics.
pub fn read_interface_stats(root: &Path) -> io::Result<BTreeMap<String, InterfaceStats>> {
    let mut stats = BTreeMap::new();
    for link in read_links(root)? {
        if link.loopback {
            continue;
        }
        let dir = root.join(&link.name);
        let counters = dir.join("statistics");
        if !counters.is_dir() {
            continue;
        }
        let counter = |file: &str| read_u64(&counters.join(file));
        stats.insert(
            link.name.clone(),
            InterfaceStats {
                name: link.name.clone(),
                is_up: link.up,
                rx_bytes: counter("rx_bytes"),
                tx_bytes: counter("tx_bytes"),
                rx_packets: counter("rx_packets"),
                tx_packets: counter("tx_packets"),
                rx_errors: counter("rx_errors"),
                tx_errors: counter("tx_errors"),
                rx_dropped: counter("rx_dropped"),
                tx_dropped: counter("tx_dropped"),
                mtu: read_u64(&dir.join("mtu")) as u32,
                mac_address: read_trimmed(&dir.join("address")).unwrap_or_default(),
            },
        );
    }
    Ok(stats)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_u64(path: &Path) -> u64 {
    read_trimmed(path)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn read_flags(dir: &Path) -> u32 {
    read_trimmed(&dir.join("flags"))
        .and_then(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0)
}

/// Event-path producer: polls sysfs link state and reports every change to
/// the monitor. The first poll reports every interface once.
#[derive(Debug, Clone)]
pub struct SysfsLinkWatcher {
    root: PathBuf,
    poll: Duration,
}

impl SysfsLinkWatcher {
    pub fn new(root: impl Into<PathBuf>, poll: Duration) -> Self {
        Self {
            root: root.into(),
            poll,
        }
    }

    /// Compare a fresh sysfs read against `known` and return the changes.
    pub fn diff(&self, known: &mut HashMap<String, bool>) -> io::Result<Vec<LinkEvent>> {
        let links = read_links(&self.root)?;
        let mut events = Vec::new();

        for link in links.iter().filter(|l| !l.loopback) {
            if known.get(&link.name) != Some(&link.up) {
                known.insert(link.name.clone(), link.up);
                events.push(LinkEvent {
                    interface: link.name.clone(),
                    up: link.up,
                });
            }
        }

        // Interfaces that disappeared count as down.
        let vanished: Vec<String> = known
            .iter()
            .filter(|(name, up)| **up && !links.iter().any(|l| &l.name == *name))
            .map(|(name, _)| name.clone())
            .collect();
        for name in vanished {
            known.insert(name.clone(), false);
            events.push(LinkEvent::down(&name));
        }

        Ok(events)
    }

    pub async fn run(self, monitor: NetworkMonitor, cancel: CancellationToken) {
        let mut known = HashMap::new();
        loop {
            match self.diff(&mut known) {
                Ok(events) => {
                    for event in events {
                        debug!(interface = %event.interface, up = event.up, "link event");
                        monitor.handle_link_event(event);
                    }
                }
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "link watch unavailable, stopping watcher");
                    return;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::fs;
    use std::path::Path;

    /// Write a fake `/sys/class/net/<name>` entry.
    pub(crate) fn fake_iface(root: &Path, name: &str, operstate: &str, flags: &str) {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("statistics")).unwrap();
        fs::write(dir.join("operstate"), format!("{operstate}\n")).unwrap();
        fs::write(dir.join("flags"), format!("{flags}\n")).unwrap();
        fs::write(dir.join("mtu"), "1500\n").unwrap();
        fs::write(dir.join("address"), "02:42:ac:11:00:02\n").unwrap();
        fs::write(dir.join("statistics/rx_bytes"), "1024\n").unwrap();
        fs::write(dir.join("statistics/tx_bytes"), "2048\n").unwrap();
        fs::write(dir.join("statistics/rx_errors"), "3\n").unwrap();
    }
}
