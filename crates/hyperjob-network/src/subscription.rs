use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{self, Stream};
use tokio::sync::Notify;

use crate::state::NetworkState;

/// Bounded per-subscriber buffer. The producer never waits on it: when the
/// buffer is full the newest slot is overwritten, so order is kept and the
/// latest state always survives.
///
/// The subscriber never sees the same state twice in a row, including
/// across an overwrite that empties the buffer.
#[derive(Debug)]
pub(crate) struct Slot {
    queue: Mutex<Pending>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Pending {
    items: VecDeque<NetworkState>,
    /// Last state handed to the subscriber.
    delivered: Option<NetworkState>,
}

impl Slot {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            queue: Mutex::new(Pending {
                items: VecDeque::with_capacity(capacity),
                delivered: None,
            }),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn push(&self, state: NetworkState) {
        {
            let mut queue = self.queue.lock().expect("subscriber queue poisoned");
            if queue.items.len() >= self.capacity {
                queue.items.pop_back();
            }
            let previous = queue.items.back().copied().or(queue.delivered);
            if previous != Some(state) {
                queue.items.push_back(state);
            }
        }
        self.notify.notify_one();
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<NetworkState> {
        let mut queue = self.queue.lock().expect("subscriber queue poisoned");
        let state = queue.items.pop_front()?;
        queue.delivered = Some(state);
        Some(state)
    }
}

/// Receiving end of [`crate::NetworkMonitor::subscribe`].
///
/// Yields every transition after the subscription was taken, oldest first.
/// Returns `None` once the monitor stops and the buffer is drained.
#[derive(Debug)]
pub struct StateSubscription {
    slot: Arc<Slot>,
}

impl StateSubscription {
    pub(crate) fn new(slot: Arc<Slot>) -> Self {
        Self { slot }
    }

    pub async fn recv(&mut self) -> Option<NetworkState> {
        loop {
            if let Some(state) = self.slot.pop() {
                return Some(state);
            }
            if self.slot.closed.load(Ordering::SeqCst) {
                return None;
            }
            // notify_one stores a permit, so a push between pop and here
            // is not lost.
            self.slot.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<NetworkState> {
        self.slot.pop()
    }

    pub fn into_stream(self) -> impl Stream<Item = NetworkState> {
        stream::unfold(self, |mut sub| async move {
            let next = sub.recv().await?;
            Some((next, sub))
        })
    }
}
