//! Per-peer FIFO send queues
//!
//! Each peer gets its own queue the first time something is enqueued for it.
//! Queues are never removed, even once empty; peer counts are small enough
//! that keeping them is cheaper than tracking their lifetime. There is no
//! ordering guarantee across peers.

use super::Transfer;
use crate::identity::PeerId;
use std::collections::{HashMap, VecDeque};
use std::path::Path;

/// Initial capacity of a freshly created peer queue
const QUEUE_CAPACITY: usize = 4;

/// Pending outbound transfers, one FIFO per peer.
#[derive(Debug, Default)]
pub struct SendQueues {
    queues: HashMap<PeerId, VecDeque<Transfer>>,
}

impl SendQueues {
    /// Create an empty set of queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transfer to the peer's queue. `None` is ignored.
    pub fn enqueue(&mut self, peer: PeerId, transfer: Option<Transfer>) {
        let Some(transfer) = transfer else {
            return;
        };
        self.queues
            .entry(peer)
            .or_insert_with(|| VecDeque::with_capacity(QUEUE_CAPACITY))
            .push_back(transfer);
    }

    /// Pop the oldest pending transfer of a peer.
    pub fn dequeue(&mut self, peer: &PeerId) -> Option<Transfer> {
        self.queues.get_mut(peer)?.pop_front()
    }

    /// Number of pending transfers for a peer.
    pub fn len(&self, peer: &PeerId) -> usize {
        self.queues.get(peer).map_or(0, VecDeque::len)
    }

    /// Total number of pending transfers.
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Whether a queue was ever created for the peer.
    pub fn has_queue(&self, peer: &PeerId) -> bool {
        self.queues.contains_key(peer)
    }

    /// Peers with at least one pending transfer.
    pub fn peers_with_pending(&self) -> Vec<PeerId> {
        self.queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(peer, _)| *peer)
            .collect()
    }

    /// Pending transfers of a peer, oldest first.
    pub fn pending(&self, peer: &PeerId) -> impl Iterator<Item = &Transfer> {
        self.queues.get(peer).into_iter().flatten()
    }

    /// Take a pending transfer out of whichever queue holds it.
    pub fn remove_by_path(&mut self, path: &Path) -> Option<Transfer> {
        for queue in self.queues.values_mut() {
            if let Some(index) = queue.iter().position(|t| t.path() == path) {
                return queue.remove(index);
            }
        }
        None
    }

    /// Empty every queue, keeping the queues themselves.
    pub fn drain_all(&mut self) -> Vec<Transfer> {
        self.queues
            .values_mut()
            .flat_map(|queue| queue.drain(..))
            .collect()
    }
}
