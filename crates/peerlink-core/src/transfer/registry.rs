//! Registry of transfers that carry a network id

use super::{Transfer, TransferOutcome};
use crate::identity::{FriendNumber, TransferId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Active transfers keyed by their network id.
///
/// Holds inbound transfers from the moment they are accepted and outbound
/// transfers from the moment they are admitted. An entry leaves the registry
/// exactly when its transfer is closed.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    transfers: HashMap<TransferId, Transfer>,
}

impl TransferRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer under its id. A transfer already registered under
    /// the same id is returned so the caller can close it.
    pub fn insert(&mut self, id: TransferId, transfer: Transfer) -> Option<Transfer> {
        self.transfers.insert(id, transfer)
    }

    /// Look up a transfer.
    pub fn get(&self, id: &TransferId) -> Option<&Transfer> {
        self.transfers.get(id)
    }

    /// Look up a transfer mutably.
    pub fn get_mut(&mut self, id: &TransferId) -> Option<&mut Transfer> {
        self.transfers.get_mut(id)
    }

    /// Whether a transfer is registered.
    pub fn contains(&self, id: &TransferId) -> bool {
        self.transfers.contains_key(id)
    }

    /// Remove a transfer and close it with `outcome`.
    ///
    /// Returns the closed transfer, or `None` when nothing was registered.
    pub fn close(&mut self, id: &TransferId, outcome: TransferOutcome) -> Option<Transfer> {
        let Some(mut transfer) = self.transfers.remove(id) else {
            tracing::debug!("Transfer {} not registered, nothing to close", id);
            return None;
        };
        transfer.close(outcome);
        Some(transfer)
    }

    /// Id of the transfer reading from or writing to `path`.
    pub fn find_by_path(&self, path: &Path) -> Option<TransferId> {
        self.transfers
            .iter()
            .find(|(_, t)| t.path() == path)
            .map(|(id, _)| *id)
    }

    /// Ids of all transfers running with a friend.
    pub fn ids_for_friend(&self, friend: FriendNumber) -> Vec<TransferId> {
        self.transfers
            .keys()
            .filter(|id| id.friend == friend)
            .copied()
            .collect()
    }

    /// Local path and completion percentage of every registered transfer.
    pub fn progress(&self) -> HashMap<PathBuf, u8> {
        self.transfers
            .values()
            .map(|t| (t.path().to_path_buf(), t.percentage()))
            .collect()
    }

    /// Remove and close everything with `outcome`; returns how many closed.
    pub fn close_all(&mut self, outcome: TransferOutcome) -> usize {
        let mut closed = 0;
        for (_, mut transfer) in self.transfers.drain() {
            if transfer.close(outcome) {
                closed += 1;
            }
        }
        closed
    }

    /// Number of registered transfers.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
