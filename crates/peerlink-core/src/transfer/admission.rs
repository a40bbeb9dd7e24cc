//! Send admission tracking
//!
//! An outbound transfer is *admitted* when the engine accepted the file
//! announcement and assigned it a number. From then on the peer has exactly
//! one outbound transfer in flight, recorded here, until that transfer ends.
//!
//! A peer that accepts an announcement but never asks for data would block
//! its queue forever, so an admission that has not started streaming within
//! the send timeout is considered stale and gets reclaimed by the
//! coordinator.

use crate::identity::{PeerId, TransferId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Record of an admitted outbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendAdmission {
    /// Network id of the admitted transfer
    pub transfer_id: TransferId,
    /// When the engine accepted the announcement
    pub admitted_at: Instant,
    /// Whether the peer has requested data yet
    pub has_started: bool,
}

impl SendAdmission {
    /// New admission; the staleness clock starts at `admitted_at`.
    pub fn new(transfer_id: TransferId, admitted_at: Instant) -> Self {
        Self {
            transfer_id,
            admitted_at,
            has_started: false,
        }
    }

    /// Whether the admission timed out without streaming.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        !self.has_started && now.saturating_duration_since(self.admitted_at) > timeout
    }
}

/// At most one [`SendAdmission`] per peer.
#[derive(Debug)]
pub struct AdmissionTracker {
    admissions: HashMap<PeerId, SendAdmission>,
    timeout: Duration,
}

impl AdmissionTracker {
    /// Create a tracker using `timeout` as staleness bound.
    pub fn new(timeout: Duration) -> Self {
        Self {
            admissions: HashMap::new(),
            timeout,
        }
    }

    /// Staleness bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record an admission, replacing nothing: returns `false` when the peer
    /// already has one.
    pub fn admit(&mut self, peer: PeerId, transfer_id: TransferId, now: Instant) -> bool {
        if self.admissions.contains_key(&peer) {
            return false;
        }
        self.admissions
            .insert(peer, SendAdmission::new(transfer_id, now));
        true
    }

    /// Current admission of a peer.
    pub fn get(&self, peer: &PeerId) -> Option<&SendAdmission> {
        self.admissions.get(peer)
    }

    /// Whether the peer has an admission.
    pub fn is_admitted(&self, peer: &PeerId) -> bool {
        self.admissions.contains_key(peer)
    }

    /// Mark the peer's admission as streaming if it belongs to `transfer_id`.
    pub fn mark_started(&mut self, peer: &PeerId, transfer_id: TransferId) -> bool {
        match self.admissions.get_mut(peer) {
            Some(admission) if admission.transfer_id == transfer_id => {
                admission.has_started = true;
                true
            }
            _ => false,
        }
    }

    /// Whether the peer's admission is stale at `now`.
    pub fn is_stale(&self, peer: &PeerId, now: Instant) -> bool {
        self.admissions
            .get(peer)
            .is_some_and(|a| a.is_stale(now, self.timeout))
    }

    /// Peers whose admission is stale at `now`.
    pub fn stale_peers(&self, now: Instant) -> Vec<PeerId> {
        self.admissions
            .iter()
            .filter(|(_, a)| a.is_stale(now, self.timeout))
            .map(|(peer, _)| *peer)
            .collect()
    }

    /// Drop the admission of a peer.
    pub fn clear(&mut self, peer: &PeerId) -> Option<SendAdmission> {
        self.admissions.remove(peer)
    }

    /// Drop the admission of a peer only if it belongs to `transfer_id`.
    pub fn clear_if(&mut self, peer: &PeerId, transfer_id: TransferId) -> bool {
        if self
            .admissions
            .get(peer)
            .is_some_and(|a| a.transfer_id == transfer_id)
        {
            self.admissions.remove(peer);
            return true;
        }
        false
    }

    /// Drop every admission.
    pub fn clear_all(&mut self) {
        self.admissions.clear();
    }

    /// Number of peers with an admission.
    pub fn len(&self) -> usize {
        self.admissions.len()
    }

    /// Whether no peer has an admission.
    pub fn is_empty(&self) -> bool {
        self.admissions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::tests::peer;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn test_stale_only_after_timeout() {
        let start = Instant::now();
        let admission = SendAdmission::new(TransferId::new(0, 1), start);
        assert!(!admission.is_stale(start, TIMEOUT));
        assert!(!admission.is_stale(start + TIMEOUT, TIMEOUT));
        assert!(admission.is_stale(start + TIMEOUT + Duration::from_millis(1), TIMEOUT));
    }

    #[test]
    fn test_started_never_stale() {
        let start = Instant::now();
        let mut tracker = AdmissionTracker::new(TIMEOUT);
        let id = TransferId::new(0, 1);
        tracker.admit(peer(1), id, start);
        assert!(tracker.mark_started(&peer(1), id));
        assert!(!tracker.is_stale(&peer(1), start + TIMEOUT * 10));
    }

    #[test]
    fn test_one_admission_per_peer() {
        let now = Instant::now();
        let mut tracker = AdmissionTracker::new(TIMEOUT);
        assert!(tracker.admit(peer(1), TransferId::new(0, 1), now));
        assert!(!tracker.admit(peer(1), TransferId::new(0, 2), now));
        assert!(tracker.admit(peer(2), TransferId::new(1, 1), now));
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.get(&peer(1)).unwrap().transfer_id, TransferId::new(0, 1));
    }

    #[test]
    fn test_stale_peers_skips_started() {
        let start = Instant::now();
        let mut tracker = AdmissionTracker::new(TIMEOUT);
        tracker.admit(peer(1), TransferId::new(0, 1), start);
        tracker.admit(peer(2), TransferId::new(1, 1), start);
        tracker.mark_started(&peer(2), TransferId::new(1, 1));

        assert!(tracker.stale_peers(start + TIMEOUT).is_empty());
        let later = start + TIMEOUT + Duration::from_secs(1);
        assert_eq!(tracker.stale_peers(later), vec![peer(1)]);
    }

    #[test]
    fn test_mark_started_wrong_transfer() {
        let mut tracker = AdmissionTracker::new(TIMEOUT);
        tracker.admit(peer(1), TransferId::new(0, 1), Instant::now());
        assert!(!tracker.mark_started(&peer(1), TransferId::new(0, 2)));
        assert!(!tracker.mark_started(&peer(2), TransferId::new(0, 1)));
        assert!(!tracker.get(&peer(1)).unwrap().has_started);
    }

    #[test]
    fn test_clear_if_matches_transfer() {
        let mut tracker = AdmissionTracker::new(TIMEOUT);
        tracker.admit(peer(1), TransferId::new(0, 1), Instant::now());
        assert!(!tracker.clear_if(&peer(1), TransferId::new(0, 9)));
        assert!(tracker.is_admitted(&peer(1)));
        assert!(tracker.clear_if(&peer(1), TransferId::new(0, 1)));
        assert!(tracker.is_empty());
        assert!(tracker.clear(&peer(1)).is_none());
    }
}
