//! Shared helpers for the peerlink integration tests

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use peerlink_core::mock::{MockEndpoint, MockHandle};
use peerlink_core::{
    Callbacks, Channel, ChannelConfig, FileDecision, OnDone, PeerId, TransferOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Notification observed by [`Recorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// Friend request
    FriendRequest(PeerId, String),
    /// Text message
    Message(PeerId, String),
    /// Completed inbound file
    FileReceived(PeerId, PathBuf, String),
    /// Canceled or lost transfer
    FileCanceled(PeerId, PathBuf),
    /// Peer came online
    Connected(PeerId),
}

/// Callbacks that record every notification and accept files into a
/// directory when one is given.
pub struct Recorder {
    events: Sender<Observed>,
    accept_into: Option<PathBuf>,
}

impl Recorder {
    /// Create a recorder and the receiver of its observations.
    pub fn new(accept_into: Option<PathBuf>) -> (Arc<Self>, Receiver<Observed>) {
        let (events, observed) = unbounded();
        (
            Arc::new(Self {
                events,
                accept_into,
            }),
            observed,
        )
    }
}

impl Callbacks for Recorder {
    fn on_friend_request(&self, peer: PeerId, message: String) {
        let _ = self.events.send(Observed::FriendRequest(peer, message));
    }

    fn on_message(&self, peer: PeerId, text: String) {
        let _ = self.events.send(Observed::Message(peer, text));
    }

    fn on_allow_file(&self, _peer: PeerId, name: &str) -> FileDecision {
        match &self.accept_into {
            Some(dir) => FileDecision::accept(dir.join(name)),
            None => FileDecision::reject(),
        }
    }

    fn on_file_received(&self, peer: PeerId, path: PathBuf, name: String) {
        let _ = self.events.send(Observed::FileReceived(peer, path, name));
    }

    fn on_file_canceled(&self, peer: PeerId, path: PathBuf) {
        let _ = self.events.send(Observed::FileCanceled(peer, path));
    }

    fn on_connected(&self, peer: PeerId) {
        let _ = self.events.send(Observed::Connected(peer));
    }
}

/// Install a test log subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration with a fast poll tick and no bootstrap warning.
pub fn fast_config() -> ChannelConfig {
    ChannelConfig {
        poll_interval_ms: 5,
        admission_interval_secs: 1,
        min_bootstrap_nodes: 0,
        ..ChannelConfig::default()
    }
}

/// Start a channel on a fresh mock endpoint.
pub fn start_channel(
    callbacks: Arc<dyn Callbacks>,
    config: ChannelConfig,
) -> (Channel<MockEndpoint>, MockHandle) {
    init_tracing();
    let endpoint = MockEndpoint::new();
    let mock = endpoint.handle();
    let channel = Channel::from_endpoint("tester", endpoint, true, callbacks, config)
        .expect("channel starts");
    (channel, mock)
}

/// Peer id whose key is `n` repeated.
pub fn peer(n: u8) -> PeerId {
    PeerId::from_bytes([n; 32])
}

/// Completion callback recording every outcome it receives.
pub fn outcome_recorder() -> (OnDone, Arc<Mutex<Vec<TransferOutcome>>>) {
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&outcomes);
    let on_done: OnDone = Box::new(move |outcome| seen.lock().push(outcome));
    (on_done, outcomes)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
