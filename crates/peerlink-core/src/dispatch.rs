//! Application notifications
//!
//! The application plugs into the channel through [`Callbacks`]. Engine
//! activity reaches it through the [`Dispatcher`], which runs every
//! notification as an independent blocking task on a small tokio runtime so
//! that a slow application never stalls the coordinator loop.
//!
//! The one exception is [`Callbacks::on_allow_file`]: the engine expects an
//! immediate accept/reject answer for an incoming file, so the decision is
//! taken synchronously on the coordinator thread.

use crate::identity::PeerId;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Answer to an incoming file offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDecision {
    /// Whether to receive the file
    pub accept: bool,
    /// Where to write it when accepted
    pub path: PathBuf,
}

impl FileDecision {
    /// Accept the file and write it to `path`.
    pub fn accept(path: impl Into<PathBuf>) -> Self {
        Self {
            accept: true,
            path: path.into(),
        }
    }

    /// Refuse the file.
    pub fn reject() -> Self {
        Self {
            accept: false,
            path: PathBuf::new(),
        }
    }
}

/// Application hooks.
///
/// Every method has a default so implementors only override what they need.
/// Unhandled file offers are rejected.
pub trait Callbacks: Send + Sync + 'static {
    /// Someone sent a friend request.
    fn on_friend_request(&self, _peer: PeerId, _message: String) {}

    /// A friend sent a text message.
    fn on_message(&self, _peer: PeerId, _text: String) {}

    /// A friend offers a file. Runs on the coordinator thread; answer quickly.
    fn on_allow_file(&self, _peer: PeerId, _name: &str) -> FileDecision {
        FileDecision::reject()
    }

    /// A file was received completely.
    fn on_file_received(&self, _peer: PeerId, _path: PathBuf, _name: String) {}

    /// A transfer was canceled by the peer or lost with its connection.
    fn on_file_canceled(&self, _peer: PeerId, _path: PathBuf) {}

    /// A friend came online.
    fn on_connected(&self, _peer: PeerId) {}
}

/// Callbacks that ignore everything and reject every file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}

/// Asynchronous notification for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Friend request received
    NewConnectionRequested {
        /// Requesting peer
        peer: PeerId,
        /// Attached message
        message: String,
    },
    /// Text message received
    MessageReceived {
        /// Sender
        peer: PeerId,
        /// Message body
        text: String,
    },
    /// Peer came online
    PeerConnected {
        /// Peer
        peer: PeerId,
    },
    /// Transfer canceled or lost
    FileTransferCanceled {
        /// Peer
        peer: PeerId,
        /// Local path of the transfer
        path: PathBuf,
    },
    /// Inbound file complete
    FileReceived {
        /// Sender
        peer: PeerId,
        /// Local path of the file
        path: PathBuf,
        /// File name
        name: String,
    },
}

impl Notification {
    fn deliver(self, callbacks: &dyn Callbacks) {
        match self {
            Notification::NewConnectionRequested { peer, message } => {
                callbacks.on_friend_request(peer, message)
            }
            Notification::MessageReceived { peer, text } => callbacks.on_message(peer, text),
            Notification::PeerConnected { peer } => callbacks.on_connected(peer),
            Notification::FileTransferCanceled { peer, path } => {
                callbacks.on_file_canceled(peer, path)
            }
            Notification::FileReceived { peer, path, name } => {
                callbacks.on_file_received(peer, path, name)
            }
        }
    }
}

/// Delivers notifications without blocking the caller.
pub struct Dispatcher {
    callbacks: Arc<dyn Callbacks>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl Dispatcher {
    /// Create a dispatcher with its own notification runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime threads cannot be started.
    pub fn new(callbacks: Arc<dyn Callbacks>) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("peerlink-notify")
            .build()?;
        Ok(Self {
            callbacks,
            runtime: Some(runtime),
        })
    }

    /// Hand a notification to the application on a separate task.
    pub fn notify(&self, notification: Notification) {
        let Some(runtime) = &self.runtime else {
            tracing::warn!("Dispatcher stopped, dropping {:?}", notification);
            return;
        };
        let callbacks = Arc::clone(&self.callbacks);
        runtime.spawn_blocking(move || notification.deliver(callbacks.as_ref()));
    }

    /// Ask the application whether to accept a file. Blocks until answered.
    pub fn allow_file(&self, peer: PeerId, name: &str) -> FileDecision {
        self.callbacks.on_allow_file(peer, name)
    }

    /// Stop the notification runtime without waiting for running callbacks.
    pub fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, Sender, unbounded};
    use std::time::Duration;

    struct Recorder {
        events: Sender<Notification>,
        release: Option<Receiver<()>>,
    }

    impl Callbacks for Recorder {
        fn on_message(&self, peer: PeerId, text: String) {
            if let Some(release) = &self.release {
                let _ = release.recv_timeout(Duration::from_secs(5));
            }
            let _ = self
                .events
                .send(Notification::MessageReceived { peer, text });
        }

        fn on_connected(&self, peer: PeerId) {
            let _ = self.events.send(Notification::PeerConnected { peer });
        }

        fn on_allow_file(&self, _peer: PeerId, name: &str) -> FileDecision {
            FileDecision::accept(format!("/tmp/{name}"))
        }
    }

    fn peer() -> PeerId {
        PeerId::from_bytes([3; 32])
    }

    #[test]
    fn test_notification_delivered() {
        let (tx, rx) = unbounded();
        let dispatcher = Dispatcher::new(Arc::new(Recorder {
            events: tx,
            release: None,
        }))
        .unwrap();

        dispatcher.notify(Notification::PeerConnected { peer: peer() });
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, Notification::PeerConnected { peer: peer() });
    }

    #[test]
    fn test_slow_callback_does_not_block_notify() {
        let (tx, rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let dispatcher = Dispatcher::new(Arc::new(Recorder {
            events: tx,
            release: Some(release_rx),
        }))
        .unwrap();

        // first message blocks inside the callback until released
        dispatcher.notify(Notification::MessageReceived {
            peer: peer(),
            text: "slow".into(),
        });
        dispatcher.notify(Notification::PeerConnected { peer: peer() });

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, Notification::PeerConnected { peer: peer() });

        release_tx.send(()).unwrap();
        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(got, Notification::MessageReceived { .. }));
    }

    #[test]
    fn test_allow_file_is_synchronous() {
        let (tx, _rx) = unbounded();
        let dispatcher = Dispatcher::new(Arc::new(Recorder {
            events: tx,
            release: None,
        }))
        .unwrap();
        let decision = dispatcher.allow_file(peer(), "a.txt");
        assert_eq!(decision, FileDecision::accept("/tmp/a.txt"));
    }

    #[test]
    fn test_noop_callbacks_reject_files() {
        let decision = NoopCallbacks.on_allow_file(peer(), "a.txt");
        assert!(!decision.accept);
    }

    #[test]
    fn test_notify_after_shutdown_is_dropped() {
        let (tx, rx) = unbounded();
        let mut dispatcher = Dispatcher::new(Arc::new(Recorder {
            events: tx,
            release: None,
        }))
        .unwrap();
        dispatcher.shutdown();
        dispatcher.notify(Notification::PeerConnected { peer: peer() });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
