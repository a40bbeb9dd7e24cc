//! Public channel API
//!
//! A [`Channel`] owns one network endpoint and the coordinator thread driving
//! it. Messaging and friend management call the endpoint directly from the
//! caller's thread; file transfers are handed to the coordinator and run
//! asynchronously, reporting back through [`Callbacks`] and the per-transfer
//! completion callback.
//!
//! # Example
//!
//! ```no_run
//! use peerlink_core::{Channel, ChannelConfig, NetworkEndpoint, NoopCallbacks};
//! use std::sync::Arc;
//!
//! fn start<E: NetworkEndpoint>() -> peerlink_core::Result<Channel<E>> {
//!     let channel = Channel::create(
//!         "alice",
//!         None,
//!         Arc::new(NoopCallbacks),
//!         ChannelConfig::default(),
//!     )?;
//!     println!("share this address: {}", channel.connection_address());
//!     Ok(channel)
//! }
//! ```

use crate::config::ChannelConfig;
use crate::coordinator::{Command, Coordinator};
use crate::dispatch::{Callbacks, Dispatcher};
use crate::endpoint::{MessageKind, NetworkEndpoint};
use crate::error::{ChannelError, Result};
use crate::identity::{FriendNumber, PeerId, decode_hex};
use crate::transfer::{OnDone, Transfer};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Name of the coordinator thread
const COORDINATOR_THREAD: &str = "peerlink-coordinator";

/// Messaging and file-transfer channel over a [`NetworkEndpoint`].
pub struct Channel<E: NetworkEndpoint> {
    endpoint: Arc<Mutex<E>>,
    commands: Sender<Command>,
    stop: Option<Sender<()>>,
    coordinator: Option<JoinHandle<Coordinator<E>>>,
}

impl<E: NetworkEndpoint> Channel<E> {
    /// Open an endpoint and start the channel.
    ///
    /// Without `saved_state` a fresh identity is created and announced with
    /// `name` and the configured status message. With it, the persisted
    /// identity and friend list are restored as they were.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidName`] for an empty name,
    /// [`ChannelError::InvalidConfig`] for an invalid configuration, and
    /// [`ChannelError::Engine`] when the endpoint cannot be opened.
    pub fn create(
        name: &str,
        saved_state: Option<Vec<u8>>,
        callbacks: Arc<dyn Callbacks>,
        config: ChannelConfig,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(ChannelError::InvalidName);
        }
        config.validate()?;
        let fresh = saved_state.is_none();
        let endpoint = E::open(&config.endpoint_options(saved_state))?;
        Self::from_endpoint(name, endpoint, fresh, callbacks, config)
    }

    /// Start a channel on an already opened endpoint.
    ///
    /// `fresh` marks a newly created identity that still needs its name and
    /// status message.
    pub fn from_endpoint(
        name: &str,
        mut endpoint: E,
        fresh: bool,
        callbacks: Arc<dyn Callbacks>,
        config: ChannelConfig,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(ChannelError::InvalidName);
        }
        config.validate()?;

        if fresh {
            let announced = endpoint
                .set_name(name)
                .and_then(|()| endpoint.set_status_message(&config.status_message));
            if let Err(e) = announced {
                endpoint.kill();
                return Err(e.into());
            }
        }

        if config.bootstrap_nodes.len() < config.min_bootstrap_nodes {
            tracing::warn!(
                "Only {} bootstrap nodes configured (recommended: {})",
                config.bootstrap_nodes.len(),
                config.min_bootstrap_nodes
            );
        }

        let dispatcher = match Dispatcher::new(callbacks) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                endpoint.kill();
                return Err(e.into());
            }
        };

        let endpoint = Arc::new(Mutex::new(endpoint));
        let (commands_tx, commands_rx) = crossbeam_channel::bounded(config.command_capacity);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let coordinator = Coordinator::new(
            Arc::clone(&endpoint),
            dispatcher,
            config,
            commands_rx,
            stop_rx,
        );

        let handle = match thread::Builder::new()
            .name(COORDINATOR_THREAD.to_string())
            .spawn(move || coordinator.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                endpoint.lock().kill();
                return Err(e.into());
            }
        };

        tracing::info!("Channel '{}' started", name);
        Ok(Self {
            endpoint,
            commands: commands_tx,
            stop: Some(stop_tx),
            coordinator: Some(handle),
        })
    }

    /// Stop the coordinator, release the endpoint and cancel every transfer
    /// still running or queued.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.coordinator.take() else {
            return;
        };
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let coordinator = handle.join();
        self.endpoint.lock().kill();
        match coordinator {
            Ok(mut coordinator) => {
                let canceled = coordinator.shutdown_transfers();
                tracing::info!("Channel closed, {} transfers canceled", canceled);
            }
            Err(_) => tracing::error!("Coordinator thread panicked, transfers abandoned"),
        }
    }

    /// Full address others use to send a connection request, as hex.
    pub fn connection_address(&self) -> String {
        hex::encode(self.endpoint.lock().self_address())
    }

    /// Public key part of the own address, as hex.
    pub fn address(&self) -> Result<String> {
        let address = self.endpoint.lock().self_address();
        Ok(PeerId::from_key_prefix(&address)?.to_hex())
    }

    /// Every friend, online or not.
    pub fn friend_addresses(&self) -> Result<Vec<PeerId>> {
        let endpoint = self.endpoint.lock();
        endpoint
            .friend_list()
            .into_iter()
            .map(|friend| -> Result<PeerId> {
                let key = endpoint.friend_public_key(friend)?;
                Ok(PeerId::from_key_prefix(&key)?)
            })
            .collect()
    }

    /// Friends that are currently reachable.
    pub fn online_addresses(&self) -> Result<Vec<PeerId>> {
        let endpoint = self.endpoint.lock();
        let mut online = Vec::new();
        for friend in endpoint.friend_list() {
            if !endpoint.friend_connection_status(friend)?.is_online() {
                continue;
            }
            let key = endpoint.friend_public_key(friend)?;
            online.push(PeerId::from_key_prefix(&key)?);
        }
        Ok(online)
    }

    /// Serialized identity and friend list, to be passed back to
    /// [`Channel::create`] on the next start.
    pub fn persisted_state(&self) -> Vec<u8> {
        self.endpoint.lock().save_data()
    }

    /// Send a text message to an online friend.
    pub fn send(&self, peer: &PeerId, text: &str) -> Result<()> {
        let mut endpoint = self.endpoint.lock();
        let friend = resolve(&*endpoint, peer)?;
        if !endpoint.friend_connection_status(friend)?.is_online() {
            return Err(ChannelError::PeerOffline(*peer));
        }
        endpoint.send_message(friend, MessageKind::Normal, text)?;
        Ok(())
    }

    /// Queue a file for sending.
    ///
    /// Files to one peer are sent one after another in the order they were
    /// queued. The peer does not need to be online: the file waits until it
    /// is. Once queued, `on_done` fires exactly once with the outcome; a file
    /// that is rejected with an error here never fires it.
    ///
    /// # Arguments
    ///
    /// * `peer` - Receiving friend
    /// * `path` - Local file to send
    /// * `name` - Name announced to the peer
    /// * `on_done` - Optional completion callback
    ///
    /// # Errors
    ///
    /// Fails when the peer is unknown, the file cannot be opened, or the
    /// hand-off to the coordinator is full or closed.
    pub fn send_file(
        &self,
        peer: &PeerId,
        path: impl AsRef<Path>,
        name: &str,
        on_done: Option<OnDone>,
    ) -> Result<()> {
        let path = path.as_ref();
        let friend = resolve(&*self.endpoint.lock(), peer)?;
        let file = File::open(path)?;
        let transfer = Transfer::outbound(path, name, *peer, friend, file, on_done)?;

        match self.commands.try_send(Command::Enqueue {
            peer: *peer,
            transfer,
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                tracing::warn!("Send queue full, dropping {:?}", command);
                Err(ChannelError::SendQueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(ChannelError::Closed),
        }
    }

    /// Cancel the transfer reading from or writing to `path`.
    pub fn cancel_file_transfer(&self, path: impl AsRef<Path>) -> Result<()> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.commands
            .send(Command::Cancel {
                path: path.as_ref().to_path_buf(),
                reply,
            })
            .map_err(|_| ChannelError::Closed)?;
        answer.recv().map_err(|_| ChannelError::Closed)?
    }

    /// Completion percentage of every running transfer, by local path.
    pub fn active_transfers(&self) -> Result<HashMap<PathBuf, u8>> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.commands
            .send(Command::ActiveTransfers { reply })
            .map_err(|_| ChannelError::Closed)?;
        answer.recv().map_err(|_| ChannelError::Closed)
    }

    /// Accept a peer that sent a connection request.
    pub fn accept_connection(&self, peer: &PeerId) -> Result<()> {
        self.endpoint
            .lock()
            .friend_add_norequest(peer.as_bytes())?;
        tracing::info!("Accepted connection from {}", peer.short());
        Ok(())
    }

    /// Send a connection request to a full connection address.
    pub fn request_connection(&self, address: &str, message: &str) -> Result<()> {
        let address = decode_hex(address)?;
        self.endpoint.lock().friend_add(&address, message)?;
        Ok(())
    }

    /// Remove a friend.
    pub fn remove_connection(&self, peer: &PeerId) -> Result<()> {
        let mut endpoint = self.endpoint.lock();
        let friend = resolve(&*endpoint, peer)?;
        endpoint.friend_delete(friend)?;
        Ok(())
    }

    /// Whether a friend is currently reachable.
    pub fn is_address_online(&self, peer: &PeerId) -> Result<bool> {
        let endpoint = self.endpoint.lock();
        let friend = resolve(&*endpoint, peer)?;
        Ok(endpoint.friend_connection_status(friend)?.is_online())
    }

    /// Whether the local node is connected to the network.
    pub fn is_online(&self) -> bool {
        self.endpoint.lock().self_connection_status().is_online()
    }

    /// Display name of a friend.
    pub fn name_of(&self, peer: &PeerId) -> Result<String> {
        let endpoint = self.endpoint.lock();
        let friend = resolve(&*endpoint, peer)?;
        Ok(endpoint.friend_name(friend)?)
    }
}

impl<E: NetworkEndpoint> Drop for Channel<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve<E: NetworkEndpoint>(endpoint: &E, peer: &PeerId) -> Result<FriendNumber> {
    endpoint
        .friend_by_public_key(peer.as_bytes())
        .map_err(|e| ChannelError::AddressResolution(format!("{peer}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NoopCallbacks;
    use crate::endpoint::ConnectionStatus;
    use crate::mock::{MockEndpoint, MockHandle};
    use crate::transfer::TransferOutcome;
    use std::io::Write;
    use std::time::{Duration, Instant};
    use tempfile::NamedTempFile;

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            poll_interval_ms: 5,
            admission_interval_secs: 1,
            min_bootstrap_nodes: 0,
            ..ChannelConfig::default()
        }
    }

    fn start() -> (Channel<MockEndpoint>, MockHandle) {
        let endpoint = MockEndpoint::new();
        let mock = endpoint.handle();
        let channel =
            Channel::from_endpoint("alice", endpoint, true, Arc::new(NoopCallbacks), fast_config())
                .unwrap();
        (channel, mock)
    }

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_create_rejects_empty_name() {
        let result = Channel::<MockEndpoint>::create(
            "",
            None,
            Arc::new(NoopCallbacks),
            ChannelConfig::default(),
        );
        assert!(matches!(result, Err(ChannelError::InvalidName)));
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let config = ChannelConfig {
            command_capacity: 0,
            ..ChannelConfig::default()
        };
        let result = Channel::<MockEndpoint>::create("bob", None, Arc::new(NoopCallbacks), config);
        assert!(matches!(result, Err(ChannelError::InvalidConfig(_))));
    }

    #[test]
    fn test_fresh_identity_announced() {
        let (channel, mock) = start();
        assert_eq!(mock.name(), "alice");
        assert_eq!(mock.status_message(), "peerlink peer");
        channel.close();
    }

    #[test]
    fn test_restored_identity_keeps_address() {
        let first = Channel::from_endpoint(
            "alice",
            MockEndpoint::with_key([0x42; 32]),
            true,
            Arc::new(NoopCallbacks),
            fast_config(),
        )
        .unwrap();
        let saved = first.persisted_state();
        let address = first.connection_address();
        first.close();

        let second = Channel::<MockEndpoint>::create(
            "someone else",
            Some(saved),
            Arc::new(NoopCallbacks),
            fast_config(),
        )
        .unwrap();
        assert_eq!(second.connection_address(), address);
        second.close();
    }

    #[test]
    fn test_address_is_key_prefix_of_connection_address() {
        let (channel, _) = start();
        let full = channel.connection_address();
        let short = channel.address().unwrap();
        assert_eq!(full.len(), 76);
        assert_eq!(short, full[..64]);
    }

    #[test]
    fn test_send_requires_online_friend() {
        let (channel, mock) = start();
        assert!(matches!(
            channel.send(&peer(1), "hi"),
            Err(ChannelError::AddressResolution(_))
        ));

        let friend = mock.add_friend([1; 32], ConnectionStatus::None);
        assert!(matches!(
            channel.send(&peer(1), "hi"),
            Err(ChannelError::PeerOffline(_))
        ));

        mock.set_friend_status_quiet(friend, ConnectionStatus::Tcp);
        channel.send(&peer(1), "hi").unwrap();
        assert_eq!(
            mock.messages(),
            vec![(friend, MessageKind::Normal, "hi".to_string())]
        );
    }

    #[test]
    fn test_friend_management() {
        let (channel, mock) = start();
        let online = mock.add_friend([1; 32], ConnectionStatus::Udp);
        mock.add_friend([2; 32], ConnectionStatus::None);

        assert_eq!(channel.friend_addresses().unwrap(), vec![peer(1), peer(2)]);
        assert_eq!(channel.online_addresses().unwrap(), vec![peer(1)]);
        assert!(channel.is_address_online(&peer(1)).unwrap());
        assert!(!channel.is_address_online(&peer(2)).unwrap());
        assert_eq!(channel.name_of(&peer(1)).unwrap(), format!("friend-{online}"));

        channel.accept_connection(&peer(3)).unwrap();
        assert!(mock.has_friend(&[3; 32]));

        channel.remove_connection(&peer(2)).unwrap();
        assert!(!mock.has_friend(&[2; 32]));
        assert!(channel.remove_connection(&peer(2)).is_err());
    }

    #[test]
    fn test_request_connection_decodes_address() {
        let (channel, mock) = start();
        let address = format!("{}deadbeef0000", "04".repeat(32));
        channel.request_connection(&address, "let me in").unwrap();
        assert_eq!(mock.friend_requests()[0].1, "let me in");
        assert!(mock.has_friend(&[4; 32]));

        assert!(matches!(
            channel.request_connection("not hex", "x"),
            Err(ChannelError::AddressResolution(_))
        ));
    }

    #[test]
    fn test_send_file_to_unknown_peer() {
        let (channel, _) = start();
        let tmp = NamedTempFile::new().unwrap();
        assert!(matches!(
            channel.send_file(&peer(9), tmp.path(), "x", None),
            Err(ChannelError::AddressResolution(_))
        ));
    }

    #[test]
    fn test_send_file_missing_file() {
        let (channel, mock) = start();
        mock.add_friend([1; 32], ConnectionStatus::Udp);
        assert!(matches!(
            channel.send_file(&peer(1), "/nonexistent/peerlink/file", "x", None),
            Err(ChannelError::Io(_))
        ));
    }

    #[test]
    fn test_send_file_announced_and_cancelled() {
        let (channel, mock) = start();
        mock.add_friend([1; 32], ConnectionStatus::Udp);
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[1u8; 64]).unwrap();

        let outcome = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outcome);
        channel
            .send_file(
                &peer(1),
                tmp.path(),
                "data.bin",
                Some(Box::new(move |o| *slot.lock() = Some(o))),
            )
            .unwrap();

        assert!(wait_until(|| mock.file_sends().len() == 1));
        assert_eq!(mock.file_sends()[0].size, 64);
        let active = channel.active_transfers().unwrap();
        assert_eq!(active.get(tmp.path()), Some(&0));

        channel.cancel_file_transfer(tmp.path()).unwrap();
        assert_eq!(*outcome.lock(), Some(TransferOutcome::Canceled));
        assert!(matches!(
            channel.cancel_file_transfer(tmp.path()),
            Err(ChannelError::TransferNotFound(_))
        ));
    }

    #[test]
    fn test_send_file_rejects_directory() {
        let (channel, mock) = start();
        mock.add_friend([1; 32], ConnectionStatus::Udp);
        let dir = tempfile::TempDir::new().unwrap();

        match channel.send_file(&peer(1), dir.path(), "dir", None) {
            Err(ChannelError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidInput),
            other => panic!("expected I/O error, got {other:?}"),
        }
        assert!(channel.active_transfers().unwrap().is_empty());
        assert!(mock.file_sends().is_empty());
    }

    #[test]
    fn test_close_cancels_and_kills() {
        let (channel, mock) = start();
        mock.add_friend([1; 32], ConnectionStatus::None);
        let tmp = NamedTempFile::new().unwrap();

        let outcome = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outcome);
        channel
            .send_file(
                &peer(1),
                tmp.path(),
                "queued",
                Some(Box::new(move |o| *slot.lock() = Some(o))),
            )
            .unwrap();

        channel.close();
        assert!(mock.is_killed());
        assert_eq!(*outcome.lock(), Some(TransferOutcome::Canceled));
    }

    #[test]
    fn test_drop_shuts_down() {
        let (channel, mock) = start();
        drop(channel);
        assert!(mock.is_killed());
    }
}
