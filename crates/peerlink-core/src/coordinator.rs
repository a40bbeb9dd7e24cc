//! Coordinator loop
//!
//! One dedicated thread owns every piece of mutable transfer state: the
//! registry, the per-peer send queues and the admission tracker. It
//! interleaves four kinds of work:
//!
//! - **Poll**: advance the engine and react to the events it produced
//! - **Bootstrap**: rejoin the network while disconnected
//! - **Admission**: reclaim stale sends and start the next queued one per peer
//! - **Commands**: enqueue, cancel and progress queries from [`crate::Channel`]
//!
//! Because all of this runs on one thread, none of the state needs locking
//! and no two handlers ever race for the same transfer. The engine itself is
//! shared with the public API behind a mutex that is only held for the
//! duration of a single engine call.

use crate::config::ChannelConfig;
use crate::dispatch::{Dispatcher, Notification};
use crate::endpoint::{
    ConnectionStatus, EndpointEvent, FileControl, FileKind, MessageKind, NetworkEndpoint,
};
use crate::error::{ChannelError, Result};
use crate::identity::{FileNumber, FriendNumber, PeerId, TransferId};
use crate::transfer::admission::AdmissionTracker;
use crate::transfer::queue::SendQueues;
use crate::transfer::registry::TransferRegistry;
use crate::transfer::{OnDone, Transfer, TransferOutcome};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Work handed to the coordinator from other threads.
pub enum Command {
    /// Queue an outbound transfer
    Enqueue {
        /// Receiving peer
        peer: PeerId,
        /// Pending transfer
        transfer: Transfer,
    },
    /// Cancel the transfer reading from or writing to `path`
    Cancel {
        /// Local path of the transfer
        path: PathBuf,
        /// Result of the cancellation
        reply: Sender<Result<()>>,
    },
    /// Report progress of every registered transfer
    ActiveTransfers {
        /// Path to percentage mapping
        reply: Sender<HashMap<PathBuf, u8>>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Enqueue { peer, transfer } => f
                .debug_struct("Enqueue")
                .field("peer", peer)
                .field("path", &transfer.path())
                .finish(),
            Command::Cancel { path, .. } => f.debug_struct("Cancel").field("path", path).finish(),
            Command::ActiveTransfers { .. } => f.write_str("ActiveTransfers"),
        }
    }
}

/// Single owner of the transfer state.
pub struct Coordinator<E: NetworkEndpoint> {
    endpoint: Arc<Mutex<E>>,
    registry: TransferRegistry,
    queues: SendQueues,
    admissions: AdmissionTracker,
    dispatcher: Dispatcher,
    config: ChannelConfig,
    commands: Receiver<Command>,
    stop: Receiver<()>,
    poll: Receiver<Instant>,
    bootstrap: Receiver<Instant>,
    admission: Receiver<Instant>,
}

impl<E: NetworkEndpoint> Coordinator<E> {
    /// Create a coordinator around a shared endpoint.
    ///
    /// The tick timers start here, not when [`Coordinator::run`] is called.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Engine shared with the public API
    /// * `dispatcher` - Delivers notifications to the application
    /// * `config` - Tick periods, send timeout and bootstrap nodes
    /// * `commands` - Receiving side of the command hand-off
    /// * `stop` - Receiving side of the stop signal
    pub fn new(
        endpoint: Arc<Mutex<E>>,
        dispatcher: Dispatcher,
        config: ChannelConfig,
        commands: Receiver<Command>,
        stop: Receiver<()>,
    ) -> Self {
        let admissions = AdmissionTracker::new(config.send_timeout());
        let poll = crossbeam_channel::tick(config.poll_interval());
        let bootstrap = crossbeam_channel::tick(config.bootstrap_interval());
        let admission = crossbeam_channel::tick(config.admission_interval());
        Self {
            endpoint,
            registry: TransferRegistry::new(),
            queues: SendQueues::new(),
            admissions,
            dispatcher,
            config,
            commands,
            stop,
            poll,
            bootstrap,
            admission,
        }
    }

    /// Registered transfers.
    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Pending outbound transfers.
    pub fn queues(&self) -> &SendQueues {
        &self.queues
    }

    /// Outbound admissions.
    pub fn admissions(&self) -> &AdmissionTracker {
        &self.admissions
    }

    /// Run until stopped, then hand the coordinator back for shutdown.
    ///
    /// The stop signal (or the loss of its sender) is checked before every
    /// wait so that a busy engine cannot delay shutdown indefinitely.
    pub fn run(mut self) -> Self {
        let poll = self.poll.clone();
        let bootstrap = self.bootstrap.clone();
        let admission = self.admission.clone();
        let stop = self.stop.clone();
        let commands = self.commands.clone();
        tracing::info!("Coordinator started");

        loop {
            match stop.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            let running = crossbeam_channel::select! {
                recv(stop) -> _ => false,
                recv(poll) -> _ => {
                    self.poll_network();
                    true
                }
                recv(bootstrap) -> _ => {
                    self.run_bootstrap();
                    true
                }
                recv(admission) -> _ => {
                    self.run_admission(Instant::now());
                    true
                }
                recv(commands) -> command => match command {
                    Ok(command) => {
                        self.handle_command(command);
                        true
                    }
                    Err(_) => false,
                },
            };
            if !running {
                break;
            }
        }

        tracing::info!("Coordinator stopped");
        self
    }

    /// Advance the engine once and handle every event it produced.
    pub fn poll_network(&mut self) {
        let events = self.endpoint.lock().step();
        match events {
            Ok(events) => {
                for event in events {
                    self.handle_event(event);
                }
            }
            Err(e) => tracing::warn!("Endpoint iteration failed: {}", e),
        }
    }

    /// Rejoin the network through the configured nodes unless connected.
    pub fn run_bootstrap(&mut self) {
        let mut endpoint = self.endpoint.lock();
        if endpoint.self_connection_status().is_online() {
            tracing::trace!("Connected, skipping bootstrap");
            return;
        }

        let nodes = &self.config.bootstrap_nodes;
        tracing::info!("Bootstrapping with {} nodes", nodes.len());
        for node in nodes {
            if let Err(e) = endpoint.bootstrap(node) {
                tracing::warn!("Bootstrap via {}:{} failed: {}", node.host, node.port, e);
            }
        }
    }

    /// Reclaim stale admissions, then admit the next queued send of every
    /// online peer without one.
    ///
    /// A peer whose admission was reclaimed in this cycle gets its next send
    /// admitted on the following cycle.
    pub fn run_admission(&mut self, now: Instant) {
        let mut reclaimed = HashSet::new();
        for peer in self.admissions.stale_peers(now) {
            let Some(admission) = self.admissions.clear(&peer) else {
                continue;
            };
            let id = admission.transfer_id;
            tracing::info!(
                "Send {} to {} never started within {:?}, reclaiming",
                id,
                peer.short(),
                self.admissions.timeout()
            );
            self.send_control(id, FileControl::Cancel);
            self.registry.close(&id, TransferOutcome::TimedOut);
            reclaimed.insert(peer);
        }

        for peer in self.queues.peers_with_pending() {
            if reclaimed.contains(&peer) || self.admissions.is_admitted(&peer) {
                continue;
            }
            let Some(friend) = self.online_friend(&peer) else {
                continue;
            };
            self.admit_next(peer, friend, now);
        }
    }

    /// Friend number of `peer` if it is currently reachable.
    fn online_friend(&self, peer: &PeerId) -> Option<FriendNumber> {
        let endpoint = self.endpoint.lock();
        let friend = match endpoint.friend_by_public_key(peer.as_bytes()) {
            Ok(friend) => friend,
            Err(e) => {
                tracing::debug!("Queued sends for {} wait: {}", peer.short(), e);
                return None;
            }
        };
        match endpoint.friend_connection_status(friend) {
            Ok(status) if status.is_online() => Some(friend),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Status of {} unavailable: {}", peer.short(), e);
                None
            }
        }
    }

    fn admit_next(&mut self, peer: PeerId, friend: FriendNumber, now: Instant) {
        let Some(mut transfer) = self.queues.dequeue(&peer) else {
            return;
        };

        let announced =
            self.endpoint
                .lock()
                .file_send(friend, FileKind::Data, transfer.size(), transfer.name());
        match announced {
            Ok(file) => {
                let id = TransferId::new(friend, file);
                transfer.admit(id);
                tracing::debug!(
                    "Admitted {} to {} as {}",
                    transfer.path().display(),
                    peer.short(),
                    id
                );
                self.admissions.admit(peer, id, now);
                if let Some(mut replaced) = self.registry.insert(id, transfer) {
                    tracing::warn!("Transfer id {} reused while still registered", id);
                    replaced.close(TransferOutcome::Failed);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Announcing {} to {} failed: {}",
                    transfer.path().display(),
                    peer.short(),
                    e
                );
                transfer.close(TransferOutcome::Failed);
            }
        }
    }

    /// Apply a command from the public API.
    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { peer, transfer } => {
                tracing::debug!(
                    "Queued {} for {}",
                    transfer.path().display(),
                    peer.short()
                );
                self.queues.enqueue(peer, Some(transfer));
            }
            Command::Cancel { path, reply } => {
                let result = self.cancel_transfer(&path);
                if reply.send(result).is_err() {
                    tracing::debug!("Cancel caller for {} went away", path.display());
                }
            }
            Command::ActiveTransfers { reply } => {
                if reply.send(self.registry.progress()).is_err() {
                    tracing::debug!("Progress caller went away");
                }
            }
        }
    }

    /// Cancel a registered or queued transfer by its local path.
    pub fn cancel_transfer(&mut self, path: &Path) -> Result<()> {
        if let Some(id) = self.registry.find_by_path(path) {
            self.send_control(id, FileControl::Cancel);
            if let Some(transfer) = self.registry.close(&id, TransferOutcome::Canceled) {
                self.admissions.clear_if(&transfer.peer(), id);
            }
            return Ok(());
        }
        if let Some(mut transfer) = self.queues.remove_by_path(path) {
            transfer.close(TransferOutcome::Canceled);
            return Ok(());
        }
        Err(ChannelError::TransferNotFound(path.to_path_buf()))
    }

    /// React to one engine event.
    pub fn handle_event(&mut self, event: EndpointEvent) {
        match event {
            EndpointEvent::FriendRequest {
                public_key,
                message,
            } => match PeerId::from_key_prefix(&public_key) {
                Ok(peer) => self
                    .dispatcher
                    .notify(Notification::NewConnectionRequested { peer, message }),
                Err(e) => tracing::warn!("Dropping friend request with bad key: {}", e),
            },
            EndpointEvent::FriendMessage { friend, kind, text } => {
                if kind != MessageKind::Normal {
                    tracing::debug!("Ignoring {:?} message from friend {}", kind, friend);
                    return;
                }
                if let Some(peer) = self.peer_of(friend) {
                    self.dispatcher
                        .notify(Notification::MessageReceived { peer, text });
                }
            }
            EndpointEvent::ConnectionStatus { friend, status } => {
                self.on_connection_status(friend, status)
            }
            EndpointEvent::FileControl {
                friend,
                file,
                control,
            } => {
                if control == FileControl::Cancel {
                    self.on_remote_cancel(TransferId::new(friend, file));
                } else {
                    tracing::trace!("{:?} for transfer {}:{}", control, friend, file);
                }
            }
            EndpointEvent::FileOpen {
                friend,
                file,
                kind,
                size,
                name,
            } => self.on_file_open(friend, file, kind, size, name),
            EndpointEvent::ChunkReceived {
                friend,
                file,
                position,
                data,
            } => self.on_chunk_received(TransferId::new(friend, file), position, &data),
            EndpointEvent::ChunkRequested {
                friend,
                file,
                position,
                length,
            } => self.on_chunk_requested(TransferId::new(friend, file), position, length),
        }
    }

    /// Public key of a friend, or `None` (logged) when the engine lost it.
    fn peer_of(&self, friend: FriendNumber) -> Option<PeerId> {
        let key = match self.endpoint.lock().friend_public_key(friend) {
            Ok(key) => key,
            Err(e) => {
                tracing::error!("Cannot resolve friend {}: {}", friend, e);
                return None;
            }
        };
        match PeerId::from_key_prefix(&key) {
            Ok(peer) => Some(peer),
            Err(e) => {
                tracing::error!("Friend {} has a malformed key: {}", friend, e);
                None
            }
        }
    }

    fn send_control(&self, id: TransferId, control: FileControl) {
        if let Err(e) = self.endpoint.lock().file_control(id.friend, id.file, control) {
            tracing::warn!("Sending {:?} for {} failed: {}", control, id, e);
        }
    }

    fn on_connection_status(&mut self, friend: FriendNumber, status: ConnectionStatus) {
        if status.is_online() {
            tracing::info!("Friend {} online ({:?})", friend, status);
            if let Some(peer) = self.peer_of(friend) {
                self.dispatcher.notify(Notification::PeerConnected { peer });
            }
            return;
        }

        // queued sends stay queued until the peer returns
        tracing::info!("Friend {} offline", friend);
        for id in self.registry.ids_for_friend(friend) {
            let Some(transfer) = self.registry.close(&id, TransferOutcome::Failed) else {
                continue;
            };
            self.admissions.clear_if(&transfer.peer(), id);
            self.dispatcher.notify(Notification::FileTransferCanceled {
                peer: transfer.peer(),
                path: transfer.path().to_path_buf(),
            });
        }
    }

    fn on_remote_cancel(&mut self, id: TransferId) {
        let Some(transfer) = self.registry.close(&id, TransferOutcome::Canceled) else {
            tracing::debug!("Cancel for untracked transfer {}", id);
            return;
        };
        tracing::info!("Transfer {} canceled by peer", id);
        self.admissions.clear_if(&transfer.peer(), id);
        self.dispatcher.notify(Notification::FileTransferCanceled {
            peer: transfer.peer(),
            path: transfer.path().to_path_buf(),
        });
    }

    fn on_file_open(
        &mut self,
        friend: FriendNumber,
        file: FileNumber,
        kind: FileKind,
        size: u64,
        name: String,
    ) {
        let id = TransferId::new(friend, file);
        if kind != FileKind::Data {
            tracing::debug!("Refusing {:?} transfer {}", kind, id);
            self.send_control(id, FileControl::Cancel);
            return;
        }
        let Some(peer) = self.peer_of(friend) else {
            self.send_control(id, FileControl::Cancel);
            return;
        };

        let decision = self.dispatcher.allow_file(peer, &name);
        if !decision.accept {
            tracing::debug!("Application rejected {} from {}", name, peer.short());
            self.send_control(id, FileControl::Cancel);
            return;
        }

        let path = decision.path;
        let destination = match File::create(&path) {
            Ok(destination) => destination,
            Err(e) => {
                tracing::warn!("Cannot create {}: {}", path.display(), e);
                self.send_control(id, FileControl::Cancel);
                return;
            }
        };

        let logged = path.clone();
        let on_done: OnDone = Box::new(move |outcome| {
            if outcome != TransferOutcome::Success {
                tracing::warn!("Receiving {} ended: {}", logged.display(), outcome);
            }
        });
        let mut transfer =
            Transfer::inbound(id, path, name, peer, destination, size, Some(on_done));

        let resumed = self
            .endpoint
            .lock()
            .file_control(friend, file, FileControl::Resume);
        if let Err(e) = resumed {
            tracing::warn!("Accepting transfer {} failed: {}", id, e);
            transfer.close(TransferOutcome::Failed);
            return;
        }

        transfer.activate();
        tracing::info!(
            "Receiving {} ({} bytes) from {}",
            transfer.path().display(),
            size,
            peer.short()
        );
        if let Some(mut replaced) = self.registry.insert(id, transfer) {
            tracing::warn!("Transfer id {} reused while still registered", id);
            replaced.close(TransferOutcome::Failed);
        }
    }

    fn on_chunk_received(&mut self, id: TransferId, position: u64, data: &[u8]) {
        let Some(transfer) = self.registry.get_mut(&id) else {
            // an empty chunk only marks the end of a transfer we no longer track
            if !data.is_empty() {
                tracing::debug!("Chunk for unknown transfer {}, canceling", id);
                self.send_control(id, FileControl::Cancel);
            }
            return;
        };

        if let Err(e) = transfer.write_chunk(position, data) {
            tracing::warn!("Writing {} failed: {}", transfer.path().display(), e);
            self.send_control(id, FileControl::Cancel);
            self.registry.close(&id, TransferOutcome::Failed);
            return;
        }

        let end = position + data.len() as u64;
        transfer.record_progress(end);
        tracing::trace!("Transfer {}: received {} bytes at {}", id, data.len(), position);
        if end < transfer.size() {
            return;
        }

        let Some(transfer) = self.registry.close(&id, TransferOutcome::Success) else {
            return;
        };
        let path = transfer.path().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| transfer.name().to_string());
        tracing::info!("Received {} from {}", path.display(), transfer.peer().short());
        self.dispatcher.notify(Notification::FileReceived {
            peer: transfer.peer(),
            path,
            name,
        });
    }

    fn on_chunk_requested(&mut self, id: TransferId, position: u64, length: u64) {
        let Some(transfer) = self.registry.get_mut(&id) else {
            tracing::debug!("Chunk request for unknown transfer {}", id);
            return;
        };
        let peer = transfer.peer();
        if !self.admissions.mark_started(&peer, id) {
            tracing::debug!("Transfer {} streams without an admission", id);
        }
        transfer.activate();

        let length = length.min(transfer.size().saturating_sub(position));
        if length == 0 {
            self.registry.close(&id, TransferOutcome::Success);
            self.admissions.clear_if(&peer, id);
            return;
        }

        let data = match usize::try_from(length)
            .map_err(std::io::Error::other)
            .and_then(|length| transfer.read_chunk(position, length))
        {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Reading {} failed: {}", transfer.path().display(), e);
                self.send_control(id, FileControl::Cancel);
                self.registry.close(&id, TransferOutcome::Failed);
                self.admissions.clear_if(&peer, id);
                return;
            }
        };

        if let Err(e) = self
            .endpoint
            .lock()
            .file_send_chunk(id.friend, id.file, position, &data)
        {
            tracing::warn!("Sending chunk of {} failed: {}", id, e);
        }
        transfer.record_progress(position + length);
    }

    /// Close everything still held as `Canceled`, including transfers whose
    /// enqueue command never got processed, and stop the dispatcher.
    ///
    /// Returns the number of transfers closed.
    pub fn shutdown_transfers(&mut self) -> usize {
        let mut closed = self.registry.close_all(TransferOutcome::Canceled);
        for mut transfer in self.queues.drain_all() {
            if transfer.close(TransferOutcome::Canceled) {
                closed += 1;
            }
        }
        for command in self.commands.try_iter() {
            match command {
                Command::Enqueue { mut transfer, .. } => {
                    if transfer.close(TransferOutcome::Canceled) {
                        closed += 1;
                    }
                }
                Command::Cancel { reply, .. } => {
                    let _ = reply.send(Err(ChannelError::Closed));
                }
                Command::ActiveTransfers { reply } => {
                    let _ = reply.send(HashMap::new());
                }
            }
        }
        self.admissions.clear_all();
        self.dispatcher.shutdown();
        closed
    }
}
