//! Network endpoint abstraction
//!
//! The channel does not implement the peer-to-peer protocol itself. Discovery,
//! encryption, NAT traversal and wire delivery belong to an external engine
//! that is driven through [`NetworkEndpoint`].
//!
//! # Event Model
//!
//! Engines of this kind report activity through callbacks fired while they
//! iterate. Here those callbacks are surfaced as [`EndpointEvent`] values
//! returned from [`NetworkEndpoint::step`], so the caller releases the engine
//! before reacting to them and may freely call back into it (to send chunks
//! or file-control signals) while handling an event.
//!
//! ```text
//! Coordinator                     Endpoint
//!     |                               |
//!     |-- step() -------------------->|
//!     |<-- [ChunkRequested, ...] -----|
//!     |                               |
//!     |-- file_send_chunk() --------->|
//! ```

use crate::identity::{FileNumber, FriendNumber};
use serde::Deserialize;

/// Errors reported by the network endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// The engine could not be created from the given options
    #[error("Endpoint initialization failed: {0}")]
    Init(String),

    /// No friend matches the given key or number
    #[error("Friend not found")]
    FriendNotFound,

    /// The friend is known but not connected
    #[error("Friend not connected")]
    FriendNotConnected,

    /// A friend request could not be sent or accepted
    #[error("Friend request failed: {0}")]
    FriendRequest(String),

    /// File transfer operation rejected by the engine
    #[error("File transfer error: {0}")]
    File(String),

    /// Bootstrapping against a node failed
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    /// Iteration of the engine failed
    #[error("Iteration error: {0}")]
    Step(String),

    /// Any other engine failure
    #[error("{0}")]
    Other(String),
}

/// Connectivity of either the local node or a friend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not connected
    #[default]
    None,
    /// Connected over TCP (relayed)
    Tcp,
    /// Connected over UDP (direct)
    Udp,
}

impl ConnectionStatus {
    /// Whether this status counts as reachable.
    pub fn is_online(self) -> bool {
        self != ConnectionStatus::None
    }
}

/// Kind of a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain message
    Normal,
    /// "/me"-style action
    Action,
}

/// Kind of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Arbitrary data
    Data,
    /// Profile picture
    Avatar,
}

/// Control signal for a running file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileControl {
    /// Accept / continue the transfer
    Resume,
    /// Pause the transfer
    Pause,
    /// Abort the transfer
    Cancel,
}

/// Raw events produced by the engine while it iterates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Someone wants to become a friend
    FriendRequest {
        /// Requesting key (may carry a trailing anti-spam value)
        public_key: Vec<u8>,
        /// Message attached to the request
        message: String,
    },
    /// A friend sent a text message
    FriendMessage {
        /// Sender
        friend: FriendNumber,
        /// Message kind
        kind: MessageKind,
        /// Message body
        text: String,
    },
    /// A friend's connectivity changed
    ConnectionStatus {
        /// Friend whose status changed
        friend: FriendNumber,
        /// New status
        status: ConnectionStatus,
    },
    /// A file-control signal arrived for a transfer
    FileControl {
        /// Remote side
        friend: FriendNumber,
        /// Transfer number
        file: FileNumber,
        /// Signal
        control: FileControl,
    },
    /// A friend wants to send us a file
    FileOpen {
        /// Sender
        friend: FriendNumber,
        /// Transfer number assigned by the engine
        file: FileNumber,
        /// File kind
        kind: FileKind,
        /// Announced size in bytes
        size: u64,
        /// Name the sender chose for the file
        name: String,
    },
    /// A chunk of an inbound file arrived
    ChunkReceived {
        /// Sender
        friend: FriendNumber,
        /// Transfer number
        file: FileNumber,
        /// Offset of the chunk
        position: u64,
        /// Chunk payload (empty marks end of file)
        data: Vec<u8>,
    },
    /// The engine needs the next chunk of an outbound file
    ChunkRequested {
        /// Receiver
        friend: FriendNumber,
        /// Transfer number
        file: FileNumber,
        /// Requested offset
        position: u64,
        /// Requested length
        length: u64,
    },
}

/// Bootstrap node of the wider network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BootstrapNode {
    /// Host name or IP address
    pub host: String,
    /// UDP/TCP port
    pub port: u16,
    /// Node public key (hex)
    pub public_key: String,
}

/// Options used to open an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOptions {
    /// Enable IPv6
    pub ipv6_enabled: bool,
    /// Enable UDP (TCP-only when false)
    pub udp_enabled: bool,
    /// Previously persisted identity state; `None` creates a fresh identity
    pub saved_state: Option<Vec<u8>>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            ipv6_enabled: true,
            udp_enabled: true,
            saved_state: None,
        }
    }
}

/// External peer-to-peer network engine.
///
/// Implementations wrap a concrete protocol stack. All methods are
/// synchronous and expected to return quickly; the channel serializes access
/// behind a mutex.
pub trait NetworkEndpoint: Send + 'static {
    /// Create an engine instance.
    fn open(options: &EndpointOptions) -> Result<Self, EndpointError>
    where
        Self: Sized;

    /// Full connection address (public key + anti-spam value + checksum).
    fn self_address(&self) -> Vec<u8>;

    /// Connectivity of the local node to the wider network.
    fn self_connection_status(&self) -> ConnectionStatus;

    /// Set the display name announced to friends.
    fn set_name(&mut self, name: &str) -> Result<(), EndpointError>;

    /// Set the status message announced to friends.
    fn set_status_message(&mut self, message: &str) -> Result<(), EndpointError>;

    /// Serialized identity and friend list for persistence.
    fn save_data(&self) -> Vec<u8>;

    /// Send a friend request to a full connection address.
    fn friend_add(&mut self, address: &[u8], message: &str) -> Result<FriendNumber, EndpointError>;

    /// Add a friend by public key without sending a request.
    fn friend_add_norequest(&mut self, public_key: &[u8]) -> Result<FriendNumber, EndpointError>;

    /// Remove a friend.
    fn friend_delete(&mut self, friend: FriendNumber) -> Result<(), EndpointError>;

    /// Look up a friend by public key.
    fn friend_by_public_key(&self, public_key: &[u8]) -> Result<FriendNumber, EndpointError>;

    /// Public key of a friend.
    fn friend_public_key(&self, friend: FriendNumber) -> Result<Vec<u8>, EndpointError>;

    /// All known friends.
    fn friend_list(&self) -> Vec<FriendNumber>;

    /// Display name of a friend.
    fn friend_name(&self, friend: FriendNumber) -> Result<String, EndpointError>;

    /// Connectivity of a friend.
    fn friend_connection_status(
        &self,
        friend: FriendNumber,
    ) -> Result<ConnectionStatus, EndpointError>;

    /// Send a text message; returns the engine's message id.
    fn send_message(
        &mut self,
        friend: FriendNumber,
        kind: MessageKind,
        text: &str,
    ) -> Result<u32, EndpointError>;

    /// Announce an outbound file; returns the assigned file number.
    fn file_send(
        &mut self,
        friend: FriendNumber,
        kind: FileKind,
        size: u64,
        name: &str,
    ) -> Result<FileNumber, EndpointError>;

    /// Send a control signal for a transfer.
    fn file_control(
        &mut self,
        friend: FriendNumber,
        file: FileNumber,
        control: FileControl,
    ) -> Result<(), EndpointError>;

    /// Send one chunk of an outbound file.
    fn file_send_chunk(
        &mut self,
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        data: &[u8],
    ) -> Result<(), EndpointError>;

    /// Advance the engine and collect the events it produced.
    fn step(&mut self) -> Result<Vec<EndpointEvent>, EndpointError>;

    /// Attempt to join the network through a bootstrap node.
    fn bootstrap(&mut self, node: &BootstrapNode) -> Result<(), EndpointError>;

    /// Release engine resources. Called once after the coordinator stopped.
    fn kill(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_status_online() {
        assert!(!ConnectionStatus::None.is_online());
        assert!(ConnectionStatus::Tcp.is_online());
        assert!(ConnectionStatus::Udp.is_online());
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::None);
    }

    #[test]
    fn test_endpoint_options_default_fresh_identity() {
        let options = EndpointOptions::default();
        assert!(options.saved_state.is_none());
        assert!(options.udp_enabled);
    }

    #[test]
    fn test_endpoint_error_display() {
        let err = EndpointError::File("no slot".into());
        assert_eq!(err.to_string(), "File transfer error: no slot");
    }
}
