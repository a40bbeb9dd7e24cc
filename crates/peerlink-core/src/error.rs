//! Error types for the channel API

use crate::endpoint::EndpointError;
use crate::identity::{ParseError, PeerId};
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by synchronous channel operations
///
/// Failures that happen asynchronously inside the coordinator (engine
/// iteration, bootstrap, chunk I/O) are logged there and never surface here.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Peer address is malformed or not a known friend
    #[error("Could not resolve address: {0}")]
    AddressResolution(String),

    /// Operation requires the peer to be online
    #[error("Peer {0} is not online")]
    PeerOffline(PeerId),

    /// No transfer writes to or reads from the given path
    #[error("No transfer found for {0}")]
    TransferNotFound(PathBuf),

    /// The hand-off queue towards the coordinator is full
    #[error("Send queue is full")]
    SendQueueFull,

    /// Network endpoint failure
    #[error("Endpoint error: {0}")]
    Engine(#[from] EndpointError),

    /// Local file I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel created without a name
    #[error("Channel name must not be empty")]
    InvalidName,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The coordinator has stopped
    #[error("Channel is closed")]
    Closed,
}

impl From<ParseError> for ChannelError {
    fn from(err: ParseError) -> Self {
        ChannelError::AddressResolution(err.to_string())
    }
}

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;
