//! # peerlink
//!
//! Peer-to-peer messaging and file-transfer channel over an external network
//! engine.
//!
//! This crate provides:
//! - Friend and connection management on top of a [`NetworkEndpoint`]
//! - Text messaging
//! - File transfers with per-peer FIFO queueing, one active send per peer
//!   and reclamation of sends that never start
//! - A single coordinator thread that polls the engine, rejoins the network
//!   and admits queued sends without ever waiting on application code
//!
//! The protocol itself (discovery, encryption, NAT traversal) is supplied by
//! the engine behind [`NetworkEndpoint`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod transfer;

// Scripted in-memory engine for tests
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use channel::Channel;
pub use config::ChannelConfig;
pub use dispatch::{Callbacks, FileDecision, NoopCallbacks};
pub use endpoint::{ConnectionStatus, EndpointError, NetworkEndpoint};
pub use error::{ChannelError, Result};
pub use identity::{PeerId, TransferId};
pub use transfer::{OnDone, TransferOutcome};
