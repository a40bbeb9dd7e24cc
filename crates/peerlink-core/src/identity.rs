//! Identifiers used by the channel
//!
//! Peers are identified by the 32-byte public key of their network identity,
//! rendered as lowercase hex. The endpoint additionally hands out two kinds of
//! small integer handles:
//! - **Friend numbers**: the endpoint's local handle for a known peer
//! - **File numbers**: assigned per friend when a transfer is opened
//!
//! A transfer is therefore identified by the `(friend, file)` pair.
//!
//! # Example
//!
//! ```
//! use peerlink_core::identity::PeerId;
//!
//! let peer: PeerId = "0x00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
//!     .parse()
//!     .unwrap();
//! assert_eq!(peer.to_string().len(), 64);
//! ```

use std::fmt;
use std::str::FromStr;

/// Length of a peer public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Endpoint-local handle for a known peer.
pub type FriendNumber = u32;

/// Endpoint-assigned number of a file transfer, unique per friend.
pub type FileNumber = u32;

/// Error type for parsing hex-encoded identifiers
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Invalid hexadecimal encoding
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for the identifier
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected number of bytes
        expected: usize,
        /// Actual number of bytes
        actual: usize,
    },
}

/// Public-key derived identity of a remote peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PUBLIC_KEY_SIZE]);

impl PeerId {
    /// Wrap raw public key bytes.
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a peer id from a key slice.
    ///
    /// Keys longer than 32 bytes (a full connection address carrying its
    /// anti-spam value and checksum) are truncated to the public key.
    pub fn from_key_prefix(key: &[u8]) -> Result<Self, ParseError> {
        if key.len() < PUBLIC_KEY_SIZE {
            return Err(ParseError::InvalidLength {
                expected: PUBLIC_KEY_SIZE,
                actual: key.len(),
            });
        }
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes.copy_from_slice(&key[..PUBLIC_KEY_SIZE]);
        Ok(Self(bytes))
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Lowercase hex rendering (same as `Display`).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form for log lines.
    pub(crate) fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_array(s).map(Self)
    }
}

/// Identity of a transfer as assigned by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId {
    /// Friend the transfer runs with
    pub friend: FriendNumber,
    /// File number within that friend
    pub file: FileNumber,
}

impl TransferId {
    /// Create a transfer id.
    pub const fn new(friend: FriendNumber, file: FileNumber) -> Self {
        Self { friend, file }
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.friend, self.file)
    }
}

/// Decode a hex string of any length (with optional 0x prefix).
///
/// Used for full connection addresses, whose length is owned by the endpoint.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, ParseError> {
    let input = input.trim();
    let stripped = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    Ok(hex::decode(stripped)?)
}

/// Internal helper to parse a fixed-size array from hex string
fn parse_fixed_array<const N: usize>(input: &str) -> Result<[u8; N], ParseError> {
    let bytes = decode_hex(input)?;

    if bytes.len() != N {
        return Err(ParseError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }

    let mut result = [0u8; N];
    result.copy_from_slice(&bytes);
    Ok(result)
}
