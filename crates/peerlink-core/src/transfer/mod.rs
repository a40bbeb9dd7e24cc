//! File transfers and their lifecycle
//!
//! A [`Transfer`] is one file being sent to or received from a peer. It owns
//! the open file handle and the completion callback, and moves through a
//! small state machine:
//!
//! ```text
//! Pending ──admit──> Admitted ──activate──> Active
//!    │                  │                     │
//!    └──────────────────┴───────close─────────┴──> Terminal(outcome)
//! ```
//!
//! Outbound transfers start `Pending` (no network id yet) and sit in a
//! per-peer [`queue::SendQueues`] until the coordinator admits them. Inbound
//! transfers start `Admitted`, since the engine assigned their id when the
//! peer opened them.
//!
//! Closing is idempotent. The first [`Transfer::close`] flushes and releases
//! the file and fires the completion callback; later calls only log.

pub mod admission;
pub mod queue;
pub mod registry;

use crate::identity::{FriendNumber, PeerId, TransferId};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Completion callback of a transfer. Invoked exactly once.
pub type OnDone = Box<dyn FnOnce(TransferOutcome) + Send + 'static>;

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All bytes were delivered
    Success,
    /// Engine or I/O failure, or the peer went offline
    Failed,
    /// Canceled locally, by the peer, or by shutdown
    Canceled,
    /// Admitted but never started streaming in time
    TimedOut,
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferOutcome::Success => "success",
            TransferOutcome::Failed => "failed",
            TransferOutcome::Canceled => "canceled",
            TransferOutcome::TimedOut => "timeout",
        };
        f.write_str(s)
    }
}

/// Lifecycle phase of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Queued, no network id assigned
    Pending,
    /// Network id assigned, no data flowing yet
    Admitted,
    /// Chunks are flowing
    Active,
    /// Finished; the file is released and the callback has fired
    Terminal(TransferOutcome),
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We send the file
    Outbound,
    /// We receive the file
    Inbound,
}

/// One file send or receive.
pub struct Transfer {
    path: PathBuf,
    name: String,
    peer: PeerId,
    friend: FriendNumber,
    direction: Direction,
    id: Option<TransferId>,
    phase: TransferPhase,
    file: Option<File>,
    size: u64,
    transferred: u64,
    on_done: Option<OnDone>,
}

impl Transfer {
    /// Create an outbound transfer for an opened source file.
    ///
    /// The size is taken from the file's metadata, which also verifies that
    /// the handle refers to a regular file.
    ///
    /// # Arguments
    ///
    /// * `path` - Local path of the file
    /// * `name` - Name announced to the peer
    /// * `peer` - Receiving peer
    /// * `friend` - Endpoint friend number of the peer
    /// * `file` - Open handle of the file
    /// * `on_done` - Optional completion callback
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the metadata cannot be read, or one of kind
    /// [`io::ErrorKind::InvalidInput`] when the handle is not a regular file.
    pub fn outbound(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        peer: PeerId,
        friend: FriendNumber,
        file: File,
        on_done: Option<OnDone>,
    ) -> io::Result<Self> {
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
        }
        let size = metadata.len();
        Ok(Self {
            path: path.into(),
            name: name.into(),
            peer,
            friend,
            direction: Direction::Outbound,
            id: None,
            phase: TransferPhase::Pending,
            file: Some(file),
            size,
            transferred: 0,
            on_done,
        })
    }

    /// Create an inbound transfer writing into `file`.
    pub fn inbound(
        id: TransferId,
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        peer: PeerId,
        file: File,
        size: u64,
        on_done: Option<OnDone>,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            peer,
            friend: id.friend,
            direction: Direction::Inbound,
            id: Some(id),
            phase: TransferPhase::Admitted,
            file: Some(file),
            size,
            transferred: 0,
            on_done,
        }
    }

    /// Local path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Peer-facing name of the file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote peer.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Endpoint friend number of the remote peer.
    pub fn friend(&self) -> FriendNumber {
        self.friend
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Network id, once assigned.
    pub fn id(&self) -> Option<TransferId> {
        self.id
    }

    /// Current phase.
    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes transferred so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Whether the transfer has been closed.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, TransferPhase::Terminal(_))
    }

    /// Outcome, once closed.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        match self.phase {
            TransferPhase::Terminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Record the network id assigned on admission (`Pending` -> `Admitted`).
    pub fn admit(&mut self, id: TransferId) {
        if self.phase != TransferPhase::Pending {
            tracing::warn!(
                "Transfer {}: admit ignored in phase {:?}",
                self.path.display(),
                self.phase
            );
            return;
        }
        self.friend = id.friend;
        self.id = Some(id);
        self.phase = TransferPhase::Admitted;
    }

    /// Mark the transfer as streaming (`Admitted` -> `Active`).
    pub fn activate(&mut self) {
        if self.phase == TransferPhase::Admitted {
            self.phase = TransferPhase::Active;
        }
    }

    /// Record cumulative progress.
    ///
    /// Offsets must be non-decreasing; a smaller offset than already recorded
    /// is ignored.
    pub fn record_progress(&mut self, offset: u64) {
        if offset < self.transferred {
            tracing::trace!(
                "Transfer {}: ignoring regressing offset {} < {}",
                self.path.display(),
                offset,
                self.transferred
            );
            return;
        }
        self.transferred = offset;
    }

    /// Completed share in whole percent, `0` for empty files.
    pub fn percentage(&self) -> u8 {
        if self.size == 0 {
            return 0;
        }
        let percent = (u128::from(self.transferred) * 100) / u128::from(self.size);
        percent.min(100) as u8
    }

    /// Read `length` bytes at `position` from the held file.
    pub fn read_chunk(&mut self, position: u64, length: usize) -> io::Result<Vec<u8>> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(position))?;
        let mut data = vec![0u8; length];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Write `data` at `position` into the held file.
    pub fn write_chunk(&mut self, position: u64, data: &[u8]) -> io::Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(position))?;
        file.write_all(data)
    }

    /// Finish the transfer.
    ///
    /// The first call flushes the file to stable storage, releases the handle
    /// and invokes the completion callback with `outcome`. I/O errors while
    /// flushing are logged only: the network side cannot be rolled back, so
    /// the transfer ends regardless. Returns `false` when the transfer was
    /// already closed, in which case nothing happens.
    pub fn close(&mut self, outcome: TransferOutcome) -> bool {
        if let TransferPhase::Terminal(previous) = self.phase {
            tracing::warn!(
                "Transfer {}: already closed ({}), ignoring close({})",
                self.path.display(),
                previous,
                outcome
            );
            return false;
        }

        tracing::debug!(
            "Transfer {}: closing as {} ({}/{} bytes)",
            self.path.display(),
            outcome,
            self.transferred,
            self.size
        );
        self.phase = TransferPhase::Terminal(outcome);

        if let Some(file) = self.file.take() {
            if let Err(e) = file.sync_all() {
                tracing::warn!("Transfer {}: sync failed: {}", self.path.display(), e);
            }
            drop(file);
        }

        if let Some(on_done) = self.on_done.take() {
            on_done(outcome);
        }
        true
    }

    fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("transfer file is closed"))
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("direction", &self.direction)
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("size", &self.size)
            .field("transferred", &self.transferred)
            .finish_non_exhaustive()
    }
}
