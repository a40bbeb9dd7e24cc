//! Scripted in-memory endpoint
//!
//! [`MockEndpoint`] implements [`NetworkEndpoint`] without any networking.
//! Tests keep a [`MockHandle`] to the shared state so they can script friends
//! and connectivity, queue events for the next `step()`, and inspect every
//! call the channel made into the engine.

use crate::endpoint::{
    BootstrapNode, ConnectionStatus, EndpointError, EndpointEvent, EndpointOptions, FileControl,
    FileKind, MessageKind, NetworkEndpoint,
};
use crate::identity::{FileNumber, FriendNumber, PUBLIC_KEY_SIZE};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Anti-spam value appended to the mock's public key in its address
const NOSPAM: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

/// Key used when no saved state is given
const DEFAULT_KEY: [u8; PUBLIC_KEY_SIZE] = [0xa1; PUBLIC_KEY_SIZE];

#[derive(Debug, Clone)]
struct MockFriend {
    public_key: [u8; PUBLIC_KEY_SIZE],
    name: String,
    status: ConnectionStatus,
}

/// Announced outbound file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSendCall {
    /// Receiving friend
    pub friend: FriendNumber,
    /// Assigned file number
    pub file: FileNumber,
    /// Announced size
    pub size: u64,
    /// Announced name
    pub name: String,
}

/// Chunk handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCall {
    /// Receiving friend
    pub friend: FriendNumber,
    /// File number
    pub file: FileNumber,
    /// Offset of the chunk
    pub position: u64,
    /// Payload
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    self_key: [u8; PUBLIC_KEY_SIZE],
    self_status: ConnectionStatus,
    name: String,
    status_message: String,
    friends: BTreeMap<FriendNumber, MockFriend>,
    next_friend: FriendNumber,
    next_file: HashMap<FriendNumber, FileNumber>,
    next_message: u32,
    events: VecDeque<EndpointEvent>,
    friend_requests: Vec<(Vec<u8>, String)>,
    messages: Vec<(FriendNumber, MessageKind, String)>,
    file_sends: Vec<FileSendCall>,
    controls: Vec<(FriendNumber, FileNumber, FileControl)>,
    chunks: Vec<ChunkCall>,
    bootstraps: usize,
    bootstrap_connects: bool,
    fail_file_send: bool,
    fail_step: bool,
    killed: bool,
}

impl MockState {
    fn friend(&self, friend: FriendNumber) -> Result<&MockFriend, EndpointError> {
        self.friends.get(&friend).ok_or(EndpointError::FriendNotFound)
    }

    fn find_key(&self, key: &[u8]) -> Option<FriendNumber> {
        self.friends
            .iter()
            .find(|(_, f)| f.public_key.as_slice() == key)
            .map(|(number, _)| *number)
    }

    fn insert_friend(
        &mut self,
        public_key: [u8; PUBLIC_KEY_SIZE],
        status: ConnectionStatus,
    ) -> FriendNumber {
        let number = self.next_friend;
        self.next_friend += 1;
        self.friends.insert(
            number,
            MockFriend {
                public_key,
                name: format!("friend-{number}"),
                status,
            },
        );
        number
    }
}

fn key_of(bytes: &[u8]) -> Result<[u8; PUBLIC_KEY_SIZE], EndpointError> {
    bytes
        .get(..PUBLIC_KEY_SIZE)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or_else(|| EndpointError::FriendRequest("key too short".into()))
}

/// In-memory [`NetworkEndpoint`].
#[derive(Debug)]
pub struct MockEndpoint {
    state: Arc<Mutex<MockState>>,
}

/// Test-side handle to a [`MockEndpoint`]'s state.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockEndpoint {
    /// Fresh endpoint with the default identity key.
    pub fn new() -> Self {
        Self::with_key(DEFAULT_KEY)
    }

    /// Fresh endpoint with the given identity key.
    pub fn with_key(key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let state = MockState {
            self_key: key,
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Handle for scripting and inspecting this endpoint.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Add a friend with the given key and connectivity.
    pub fn add_friend(
        &self,
        public_key: [u8; PUBLIC_KEY_SIZE],
        status: ConnectionStatus,
    ) -> FriendNumber {
        self.state.lock().insert_friend(public_key, status)
    }

    /// Change a friend's connectivity and queue the matching event.
    pub fn set_friend_status(&self, friend: FriendNumber, status: ConnectionStatus) {
        let mut state = self.state.lock();
        if let Some(entry) = state.friends.get_mut(&friend) {
            entry.status = status;
        }
        state
            .events
            .push_back(EndpointEvent::ConnectionStatus { friend, status });
    }

    /// Change a friend's connectivity silently.
    pub fn set_friend_status_quiet(&self, friend: FriendNumber, status: ConnectionStatus) {
        if let Some(entry) = self.state.lock().friends.get_mut(&friend) {
            entry.status = status;
        }
    }

    /// Set the local node's connectivity.
    pub fn set_self_status(&self, status: ConnectionStatus) {
        self.state.lock().self_status = status;
    }

    /// Let the next bootstrap attempt connect the local node.
    pub fn set_bootstrap_connects(&self, connects: bool) {
        self.state.lock().bootstrap_connects = connects;
    }

    /// Make every `file_send` fail.
    pub fn set_fail_file_send(&self, fail: bool) {
        self.state.lock().fail_file_send = fail;
    }

    /// Make every `step` fail.
    pub fn set_fail_step(&self, fail: bool) {
        self.state.lock().fail_step = fail;
    }

    /// Queue an event for the next `step`.
    pub fn push_event(&self, event: EndpointEvent) {
        self.state.lock().events.push_back(event);
    }

    /// Number of events not yet consumed by `step`.
    pub fn pending_events(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Display name set on the local node.
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Status message set on the local node.
    pub fn status_message(&self) -> String {
        self.state.lock().status_message.clone()
    }

    /// Friend requests sent through `friend_add`.
    pub fn friend_requests(&self) -> Vec<(Vec<u8>, String)> {
        self.state.lock().friend_requests.clone()
    }

    /// Whether a friend with this key exists.
    pub fn has_friend(&self, public_key: &[u8]) -> bool {
        self.state.lock().find_key(public_key).is_some()
    }

    /// Text messages sent.
    pub fn messages(&self) -> Vec<(FriendNumber, MessageKind, String)> {
        self.state.lock().messages.clone()
    }

    /// Outbound files announced.
    pub fn file_sends(&self) -> Vec<FileSendCall> {
        self.state.lock().file_sends.clone()
    }

    /// File-control signals sent.
    pub fn controls(&self) -> Vec<(FriendNumber, FileNumber, FileControl)> {
        self.state.lock().controls.clone()
    }

    /// Chunks sent.
    pub fn chunks(&self) -> Vec<ChunkCall> {
        self.state.lock().chunks.clone()
    }

    /// Number of bootstrap attempts.
    pub fn bootstrap_count(&self) -> usize {
        self.state.lock().bootstraps
    }

    /// Whether `kill` was called.
    pub fn is_killed(&self) -> bool {
        self.state.lock().killed
    }
}

impl NetworkEndpoint for MockEndpoint {
    fn open(options: &EndpointOptions) -> Result<Self, EndpointError> {
        let Some(saved) = &options.saved_state else {
            return Ok(Self::new());
        };
        // saved state layout: key, then the display name
        let key = key_of(saved).map_err(|_| EndpointError::Init("corrupt saved state".into()))?;
        let endpoint = Self::with_key(key);
        endpoint.state.lock().name =
            String::from_utf8_lossy(&saved[PUBLIC_KEY_SIZE..]).into_owned();
        Ok(endpoint)
    }

    fn self_address(&self) -> Vec<u8> {
        let state = self.state.lock();
        let mut address = state.self_key.to_vec();
        address.extend_from_slice(&NOSPAM);
        let checksum = address.chunks(2).fold([0u8; 2], |acc, pair| {
            [acc[0] ^ pair[0], acc[1] ^ pair.get(1).copied().unwrap_or(0)]
        });
        address.extend_from_slice(&checksum);
        address
    }

    fn self_connection_status(&self) -> ConnectionStatus {
        self.state.lock().self_status
    }

    fn set_name(&mut self, name: &str) -> Result<(), EndpointError> {
        self.state.lock().name = name.to_string();
        Ok(())
    }

    fn set_status_message(&mut self, message: &str) -> Result<(), EndpointError> {
        self.state.lock().status_message = message.to_string();
        Ok(())
    }

    fn save_data(&self) -> Vec<u8> {
        let state = self.state.lock();
        let mut data = state.self_key.to_vec();
        data.extend_from_slice(state.name.as_bytes());
        data
    }

    fn friend_add(&mut self, address: &[u8], message: &str) -> Result<FriendNumber, EndpointError> {
        let key = key_of(address)?;
        let mut state = self.state.lock();
        if state.find_key(&key).is_some() {
            return Err(EndpointError::FriendRequest("already a friend".into()));
        }
        state.friend_requests.push((address.to_vec(), message.to_string()));
        Ok(state.insert_friend(key, ConnectionStatus::None))
    }

    fn friend_add_norequest(&mut self, public_key: &[u8]) -> Result<FriendNumber, EndpointError> {
        let key = key_of(public_key)?;
        let mut state = self.state.lock();
        if let Some(existing) = state.find_key(&key) {
            return Ok(existing);
        }
        Ok(state.insert_friend(key, ConnectionStatus::None))
    }

    fn friend_delete(&mut self, friend: FriendNumber) -> Result<(), EndpointError> {
        self.state
            .lock()
            .friends
            .remove(&friend)
            .map(|_| ())
            .ok_or(EndpointError::FriendNotFound)
    }

    fn friend_by_public_key(&self, public_key: &[u8]) -> Result<FriendNumber, EndpointError> {
        self.state
            .lock()
            .find_key(public_key)
            .ok_or(EndpointError::FriendNotFound)
    }

    fn friend_public_key(&self, friend: FriendNumber) -> Result<Vec<u8>, EndpointError> {
        Ok(self.state.lock().friend(friend)?.public_key.to_vec())
    }

    fn friend_list(&self) -> Vec<FriendNumber> {
        self.state.lock().friends.keys().copied().collect()
    }

    fn friend_name(&self, friend: FriendNumber) -> Result<String, EndpointError> {
        Ok(self.state.lock().friend(friend)?.name.clone())
    }

    fn friend_connection_status(
        &self,
        friend: FriendNumber,
    ) -> Result<ConnectionStatus, EndpointError> {
        Ok(self.state.lock().friend(friend)?.status)
    }

    fn send_message(
        &mut self,
        friend: FriendNumber,
        kind: MessageKind,
        text: &str,
    ) -> Result<u32, EndpointError> {
        let mut state = self.state.lock();
        if !state.friend(friend)?.status.is_online() {
            return Err(EndpointError::FriendNotConnected);
        }
        state.messages.push((friend, kind, text.to_string()));
        state.next_message += 1;
        Ok(state.next_message)
    }

    fn file_send(
        &mut self,
        friend: FriendNumber,
        _kind: FileKind,
        size: u64,
        name: &str,
    ) -> Result<FileNumber, EndpointError> {
        let mut state = self.state.lock();
        if state.fail_file_send {
            return Err(EndpointError::File("no free slot".into()));
        }
        if !state.friend(friend)?.status.is_online() {
            return Err(EndpointError::FriendNotConnected);
        }
        let counter = state.next_file.entry(friend).or_insert(0);
        let file = *counter;
        *counter += 1;
        state.file_sends.push(FileSendCall {
            friend,
            file,
            size,
            name: name.to_string(),
        });
        Ok(file)
    }

    fn file_control(
        &mut self,
        friend: FriendNumber,
        file: FileNumber,
        control: FileControl,
    ) -> Result<(), EndpointError> {
        let mut state = self.state.lock();
        state.friend(friend)?;
        state.controls.push((friend, file, control));
        Ok(())
    }

    fn file_send_chunk(
        &mut self,
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        data: &[u8],
    ) -> Result<(), EndpointError> {
        let mut state = self.state.lock();
        if !state.friend(friend)?.status.is_online() {
            return Err(EndpointError::FriendNotConnected);
        }
        state.chunks.push(ChunkCall {
            friend,
            file,
            position,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn step(&mut self) -> Result<Vec<EndpointEvent>, EndpointError> {
        let mut state = self.state.lock();
        if state.fail_step {
            return Err(EndpointError::Step("scripted failure".into()));
        }
        Ok(state.events.drain(..).collect())
    }

    fn bootstrap(&mut self, node: &BootstrapNode) -> Result<(), EndpointError> {
        let mut state = self.state.lock();
        state.bootstraps += 1;
        if node.port == 0 {
            return Err(EndpointError::Bootstrap(format!("{}: bad port", node.host)));
        }
        if state.bootstrap_connects {
            state.self_status = ConnectionStatus::Udp;
        }
        Ok(())
    }

    fn kill(&mut self) {
        self.state.lock().killed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_38_bytes_with_key_prefix() {
        let endpoint = MockEndpoint::with_key([7; 32]);
        let address = endpoint.self_address();
        assert_eq!(address.len(), 38);
        assert_eq!(&address[..32], &[7; 32]);
    }

    #[test]
    fn test_saved_state_restores_identity() {
        let mut first = MockEndpoint::with_key([9; 32]);
        first.set_name("alice").unwrap();

        let options = EndpointOptions {
            saved_state: Some(first.save_data()),
            ..EndpointOptions::default()
        };
        let second = MockEndpoint::open(&options).unwrap();
        assert_eq!(second.self_address(), first.self_address());
        assert_eq!(second.handle().name(), "alice");
    }

    #[test]
    fn test_file_numbers_per_friend() {
        let mut endpoint = MockEndpoint::new();
        let handle = endpoint.handle();
        let a = handle.add_friend([1; 32], ConnectionStatus::Udp);
        let b = handle.add_friend([2; 32], ConnectionStatus::Tcp);

        assert_eq!(endpoint.file_send(a, FileKind::Data, 1, "x").unwrap(), 0);
        assert_eq!(endpoint.file_send(a, FileKind::Data, 1, "y").unwrap(), 1);
        assert_eq!(endpoint.file_send(b, FileKind::Data, 1, "z").unwrap(), 0);
    }

    #[test]
    fn test_offline_friend_rejects_file_send() {
        let mut endpoint = MockEndpoint::new();
        let friend = endpoint.handle().add_friend([1; 32], ConnectionStatus::None);
        assert_eq!(
            endpoint.file_send(friend, FileKind::Data, 1, "x"),
            Err(EndpointError::FriendNotConnected)
        );
    }

    #[test]
    fn test_step_drains_events() {
        let mut endpoint = MockEndpoint::new();
        let handle = endpoint.handle();
        let friend = handle.add_friend([1; 32], ConnectionStatus::None);
        handle.set_friend_status(friend, ConnectionStatus::Udp);

        assert_eq!(endpoint.step().unwrap().len(), 1);
        assert!(endpoint.step().unwrap().is_empty());
    }
}
