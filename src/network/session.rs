//! Client Session Registry
//!
//! Tracks every connection's handshake state, negotiated encodings, display
//! limits and player subscription. Sessions are addressed by generational
//! handles: a handle taken before a session closed never resolves to a
//! session created later in the same slot.

use encoding_rs::Encoding;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use super::protocol::ClientInfo;
use crate::codec::TargetSet;
use crate::model::DisplayLimits;
use crate::transport::{Message, MessageKind};

/// Weak, generation-checked reference to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle {
    slot: u32,
    generation: u32,
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// Handshake state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for client-info.
    Handshaking,
    /// Handshake complete.
    Established,
}

/// Protocol-ordering violations. Fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Anything but client-info before the handshake.
    #[error("{0:?} before handshake")]
    NotEstablished(MessageKind),

    /// A second client-info.
    #[error("duplicate handshake")]
    DuplicateHandshake,
}

/// Why a message could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The client is not draining its connection.
    #[error("outbox full")]
    Full,
    /// The writer task is gone.
    #[error("connection closed")]
    Closed,
}

// =============================================================================
// SESSION
// =============================================================================

/// One connected client.
#[derive(Debug)]
pub struct ClientSession {
    /// Own handle.
    pub handle: SessionHandle,
    /// Peer description.
    pub peer: String,
    /// Handshake state.
    pub state: SessionState,
    /// Negotiated encodings.
    pub targets: TargetSet,
    /// Image size caps.
    pub limits: DisplayLimits,
    /// Name of the selected player.
    pub subscribed: Option<String>,
    outbox: mpsc::Sender<Message>,
    reader: Option<AbortHandle>,
}

impl ClientSession {
    /// Check that a message of `kind` may arrive in the current state.
    pub fn check_order(&self, kind: MessageKind) -> Result<(), ProtocolError> {
        match (self.state, kind) {
            (SessionState::Handshaking, MessageKind::ClientInfo) => Ok(()),
            (SessionState::Handshaking, other) => Err(ProtocolError::NotEstablished(other)),
            (SessionState::Established, MessageKind::ClientInfo) => Err(ProtocolError::DuplicateHandshake),
            (SessionState::Established, _) => Ok(()),
        }
    }

    /// Complete the handshake.
    pub fn establish(&mut self, info: &ClientInfo, fallback: &'static Encoding) -> Result<(), ProtocolError> {
        if self.state == SessionState::Established {
            return Err(ProtocolError::DuplicateHandshake);
        }
        self.targets = TargetSet::negotiate(&info.encodings, fallback);
        self.limits = info.limits;
        self.state = SessionState::Established;
        debug!("Session {} established, encodings {}", self.handle, self.targets.key());
        Ok(())
    }

    /// Whether the handshake is complete.
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Whether the session follows `player`.
    pub fn follows(&self, player: &str) -> bool {
        self.is_established() && self.subscribed.as_deref() == Some(player)
    }

    /// Queue a message without waiting.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        self.outbox.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Remember the reader task so teardown can stop it.
    pub fn set_reader(&mut self, reader: AbortHandle) {
        self.reader = Some(reader);
    }

    /// Stop the reader and drop the outbox; the writer drains what is
    /// already queued, then closes the stream.
    fn close(mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    session: Option<ClientSession>,
}

/// All live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection in `Handshaking` state.
    pub fn insert(&mut self, peer: impl Into<String>, outbox: mpsc::Sender<Message>) -> SessionHandle {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        let handle = SessionHandle {
            slot,
            generation: entry.generation,
        };
        entry.session = Some(ClientSession {
            handle,
            peer: peer.into(),
            state: SessionState::Handshaking,
            targets: TargetSet::default(),
            limits: DisplayLimits::default(),
            subscribed: None,
            outbox,
            reader: None,
        });
        self.live += 1;
        handle
    }

    /// Resolve a handle.
    pub fn get(&self, handle: SessionHandle) -> Option<&ClientSession> {
        self.slots
            .get(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.session.as_ref())
    }

    /// Resolve a handle mutably.
    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut ClientSession> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.session.as_mut())
    }

    /// Tear a session down. Safe to call any number of times; returns
    /// whether this call removed it.
    pub fn remove(&mut self, handle: SessionHandle) -> bool {
        let Some(entry) = self
            .slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
        else {
            return false;
        };
        let Some(session) = entry.session.take() else {
            return false;
        };
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.live -= 1;
        session.close();
        true
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// All live sessions.
    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.slots.iter().filter_map(|s| s.session.as_ref())
    }

    /// All live sessions, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.slots.iter_mut().filter_map(|s| s.session.as_mut())
    }

    /// Handles of all live sessions.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.iter().map(|s| s.handle).collect()
    }

    /// Established sessions following `player`, with their target sets.
    pub fn followers(&self, player: &str) -> Vec<(SessionHandle, &TargetSet)> {
        self.iter()
            .filter(|s| s.follows(player))
            .map(|s| (s.handle, &s.targets))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{UTF_8, WINDOWS_1252};

    fn registry_with_one() -> (SessionRegistry, SessionHandle, mpsc::Receiver<Message>) {
        let mut registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        let handle = registry.insert("test", tx);
        (registry, handle, rx)
    }

    fn info(encodings: &[&str]) -> ClientInfo {
        ClientInfo {
            limits: DisplayLimits::new(64, 64),
            encodings: encodings.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_only_client_info_while_handshaking() {
        let (registry, handle, _rx) = registry_with_one();
        let session = registry.get(handle).unwrap();
        assert_eq!(session.state, SessionState::Handshaking);
        assert!(session.check_order(MessageKind::ClientInfo).is_ok());
        for kind in [MessageKind::PlayerSelect, MessageKind::Control, MessageKind::Ignore] {
            assert_eq!(session.check_order(kind), Err(ProtocolError::NotEstablished(kind)));
        }
    }

    #[test]
    fn test_second_handshake_is_violation() {
        let (mut registry, handle, _rx) = registry_with_one();
        let session = registry.get_mut(handle).unwrap();
        session.establish(&info(&["latin1"]), UTF_8).unwrap();
        assert_eq!(session.targets.primary(), WINDOWS_1252);
        assert_eq!(session.limits, DisplayLimits::new(64, 64));
        assert_eq!(
            session.check_order(MessageKind::ClientInfo),
            Err(ProtocolError::DuplicateHandshake)
        );
        assert_eq!(
            session.establish(&info(&[]), UTF_8),
            Err(ProtocolError::DuplicateHandshake)
        );
        assert!(session.check_order(MessageKind::ItemRequest).is_ok());
    }

    #[test]
    fn test_unknown_encodings_fall_back() {
        let (mut registry, handle, _rx) = registry_with_one();
        let session = registry.get_mut(handle).unwrap();
        session.establish(&info(&["klingon"]), UTF_8).unwrap();
        assert_eq!(session.targets.primary(), UTF_8);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (mut registry, handle, _rx) = registry_with_one();
        assert!(registry.remove(handle));
        assert!(!registry.remove(handle));
        assert!(registry.get(handle).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_handle_does_not_resolve_to_new_session() {
        let (mut registry, old, _rx) = registry_with_one();
        registry.remove(old);
        let (tx, _rx2) = mpsc::channel(1);
        let new = registry.insert("second", tx);
        assert_ne!(old, new);
        assert!(registry.get(old).is_none());
        assert_eq!(registry.get(new).unwrap().peer, "second");
        assert!(!registry.remove(old));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_send_reports_full_and_closed() {
        let mut registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(1);
        let handle = registry.insert("p", tx);
        let session = registry.get(handle).unwrap();
        session.send(Message::empty(MessageKind::Status)).unwrap();
        assert_eq!(session.send(Message::empty(MessageKind::Status)), Err(SendError::Full));
        drop(rx);
        assert_eq!(session.send(Message::empty(MessageKind::Status)), Err(SendError::Closed));
    }

    #[test]
    fn test_followers_need_established_and_subscription() {
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let a = registry.insert("a", tx.clone());
        let b = registry.insert("b", tx.clone());
        let c = registry.insert("c", tx);

        for handle in [a, b] {
            let s = registry.get_mut(handle).unwrap();
            s.establish(&info(&["UTF-8"]), UTF_8).unwrap();
        }
        registry.get_mut(a).unwrap().subscribed = Some("mpd".into());
        registry.get_mut(c).unwrap().subscribed = Some("mpd".into());

        let followers: Vec<_> = registry.followers("mpd").into_iter().map(|(h, _)| h).collect();
        assert_eq!(followers, vec![a]);
    }
}
