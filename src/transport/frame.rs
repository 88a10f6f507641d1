//! Message Framing
//!
//! `prefix | kind u32 BE | len u32 BE | payload | suffix`

use std::sync::Arc;
use thiserror::Error;

/// Frame start marker.
pub const PREFIX: [u8; 4] = [0xFF; 4];

/// Frame end marker.
pub const SUFFIX: [u8; 4] = [0xFE; 4];

/// Bytes before the payload.
pub const HEADER_LEN: usize = PREFIX.len() + 8;

/// Greeting sent once on accept: prefix, protocol version, suffix.
pub const GREETING: [u8; 9] = [
    0xFF, 0xFF, 0xFF, 0xFF,
    crate::PROTOCOL_VERSION,
    0xFE, 0xFE, 0xFE, 0xFE,
];

// =============================================================================
// MESSAGE KINDS
// =============================================================================

/// Message kind identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum MessageKind {
    /// No-op, dropped on receipt.
    Ignore = 0,
    /// Handshake: display limits and accepted encodings.
    ClientInfo = 1,
    /// Names of all players.
    PlayerList = 2,
    /// Client picks a player.
    PlayerSelect = 3,
    /// Descriptor of the selected player.
    PlayerDescriptor = 4,
    /// Basic playback status.
    Status = 5,
    /// Active item.
    ActiveItem = 6,
    /// Playlist.
    Playlist = 7,
    /// Queue.
    Queue = 8,
    /// Control command.
    Control = 9,
    /// Item lookup.
    ItemRequest = 10,
    /// Item lookup reply.
    ItemResponse = 11,
    /// List lookup.
    ListRequest = 12,
    /// List lookup reply.
    ListResponse = 13,
    /// Library lookup.
    LibraryRequest = 14,
    /// Library lookup reply.
    LibraryResponse = 15,
    /// Server is going away.
    ShutdownNotice = 16,
}

impl MessageKind {
    /// Parse a wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        use MessageKind::*;
        Some(match value {
            0 => Ignore,
            1 => ClientInfo,
            2 => PlayerList,
            3 => PlayerSelect,
            4 => PlayerDescriptor,
            5 => Status,
            6 => ActiveItem,
            7 => Playlist,
            8 => Queue,
            9 => Control,
            10 => ItemRequest,
            11 => ItemResponse,
            12 => ListRequest,
            13 => ListResponse,
            14 => LibraryRequest,
            15 => LibraryResponse,
            16 => ShutdownNotice,
            _ => return None,
        })
    }

    /// Wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// One framed message.
///
/// The payload is shared so one serialized broadcast can be queued to many
/// connections without copying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Kind.
    pub kind: MessageKind,
    /// Encoded record, or empty.
    pub payload: Arc<[u8]>,
}

impl Message {
    /// Create a message.
    pub fn new(kind: MessageKind, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Message without payload.
    pub fn empty(kind: MessageKind) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Serialize into one contiguous frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, FrameError> {
        let len = u32::try_from(self.payload.len()).map_err(|_| FrameError::TooLarge {
            len: self.payload.len(),
            max: u32::MAX as usize,
        })?;
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + SUFFIX.len());
        out.extend_from_slice(&PREFIX);
        out.extend_from_slice(&self.kind.as_u32().to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&SUFFIX);
        Ok(out)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Framing and stream errors. All are fatal to the connection.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended inside a frame.
    #[error("stream ended mid-frame")]
    UnexpectedEof,

    /// Frame did not start with the prefix.
    #[error("bad frame prefix {}", hex::encode(.0))]
    BadPrefix([u8; 4]),

    /// Frame did not end with the suffix.
    #[error("bad frame suffix {}", hex::encode(.0))]
    BadSuffix([u8; 4]),

    /// Greeting malformed.
    #[error("bad greeting {}", hex::encode(.0))]
    BadGreeting(Vec<u8>),

    /// Kind value not in the message kind table.
    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    /// Declared payload longer than allowed.
    #[error("payload of {len} bytes exceeds limit of {max}")]
    TooLarge {
        /// Declared length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// Peer made no progress for the whole retry budget.
    #[error("stalled after {attempts} attempts")]
    Stalled {
        /// Attempts made.
        attempts: u32,
    },
}
