//! Protocol Messages
//!
//! Typed payloads of the client-to-server message kinds, and the parse
//! step from a framed [`Message`] to a [`ClientMessage`].

use crate::codec::{
    single_vector, vector_field, CodecError, Field, FieldCursor, FieldKind, FieldSpec, Record,
    Schema, StringVector, WireRecord,
};
use crate::model::{Control, DisplayLimits};
use crate::transport::{Message, MessageKind};

// =============================================================================
// CLIENT -> SERVER PAYLOADS
// =============================================================================

/// Handshake: what the client can display and which encodings it reads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Image size caps.
    pub limits: DisplayLimits,
    /// Accepted encodings, most preferred first.
    pub encodings: Vec<String>,
}

impl WireRecord for ClientInfo {
    const SCHEMA: Schema = Schema::new(
        "client-info",
        &[
            FieldSpec::new(FieldKind::Int32Array, 2),
            FieldSpec::new(FieldKind::StringVectorNullable, 1),
        ],
    );

    fn to_record(&self) -> Record {
        Record::new(vec![
            Field::Int32Array(vec![self.limits.width as i32, self.limits.height as i32]),
            vector_field(self.encodings.iter().map(String::as_str)),
        ])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let mut cursor = FieldCursor::new(record);
        let ints = cursor.ints()?;
        let [width, height] = ints[..] else {
            return Err(CodecError::CountMismatch { expected: 2, found: ints.len() });
        };
        let dimension = |value: i32, field: &'static str| {
            u32::try_from(value).map_err(|_| CodecError::InvalidValue {
                field,
                reason: format!("negative size {}", value),
            })
        };
        Ok(Self {
            limits: DisplayLimits::new(dimension(width, "width")?, dimension(height, "height")?),
            encodings: single_vector(cursor.string_vectors()?),
        })
    }
}

/// A single id or name: player-select, item-request, list-request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Key {
    /// The id.
    pub id: String,
}

impl Key {
    /// Wrap an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl WireRecord for Key {
    const SCHEMA: Schema = Schema::new("key", &[FieldSpec::new(FieldKind::String, 1)]);

    fn to_record(&self) -> Record {
        Record::new(vec![Field::String(StringVector::new([self.id.as_str()]))])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let id = FieldCursor::new(record)
            .strings()?
            .into_iter()
            .next()
            .unwrap_or_default();
        Ok(Self { id })
    }
}

/// Payload of messages that carry nothing: library-request,
/// shutdown-notice, ignore.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Empty;

impl WireRecord for Empty {
    const SCHEMA: Schema = Schema::new("empty", &[]);

    fn to_record(&self) -> Record {
        Record::default()
    }

    fn from_record(_record: Record) -> Result<Self, CodecError> {
        Ok(Empty)
    }
}

// =============================================================================
// PARSED MESSAGES
// =============================================================================

/// A decoded message from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// No-op.
    Ignore,
    /// Handshake.
    ClientInfo(ClientInfo),
    /// Select a player by name.
    PlayerSelect(String),
    /// Control command for the selected player.
    Control(Control),
    /// Look up an item.
    ItemRequest(String),
    /// Look up a list.
    ListRequest(String),
    /// Look up the library.
    LibraryRequest,
}

/// Why an inbound message could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The kind is only ever sent by the server.
    #[error("{0:?} is not a client message")]
    WrongDirection(MessageKind),

    /// The payload does not match the kind's schema.
    #[error("bad {kind:?} payload: {source}")]
    Decode {
        /// Message kind.
        kind: MessageKind,
        /// Decode failure.
        #[source]
        source: CodecError,
    },
}

impl ClientMessage {
    /// Whether `kind` is a kind clients may send.
    pub fn accepts(kind: MessageKind) -> bool {
        matches!(
            kind,
            MessageKind::Ignore
                | MessageKind::ClientInfo
                | MessageKind::PlayerSelect
                | MessageKind::Control
                | MessageKind::ItemRequest
                | MessageKind::ListRequest
                | MessageKind::LibraryRequest
        )
    }

    /// Decode a framed message.
    pub fn parse(message: &Message) -> Result<Self, ParseError> {
        let kind = message.kind;
        let bytes = &message.payload[..];
        let wrap = |source| ParseError::Decode { kind, source };
        Ok(match kind {
            MessageKind::Ignore => ClientMessage::Ignore,
            MessageKind::ClientInfo => ClientMessage::ClientInfo(ClientInfo::decode(bytes).map_err(wrap)?),
            MessageKind::PlayerSelect => ClientMessage::PlayerSelect(Key::decode(bytes).map_err(wrap)?.id),
            MessageKind::Control => ClientMessage::Control(Control::decode(bytes).map_err(wrap)?),
            MessageKind::ItemRequest => ClientMessage::ItemRequest(Key::decode(bytes).map_err(wrap)?.id),
            MessageKind::ListRequest => ClientMessage::ListRequest(Key::decode(bytes).map_err(wrap)?.id),
            MessageKind::LibraryRequest => {
                Empty::decode(bytes).map_err(wrap)?;
                ClientMessage::LibraryRequest
            }
            other => return Err(ParseError::WrongDirection(other)),
        })
    }

    /// Encode as a framed message, as a client would.
    pub fn to_message(&self) -> Result<Message, CodecError> {
        let (kind, payload) = match self {
            ClientMessage::Ignore => (MessageKind::Ignore, Vec::new()),
            ClientMessage::ClientInfo(info) => (MessageKind::ClientInfo, info.encode()?),
            ClientMessage::PlayerSelect(name) => (MessageKind::PlayerSelect, Key::new(name.as_str()).encode()?),
            ClientMessage::Control(control) => (MessageKind::Control, control.encode()?),
            ClientMessage::ItemRequest(id) => (MessageKind::ItemRequest, Key::new(id.as_str()).encode()?),
            ClientMessage::ListRequest(id) => (MessageKind::ListRequest, Key::new(id.as_str()).encode()?),
            ClientMessage::LibraryRequest => (MessageKind::LibraryRequest, Empty.encode()?),
        };
        Ok(Message::new(kind, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_survive_framing() {
        let messages = [
            ClientMessage::ClientInfo(ClientInfo {
                limits: DisplayLimits::new(320, 240),
                encodings: vec!["ISO-8859-15".into(), "UTF-8".into()],
            }),
            ClientMessage::PlayerSelect("Amarok".into()),
            ClientMessage::Control(Control::JumpPlaylist(3)),
            ClientMessage::ItemRequest("id-1".into()),
            ClientMessage::ListRequest("list-1".into()),
            ClientMessage::LibraryRequest,
            ClientMessage::Ignore,
        ];
        for msg in messages {
            let framed = msg.to_message().unwrap();
            assert_eq!(ClientMessage::parse(&framed).unwrap(), msg);
        }
    }

    #[test]
    fn test_server_kinds_rejected() {
        let msg = Message::empty(MessageKind::Status);
        assert!(!ClientMessage::accepts(MessageKind::Status));
        assert!(matches!(
            ClientMessage::parse(&msg),
            Err(ParseError::WrongDirection(MessageKind::Status))
        ));
    }

    #[test]
    fn test_negative_limits_rejected() {
        let record = Record::new(vec![Field::Int32Array(vec![-1, 10]), vector_field(["UTF-8"])]);
        let bytes = crate::codec::encode(&ClientInfo::SCHEMA, &record).unwrap();
        let msg = Message::new(MessageKind::ClientInfo, bytes);
        assert!(matches!(
            ClientMessage::parse(&msg),
            Err(ParseError::Decode {
                kind: MessageKind::ClientInfo,
                source: CodecError::InvalidValue { field: "width", .. }
            })
        ));
    }

    #[test]
    fn test_garbage_payload_is_decode_error() {
        let msg = Message::new(MessageKind::ItemRequest, vec![0xAB; 5]);
        assert!(matches!(ClientMessage::parse(&msg), Err(ParseError::Decode { .. })));
    }
}
