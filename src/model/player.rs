//! Player Directory
//!
//! The players the upstream controller currently exposes.

use crate::codec::{
    single_vector, vector_field, CodecError, Field, FieldCursor, FieldKind, FieldSpec, Record,
    Schema, StringVector, WireRecord,
};

/// Description of one player.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PlayerInfo {
    /// Unique player name.
    pub name: String,
    /// Bitset of `PlayerInfo::FLAG_*`.
    pub flags: u32,
    /// Highest rating value, or 0 if the player has no ratings.
    pub max_rating: i32,
}

impl PlayerInfo {
    /// Player supports the playlist section.
    pub const FLAG_PLAYLIST: u32 = 1 << 0;
    /// Player supports the queue section.
    pub const FLAG_QUEUE: u32 = 1 << 1;
    /// Player supports library and list requests.
    pub const FLAG_LIBRARY: u32 = 1 << 2;
    /// Player can seek.
    pub const FLAG_SEEK: u32 = 1 << 3;

    /// Create a descriptor.
    pub fn new(name: impl Into<String>, flags: u32, max_rating: i32) -> Self {
        Self {
            name: name.into(),
            flags,
            max_rating,
        }
    }

    /// Check a capability flag.
    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

impl WireRecord for PlayerInfo {
    const SCHEMA: Schema = Schema::new(
        "player-descriptor",
        &[
            FieldSpec::new(FieldKind::String, 1),
            FieldSpec::new(FieldKind::Int32Array, 2),
        ],
    );

    fn to_record(&self) -> Record {
        Record::new(vec![
            Field::String(StringVector::new([self.name.as_str()])),
            Field::Int32Array(vec![self.flags as i32, self.max_rating]),
        ])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let mut cursor = FieldCursor::new(record);
        let name = cursor.strings()?.into_iter().next().unwrap_or_default();
        let ints = cursor.ints()?;
        let [flags, max_rating] = ints[..] else {
            return Err(CodecError::CountMismatch { expected: 2, found: ints.len() });
        };
        Ok(Self {
            name,
            flags: flags as u32,
            max_rating,
        })
    }
}

/// Names of all players, in controller order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerList {
    /// Player names.
    pub names: Vec<String>,
}

impl PlayerList {
    /// Build from descriptors.
    pub fn from_players(players: &[PlayerInfo]) -> Self {
        Self {
            names: players.iter().map(|p| p.name.clone()).collect(),
        }
    }
}

impl WireRecord for PlayerList {
    const SCHEMA: Schema = Schema::new(
        "player-list",
        &[FieldSpec::new(FieldKind::StringVectorNullable, 1)],
    );

    fn to_record(&self) -> Record {
        Record::new(vec![vector_field(self.names.iter().map(String::as_str))])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let names = single_vector(FieldCursor::new(record).string_vectors()?);
        Ok(Self { names })
    }
}
