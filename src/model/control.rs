//! Control Commands
//!
//! The fixed command set clients can send to a player.

use crate::codec::{
    single_vector, vector_field, CodecError, Field, FieldCursor, FieldKind, FieldSpec, Record,
    Schema, WireRecord,
};

/// A control command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Control {
    /// Toggle between play and pause.
    PlayPause,
    /// Stop playback.
    Stop,
    /// Skip to the next item.
    Next,
    /// Go back to the previous item.
    Prev,
    /// Seek relative to the current position, in seconds.
    Seek(i32),
    /// Set the absolute volume.
    Volume(i32),
    /// Rate the active item.
    Rating(i32),
    /// Cycle the repeat mode.
    ToggleRepeat,
    /// Toggle shuffle.
    ToggleShuffle,
    /// Jump to a playlist position.
    JumpPlaylist(i32),
    /// Jump to a queue position.
    JumpQueue(i32),
    /// Play an item by id.
    PlayItem(String),
    /// Append an item to the queue.
    Enqueue(String),
}

impl Control {
    /// Wire code of this command.
    pub fn code(&self) -> i32 {
        match self {
            Control::PlayPause => 1,
            Control::Stop => 2,
            Control::Next => 3,
            Control::Prev => 4,
            Control::Seek(_) => 5,
            Control::Volume(_) => 6,
            Control::Rating(_) => 7,
            Control::ToggleRepeat => 8,
            Control::ToggleShuffle => 9,
            Control::JumpPlaylist(_) => 10,
            Control::JumpQueue(_) => 11,
            Control::PlayItem(_) => 12,
            Control::Enqueue(_) => 13,
        }
    }

    /// Integer parameter, 0 if the command takes none.
    pub fn int_param(&self) -> i32 {
        match self {
            Control::Seek(v)
            | Control::Volume(v)
            | Control::Rating(v)
            | Control::JumpPlaylist(v)
            | Control::JumpQueue(v) => *v,
            _ => 0,
        }
    }

    /// String parameter, if the command takes one.
    pub fn str_param(&self) -> Option<&str> {
        match self {
            Control::PlayItem(id) | Control::Enqueue(id) => Some(id),
            _ => None,
        }
    }

    /// Rebuild a command from its wire parts.
    pub fn from_parts(code: i32, int_param: i32, str_param: Option<String>) -> Result<Self, CodecError> {
        let need_str = |s: Option<String>| {
            s.ok_or_else(|| CodecError::InvalidValue {
                field: "control",
                reason: format!("command {} needs a string parameter", code),
            })
        };
        Ok(match code {
            1 => Control::PlayPause,
            2 => Control::Stop,
            3 => Control::Next,
            4 => Control::Prev,
            5 => Control::Seek(int_param),
            6 => Control::Volume(int_param),
            7 => Control::Rating(int_param),
            8 => Control::ToggleRepeat,
            9 => Control::ToggleShuffle,
            10 => Control::JumpPlaylist(int_param),
            11 => Control::JumpQueue(int_param),
            12 => Control::PlayItem(need_str(str_param)?),
            13 => Control::Enqueue(need_str(str_param)?),
            other => {
                return Err(CodecError::InvalidValue {
                    field: "control",
                    reason: format!("unknown command {}", other),
                })
            }
        })
    }
}

impl WireRecord for Control {
    const SCHEMA: Schema = Schema::new(
        "control",
        &[
            FieldSpec::new(FieldKind::Int32Array, 2),
            FieldSpec::new(FieldKind::StringVectorNullable, 1),
        ],
    );

    fn to_record(&self) -> Record {
        let param = match self.str_param() {
            Some(s) => vector_field([s]),
            None => Field::StringVectorNullable(vec![None]),
        };
        Record::new(vec![Field::Int32Array(vec![self.code(), self.int_param()]), param])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let mut cursor = FieldCursor::new(record);
        let ints = cursor.ints()?;
        let [code, int_param] = ints[..] else {
            return Err(CodecError::CountMismatch { expected: 2, found: ints.len() });
        };
        let str_param = single_vector(cursor.string_vectors()?).into_iter().next();
        Control::from_parts(code, int_param, str_param)
    }
}
