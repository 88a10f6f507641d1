//! Player Status
//!
//! What the upstream controller reports on every poll, and the basic-status
//! record broadcast to clients.

use crate::codec::{CodecError, Field, FieldCursor, FieldKind, FieldSpec, Record, Schema, WireRecord};
use crate::model::list::ItemRef;

// =============================================================================
// ENUMS
// =============================================================================

/// Playback state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum PlaybackState {
    /// Stopped.
    #[default]
    Stop = 0,
    /// Paused.
    Pause = 1,
    /// Playing.
    Play = 2,
}

impl PlaybackState {
    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Stop),
            1 => Some(Self::Pause),
            2 => Some(Self::Play),
            _ => None,
        }
    }
}

/// Repeat mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum RepeatMode {
    /// No repeat.
    #[default]
    Off = 0,
    /// Repeat the active item.
    One = 1,
    /// Repeat the whole playlist.
    All = 2,
}

impl RepeatMode {
    /// Parse a wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::One),
            2 => Some(Self::All),
            _ => None,
        }
    }

    /// Next mode in the toggle cycle Off -> All -> One -> Off.
    pub fn cycle(self) -> Self {
        match self {
            Self::Off => Self::All,
            Self::All => Self::One,
            Self::One => Self::Off,
        }
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Full status as fetched from the upstream controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerStatus {
    /// Basic status fields.
    pub basic: BasicStatus,
    /// Id of the item currently loaded, if any.
    pub active_item: Option<String>,
    /// Playlist in play order.
    pub playlist: Vec<ItemRef>,
    /// Queue in play order.
    pub queue: Vec<ItemRef>,
}

/// The small fixed-size part of the status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BasicStatus {
    /// Playback state.
    pub state: PlaybackState,
    /// Volume, 0..=100.
    pub volume: i32,
    /// Repeat mode.
    pub repeat: RepeatMode,
    /// Shuffle enabled.
    pub shuffle: bool,
    /// Index of the active item within the playlist, or -1.
    pub position: i32,
}

impl BasicStatus {
    /// Highest volume value.
    pub const MAX_VOLUME: i32 = 100;
}

impl WireRecord for BasicStatus {
    const SCHEMA: Schema = Schema::new("status", &[FieldSpec::new(FieldKind::Int32Array, 5)]);

    fn to_record(&self) -> Record {
        Record::new(vec![Field::Int32Array(vec![
            self.state as i32,
            self.volume,
            self.repeat as i32,
            self.shuffle as i32,
            self.position,
        ])])
    }

    fn from_record(record: Record) -> Result<Self, CodecError> {
        let ints = FieldCursor::new(record).ints()?;
        let [state, volume, repeat, shuffle, position] = ints[..] else {
            return Err(CodecError::CountMismatch { expected: 5, found: ints.len() });
        };
        Ok(Self {
            state: PlaybackState::from_i32(state).ok_or_else(|| CodecError::InvalidValue {
                field: "state",
                reason: format!("unknown playback state {}", state),
            })?,
            volume,
            repeat: RepeatMode::from_i32(repeat).ok_or_else(|| CodecError::InvalidValue {
                field: "repeat",
                reason: format!("unknown repeat mode {}", repeat),
            })?,
            shuffle: shuffle != 0,
            position,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
