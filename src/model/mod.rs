//! Player State Model
//!
//! Plain data fetched from the upstream controller, and the typed wire
//! records built from it.
//!
//! - `status.rs`  - playback status
//! - `item.rs`    - items and their metadata
//! - `list.rs`    - lists, library, truncation
//! - `player.rs`  - player directory
//! - `control.rs` - control commands

pub mod control;
pub mod item;
pub mod list;
pub mod player;
pub mod status;

pub use control::Control;
pub use item::{DisplayLimits, Item, ItemPayload};
pub use list::{ItemRef, LibraryPayload, ListContents, ListEntry, ListPayload, TRUNCATED_TITLE};
pub use player::{PlayerInfo, PlayerList};
pub use status::{BasicStatus, PlaybackState, PlayerStatus, RepeatMode};
