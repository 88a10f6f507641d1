//! State Synchronization
//!
//! Detects what changed in each player's state and builds the broadcasts
//! that bring established sessions up to date.
//!
//! - `fingerprint.rs` - state summaries and section diffs
//! - `scope.rs`       - per-tick payload cache
//! - `engine.rs`      - pull / apply / broadcast

pub mod engine;
pub mod fingerprint;
pub mod scope;

pub use engine::{PlayerPull, PlayerState, Pulled, SyncEngine, TickOutcome, PLAYLIST_ID, QUEUE_ID};
pub use fingerprint::{Changes, Fingerprint, Section};
pub use scope::BroadcastScope;
