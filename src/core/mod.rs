//! Core primitives.
//!
//! Order-sensitive state hashing used for change detection.

pub mod hash;

pub use hash::{short_hex, HashDomain, StateHash, StateHasher};
