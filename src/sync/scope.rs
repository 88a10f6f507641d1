//! Broadcast Payload Cache
//!
//! Serialized payloads for one tick, keyed by player, section and target
//! encoding set. Sessions with equal target sets share one allocation.
//! A scope is created at the start of a broadcast and dropped at its end;
//! it is never stored.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::fingerprint::Section;
use crate::codec::{CodecError, TargetSet};

type CacheKey = (String, Section, String);

/// Per-tick payload cache.
#[derive(Debug, Default)]
pub struct BroadcastScope {
    payloads: BTreeMap<CacheKey, Arc<[u8]>>,
    encodes: usize,
    hits: usize,
}

impl BroadcastScope {
    /// Empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached payload for `(player, section, targets)`, encoding it with
    /// `build` on first use.
    pub fn payload<F>(
        &mut self,
        player: &str,
        section: Section,
        targets: &TargetSet,
        build: F,
    ) -> Result<Arc<[u8]>, CodecError>
    where
        F: FnOnce(&TargetSet) -> Result<Vec<u8>, CodecError>,
    {
        let key = (player.to_string(), section, targets.key().to_string());
        if let Some(bytes) = self.payloads.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(bytes));
        }
        let bytes: Arc<[u8]> = build(targets)?.into();
        self.encodes += 1;
        self.payloads.insert(key, Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Payloads encoded in this scope.
    pub fn encodes(&self) -> usize {
        self.encodes
    }

    /// Lookups served from the cache.
    pub fn hits(&self) -> usize {
        self.hits
    }
}
