//! State Fingerprints
//!
//! A compact summary of one player's state. Two fingerprints are compared
//! section by section to decide what must be re-sent.

use crate::core::hash::{short_hex, HashDomain, StateHash, StateHasher};
use crate::model::{BasicStatus, ItemRef, PlayerStatus};

/// Broadcast sections, in the order they are always sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    /// Basic status.
    Status,
    /// Active item.
    ActiveItem,
    /// Playlist.
    Playlist,
    /// Queue.
    Queue,
}

impl Section {
    /// Every section in send order.
    pub const ALL: [Section; 4] = [
        Section::Status,
        Section::ActiveItem,
        Section::Playlist,
        Section::Queue,
    ];
}

/// Summary of a player's state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hash of the basic status fields.
    pub basic: StateHash,
    /// Id of the active item.
    pub active_item: Option<String>,
    /// Order-sensitive playlist hash.
    pub playlist: StateHash,
    /// Order-sensitive queue hash.
    pub queue: StateHash,
}

impl Fingerprint {
    /// Fingerprint a freshly fetched status.
    pub fn of(status: &PlayerStatus) -> Self {
        Self {
            basic: hash_basic(&status.basic),
            active_item: status.active_item.clone(),
            playlist: hash_list(StateHasher::new(HashDomain::Playlist), &status.playlist),
            queue: hash_list(StateHasher::new(HashDomain::Queue), &status.queue),
        }
    }

    /// Compare against the previous fingerprint.
    ///
    /// With no previous fingerprint every section counts as changed.
    pub fn diff(&self, previous: Option<&Fingerprint>) -> Changes {
        match previous {
            None => Changes::all(),
            Some(prev) => Changes {
                status: self.basic != prev.basic,
                active_item: self.active_item != prev.active_item,
                playlist: self.playlist != prev.playlist,
                queue: self.queue != prev.queue,
            },
        }
    }

    /// Short form for log lines.
    pub fn summary(&self) -> String {
        format!(
            "status={} item={:?} playlist={} queue={}",
            short_hex(&self.basic),
            self.active_item,
            short_hex(&self.playlist),
            short_hex(&self.queue)
        )
    }
}

fn hash_basic(basic: &BasicStatus) -> StateHash {
    let mut h = StateHasher::new(HashDomain::Status);
    h.update_i32(basic.state as i32);
    h.update_i32(basic.volume);
    h.update_i32(basic.repeat as i32);
    h.update_bool(basic.shuffle);
    h.update_i32(basic.position);
    h.finalize()
}

/// Hash a list of item references; order matters.
pub fn hash_list(mut hasher: StateHasher, items: &[ItemRef]) -> StateHash {
    hasher.update_u64(items.len() as u64);
    for item in items {
        hasher.update_str(&item.id);
        hasher.update_str(&item.title);
    }
    hasher.finalize()
}

/// Which sections differ between two fingerprints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    /// Basic status changed.
    pub status: bool,
    /// Active item changed.
    pub active_item: bool,
    /// Playlist changed.
    pub playlist: bool,
    /// Queue changed.
    pub queue: bool,
}

impl Changes {
    /// Every section changed.
    pub fn all() -> Self {
        Self {
            status: true,
            active_item: true,
            playlist: true,
            queue: true,
        }
    }

    /// Nothing changed.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether anything changed.
    pub fn any(&self) -> bool {
        self.status || self.active_item || self.playlist || self.queue
    }

    /// Whether `section` changed.
    pub fn contains(&self, section: Section) -> bool {
        match section {
            Section::Status => self.status,
            Section::ActiveItem => self.active_item,
            Section::Playlist => self.playlist,
            Section::Queue => self.queue,
        }
    }

    /// Changed sections in send order.
    pub fn sections(&self) -> impl Iterator<Item = Section> + '_ {
        Section::ALL.into_iter().filter(|s| self.contains(*s))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlaybackState;
    use proptest::prelude::*;

    fn status(state: PlaybackState, volume: i32) -> PlayerStatus {
        PlayerStatus {
            basic: BasicStatus {
                state,
                volume,
                ..Default::default()
            },
            active_item: Some("t1".into()),
            playlist: vec![ItemRef::new("t1", "One"), ItemRef::new("t2", "Two")],
            queue: Vec::new(),
        }
    }

    #[test]
    fn test_play_to_pause_marks_only_status() {
        let before = Fingerprint::of(&status(PlaybackState::Play, 50));
        let after = Fingerprint::of(&status(PlaybackState::Pause, 50));
        let changes = after.diff(Some(&before));
        assert_eq!(
            changes,
            Changes {
                status: true,
                ..Changes::none()
            }
        );
        assert_eq!(changes.sections().collect::<Vec<_>>(), vec![Section::Status]);
    }

    #[test]
    fn test_first_fingerprint_changes_everything() {
        let fp = Fingerprint::of(&status(PlaybackState::Stop, 0));
        assert_eq!(fp.diff(None), Changes::all());
        assert_eq!(fp.diff(None).sections().collect::<Vec<_>>(), Section::ALL.to_vec());
    }

    #[test]
    fn test_same_status_no_changes() {
        let a = Fingerprint::of(&status(PlaybackState::Play, 10));
        let b = Fingerprint::of(&status(PlaybackState::Play, 10));
        assert!(!b.diff(Some(&a)).any());
    }

    #[test]
    fn test_list_length_is_64_bit() {
        let items = vec![ItemRef::new("x", "X")];
        let mut manual = StateHasher::new(HashDomain::Playlist);
        manual.update_u64(1);
        manual.update_str("x");
        manual.update_str("X");
        assert_eq!(hash_list(StateHasher::new(HashDomain::Playlist), &items), manual.finalize());
    }

    #[test]
    fn test_playlist_and_queue_hashes_are_separated() {
        let items = vec![ItemRef::new("x", "X")];
        assert_ne!(
            hash_list(StateHasher::new(HashDomain::Playlist), &items),
            hash_list(StateHasher::new(HashDomain::Queue), &items)
        );
    }

    proptest! {
        #[test]
        fn prop_reorder_changes_hash(ids in prop::collection::btree_set("[a-z]{1,6}", 2..8)) {
            let items: Vec<ItemRef> = ids.iter().map(|id| ItemRef::new(id.clone(), id.clone())).collect();
            let mut reversed = items.clone();
            reversed.reverse();

            let h = |list: &[ItemRef]| hash_list(StateHasher::new(HashDomain::Playlist), list);
            prop_assert_eq!(h(&items), h(&items.clone()));
            prop_assert_ne!(h(&items), h(&reversed));
        }
    }
}
