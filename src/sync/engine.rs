//! Synchronization Engine
//!
//! Keeps the last broadcast state of every player and turns freshly pulled
//! state into the minimal set of section payloads.
//!
//! A tick has two halves:
//! 1. [`SyncEngine::pull`] - an owned future querying the controller. It
//!    borrows nothing from the engine, so the event loop keeps running
//!    while it is pending.
//! 2. [`SyncEngine::apply`] - synchronous; replaces fingerprints and
//!    snapshots wholesale and reports what changed.
//!
//! [`SyncEngine::broadcast`] then serializes each changed section once per
//! target encoding set.

use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use super::fingerprint::{Changes, Fingerprint, Section};
use super::scope::BroadcastScope;
use crate::codec::{CodecError, TargetSet, WireRecord};
use crate::model::{Item, ItemPayload, ListPayload, PlayerInfo, PlayerStatus};
use crate::transport::{Message, MessageKind};
use crate::upstream::{PlayerController, UpstreamError};

/// List id of the playlist section.
pub const PLAYLIST_ID: &str = "__playlist__";

/// List id of the queue section.
pub const QUEUE_ID: &str = "__queue__";

impl Section {
    /// Message kind carrying this section.
    pub fn kind(self) -> MessageKind {
        match self {
            Section::Status => MessageKind::Status,
            Section::ActiveItem => MessageKind::ActiveItem,
            Section::Playlist => MessageKind::Playlist,
            Section::Queue => MessageKind::Queue,
        }
    }
}

// =============================================================================
// PULL RESULTS
// =============================================================================

/// Everything one tick fetched from the controller.
#[derive(Debug)]
pub struct Pulled {
    /// Player directory.
    pub players: Result<Vec<PlayerInfo>, UpstreamError>,
    /// Per-player state, in directory order.
    pub states: Vec<PlayerPull>,
}

/// State fetched for one player.
#[derive(Debug)]
pub struct PlayerPull {
    /// Player name.
    pub name: String,
    /// Status and active item, or why they could not be fetched.
    pub result: Result<PlayerState, UpstreamError>,
}

/// Status and active item of one player.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerState {
    /// Current status.
    pub status: PlayerStatus,
    /// The active item, if any.
    pub item: Option<Item>,
    /// `item` is an id-only stand-in for an item whose fetch failed.
    pub item_stand_in: bool,
}

/// What [`SyncEngine::apply`] found.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// The controller could not be queried; nothing was touched.
    pub skipped: bool,
    /// The set of players (or a descriptor) changed.
    pub directory_changed: bool,
    /// Players that disappeared.
    pub removed: Vec<String>,
    /// Players whose state changed, with the changed sections.
    pub updates: Vec<(String, Changes)>,
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Debug)]
struct PlayerSync {
    fingerprint: Fingerprint,
    status: PlayerStatus,
    item: Option<Item>,
    item_stand_in: bool,
}

/// Owner of all per-player synchronization state.
#[derive(Debug)]
pub struct SyncEngine {
    directory: Vec<PlayerInfo>,
    players: BTreeMap<String, PlayerSync>,
    list_limit: usize,
    ticks: u64,
}

impl SyncEngine {
    /// Engine with no players.
    pub fn new(list_limit: usize) -> Self {
        Self {
            directory: Vec::new(),
            players: BTreeMap::new(),
            list_limit,
            ticks: 0,
        }
    }

    /// Players as of the last successful tick.
    pub fn players(&self) -> &[PlayerInfo] {
        &self.directory
    }

    /// Descriptor of one player.
    pub fn player(&self, name: &str) -> Option<&PlayerInfo> {
        self.directory.iter().find(|p| p.name == name)
    }

    /// Last broadcast fingerprint of a player.
    pub fn fingerprint(&self, name: &str) -> Option<&Fingerprint> {
        self.players.get(name).map(|p| &p.fingerprint)
    }

    /// Ticks applied so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Forget a player. Returns false if it was unknown.
    pub fn remove_player(&mut self, name: &str) -> bool {
        let known = self.directory.iter().any(|p| p.name == name);
        self.directory.retain(|p| p.name != name);
        self.players.remove(name);
        known
    }

    /// Start a pull. The returned future owns everything it needs.
    ///
    /// The active item is fetched only when its id differs from the one
    /// last applied, or when the last fetch of it failed; otherwise the
    /// cached item is reused.
    pub fn pull(&self, controller: Rc<dyn PlayerController>) -> impl Future<Output = Pulled> + 'static {
        let known: BTreeMap<String, Item> = self
            .players
            .iter()
            .filter(|(_, p)| !p.item_stand_in)
            .filter_map(|(name, p)| p.item.clone().map(|item| (name.clone(), item)))
            .collect();

        async move {
            let players = controller.fetch_players().await;
            let names: Vec<String> = match &players {
                Ok(list) => list.iter().map(|p| p.name.clone()).collect(),
                Err(_) => Vec::new(),
            };
            let controller = &controller;
            let known = &known;
            let states = join_all(names.into_iter().map(|name| async move {
                let result = pull_player(&**controller, &name, known.get(&name)).await;
                PlayerPull { name, result }
            }))
            .await;
            Pulled { players, states }
        }
    }

    /// Apply a completed pull.
    pub fn apply(&mut self, pulled: Pulled) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        let directory = match pulled.players {
            Ok(directory) => directory,
            Err(UpstreamError::ServiceGone) => {
                warn!("Player service gone, dropping {} players", self.directory.len());
                outcome.directory_changed = !self.directory.is_empty();
                outcome.removed = self.directory.drain(..).map(|p| p.name).collect();
                self.players.clear();
                return outcome;
            }
            Err(e) => {
                warn!("Player directory fetch failed, skipping tick: {}", e);
                outcome.skipped = true;
                return outcome;
            }
        };

        self.ticks += 1;
        outcome.removed = self
            .directory
            .iter()
            .filter(|old| !directory.iter().any(|p| p.name == old.name))
            .map(|old| old.name.clone())
            .collect();
        for name in &outcome.removed {
            info!("Player {} went away", name);
            self.players.remove(name);
        }
        outcome.directory_changed = self.directory != directory;
        self.directory = directory;

        for PlayerPull { name, result } in pulled.states {
            match result {
                Ok(PlayerState {
                    status,
                    item,
                    item_stand_in,
                }) => {
                    let fingerprint = Fingerprint::of(&status);
                    let previous = self.players.get(&name);
                    let mut changes = fingerprint.diff(previous.map(|p| &p.fingerprint));
                    // Same id, different content: a stand-in was replaced.
                    if previous.is_some_and(|p| p.item != item) {
                        changes.active_item = true;
                    }
                    if changes.any() {
                        debug!("Player {} changed: {}", name, fingerprint.summary());
                        outcome.updates.push((name.clone(), changes));
                    }
                    self.players.insert(
                        name,
                        PlayerSync {
                            fingerprint,
                            status,
                            item,
                            item_stand_in,
                        },
                    );
                }
                Err(UpstreamError::ServiceGone) => {
                    info!("Player {} gone during status fetch", name);
                    if self.remove_player(&name) {
                        outcome.directory_changed = true;
                        outcome.removed.push(name);
                    }
                }
                Err(e) => {
                    // Previous fingerprint stays; next tick retries.
                    warn!("Status fetch for {} failed: {}", name, e);
                }
            }
        }

        outcome
    }

    /// Serialize the changed sections of `player` for every recipient.
    ///
    /// Messages come out grouped by section in send order, so each
    /// recipient sees status, active item, playlist, queue in that order.
    pub fn broadcast<K: Copy>(
        &self,
        player: &str,
        changes: Changes,
        recipients: &[(K, &TargetSet)],
        scope: &mut BroadcastScope,
    ) -> Vec<(K, Message)> {
        let Some(state) = self.players.get(player) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for section in changes.sections() {
            for &(key, targets) in recipients {
                let payload = scope.payload(player, section, targets, |t| {
                    encode_section(state, section, t, self.list_limit)
                });
                match payload {
                    Ok(bytes) => out.push((key, Message::new(section.kind(), bytes))),
                    Err(e) => error!("Failed to encode {:?} of {}: {}", section, player, e),
                }
            }
        }
        out
    }

    /// Full current state of `player`, for a session that just selected it.
    pub fn snapshot(&self, player: &str, targets: &TargetSet) -> Vec<Message> {
        let mut scope = BroadcastScope::new();
        self.broadcast(player, Changes::all(), &[((), targets)], &mut scope)
            .into_iter()
            .map(|(_, message)| message)
            .collect()
    }
}

async fn pull_player(
    controller: &dyn PlayerController,
    name: &str,
    known: Option<&Item>,
) -> Result<PlayerState, UpstreamError> {
    let status = controller.fetch_status(name).await?;
    let mut item_stand_in = false;
    let item = match status.active_item.as_deref() {
        None => None,
        Some(id) if known.map(|k| k.id.as_str()) == Some(id) => known.cloned(),
        Some(id) => match controller.fetch_item(name, id).await {
            Ok(item) => Some(item),
            Err(UpstreamError::Failed(reason)) => {
                warn!("Item {} of {} unavailable ({}), sending id only", id, name, reason);
                item_stand_in = true;
                Some(Item::new(id))
            }
            Err(e) => return Err(e),
        },
    };
    Ok(PlayerState {
        status,
        item,
        item_stand_in,
    })
}

fn encode_section(
    state: &PlayerSync,
    section: Section,
    targets: &TargetSet,
    limit: usize,
) -> Result<Vec<u8>, CodecError> {
    match section {
        Section::Status => state.status.basic.encode_for(targets),
        Section::ActiveItem => {
            let item = state.item.clone().unwrap_or_default();
            ItemPayload::without_image(item).encode_for(targets)
        }
        Section::Playlist => {
            ListPayload::from_items(PLAYLIST_ID, "Playlist", &state.status.playlist, limit).encode_for(targets)
        }
        Section::Queue => {
            ListPayload::from_items(QUEUE_ID, "Queue", &state.status.queue, limit).encode_for(targets)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
