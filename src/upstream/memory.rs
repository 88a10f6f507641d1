//! In-Memory Controller
//!
//! A `PlayerController` backed by plain data. Used by the demo binary and by
//! tests, which can mutate player state, inject failures and remove players
//! while a relay is running.

use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use super::{PlayerController, UpstreamError};
use crate::model::item::meta;
use crate::model::{
    BasicStatus, Control, DisplayLimits, Item, ItemRef, ListContents, ListEntry, PlaybackState,
    PlayerInfo, PlayerStatus,
};

/// State of one simulated player.
#[derive(Clone, Debug, Default)]
pub struct MemoryPlayer {
    /// Descriptor.
    pub info: PlayerInfo,
    /// Current status.
    pub status: PlayerStatus,
    /// Known items by id.
    pub items: BTreeMap<String, Item>,
    /// Named lists by id.
    pub lists: BTreeMap<String, ListContents>,
    /// Library entries.
    pub library: Vec<ListEntry>,
}

impl MemoryPlayer {
    /// Player with no content.
    pub fn new(info: PlayerInfo) -> Self {
        Self {
            info,
            ..Default::default()
        }
    }

    fn title_of(&self, id: &str) -> String {
        self.items
            .get(id)
            .and_then(|item| item.meta(meta::TITLE))
            .unwrap_or(id)
            .to_string()
    }

    fn jump_to(&mut self, position: i32) {
        let Some(entry) = usize::try_from(position)
            .ok()
            .and_then(|p| self.status.playlist.get(p))
        else {
            return;
        };
        self.status.active_item = Some(entry.id.clone());
        self.status.basic.position = position;
        self.status.basic.state = PlaybackState::Play;
    }

    fn apply(&mut self, control: &Control) {
        let basic = &mut self.status.basic;
        match control {
            Control::PlayPause => {
                basic.state = match basic.state {
                    PlaybackState::Play => PlaybackState::Pause,
                    _ => PlaybackState::Play,
                }
            }
            Control::Stop => basic.state = PlaybackState::Stop,
            Control::Next => {
                let next = basic.position + 1;
                self.jump_to(next);
            }
            Control::Prev => {
                let prev = (basic.position - 1).max(0);
                self.jump_to(prev);
            }
            Control::Seek(_) => {}
            Control::Volume(v) => basic.volume = (*v).clamp(0, BasicStatus::MAX_VOLUME),
            Control::ToggleRepeat => basic.repeat = basic.repeat.cycle(),
            Control::ToggleShuffle => basic.shuffle = !basic.shuffle,
            Control::JumpPlaylist(p) => self.jump_to(*p),
            Control::JumpQueue(p) => {
                let index = usize::try_from(*p).ok().filter(|&i| i < self.status.queue.len());
                if let Some(i) = index {
                    let entry = self.status.queue.remove(i);
                    self.status.active_item = Some(entry.id);
                    self.status.basic.state = PlaybackState::Play;
                }
            }
            Control::Rating(r) => {
                if let Some(item) = self
                    .status
                    .active_item
                    .as_ref()
                    .and_then(|id| self.items.get_mut(id))
                {
                    item.metadata.retain(|(n, _)| n != meta::RATING);
                    item.metadata.push((meta::RATING.to_string(), r.to_string()));
                }
            }
            Control::PlayItem(id) => {
                self.status.active_item = Some(id.clone());
                self.status.basic.state = PlaybackState::Play;
            }
            Control::Enqueue(id) => {
                let title = self.title_of(id);
                self.status.queue.push(ItemRef::new(id.clone(), title));
            }
        }
    }
}

/// What a [`MemoryController`] call was.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Call {
    /// `fetch_players`
    Players,
    /// `fetch_status`
    Status,
    /// `fetch_item`
    Item,
    /// `fetch_list`
    List,
    /// `fetch_library`
    Library,
    /// `send_control`
    Control,
    /// `fetch_image`
    Image,
}

/// In-memory player controller.
#[derive(Default)]
pub struct MemoryController {
    players: RefCell<Vec<MemoryPlayer>>,
    images: RefCell<BTreeMap<String, Vec<u8>>>,
    failures: RefCell<VecDeque<(Call, UpstreamError)>>,
    calls: RefCell<BTreeMap<Call, usize>>,
    latency: Cell<Duration>,
}

impl MemoryController {
    /// Controller with no players.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a player.
    pub fn add_player(&self, player: MemoryPlayer) {
        let mut players = self.players.borrow_mut();
        players.retain(|p| p.info.name != player.info.name);
        players.push(player);
    }

    /// Remove a player; later calls addressing it report `ServiceGone`.
    pub fn remove_player(&self, name: &str) {
        self.players.borrow_mut().retain(|p| p.info.name != name);
    }

    /// Mutate a player in place. Returns false if it does not exist.
    pub fn update<F: FnOnce(&mut MemoryPlayer)>(&self, name: &str, f: F) -> bool {
        let mut players = self.players.borrow_mut();
        match players.iter_mut().find(|p| p.info.name == name) {
            Some(player) => {
                f(player);
                true
            }
            None => false,
        }
    }

    /// Snapshot of a player's status.
    pub fn status(&self, name: &str) -> Option<PlayerStatus> {
        self.players
            .borrow()
            .iter()
            .find(|p| p.info.name == name)
            .map(|p| p.status.clone())
    }

    /// Register image bytes for a reference.
    pub fn set_image(&self, reference: impl Into<String>, bytes: Vec<u8>) {
        self.images.borrow_mut().insert(reference.into(), bytes);
    }

    /// Make the next call of kind `call` fail with `error`.
    pub fn fail_next(&self, call: Call, error: UpstreamError) {
        self.failures.borrow_mut().push_back((call, error));
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency.set(latency);
    }

    /// Number of calls of kind `call` so far.
    pub fn calls(&self, call: Call) -> usize {
        self.calls.borrow().get(&call).copied().unwrap_or(0)
    }

    async fn enter(&self, call: Call) -> Result<(), UpstreamError> {
        *self.calls.borrow_mut().entry(call).or_insert(0) += 1;
        let latency = self.latency.get();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut failures = self.failures.borrow_mut();
        if let Some(index) = failures.iter().position(|(c, _)| *c == call) {
            if let Some((_, error)) = failures.remove(index) {
                return Err(error);
            }
        }
        Ok(())
    }

    fn with_player<T, F>(&self, name: &str, f: F) -> Result<T, UpstreamError>
    where
        F: FnOnce(&mut MemoryPlayer) -> Result<T, UpstreamError>,
    {
        let mut players = self.players.borrow_mut();
        let player = players
            .iter_mut()
            .find(|p| p.info.name == name)
            .ok_or(UpstreamError::ServiceGone)?;
        f(player)
    }
}

#[async_trait(?Send)]
impl PlayerController for MemoryController {
    async fn fetch_players(&self) -> Result<Vec<PlayerInfo>, UpstreamError> {
        self.enter(Call::Players).await?;
        Ok(self.players.borrow().iter().map(|p| p.info.clone()).collect())
    }

    async fn fetch_status(&self, player: &str) -> Result<PlayerStatus, UpstreamError> {
        self.enter(Call::Status).await?;
        self.with_player(player, |p| Ok(p.status.clone()))
    }

    async fn fetch_item(&self, player: &str, id: &str) -> Result<Item, UpstreamError> {
        self.enter(Call::Item).await?;
        self.with_player(player, |p| {
            p.items
                .get(id)
                .cloned()
                .ok_or_else(|| UpstreamError::Failed(format!("no item {:?}", id)))
        })
    }

    async fn fetch_list(&self, player: &str, id: &str) -> Result<ListContents, UpstreamError> {
        self.enter(Call::List).await?;
        self.with_player(player, |p| {
            p.lists
                .get(id)
                .cloned()
                .ok_or_else(|| UpstreamError::Failed(format!("no list {:?}", id)))
        })
    }

    async fn fetch_library(&self, player: &str) -> Result<Vec<ListEntry>, UpstreamError> {
        self.enter(Call::Library).await?;
        self.with_player(player, |p| Ok(p.library.clone()))
    }

    async fn send_control(&self, player: &str, control: &Control) -> Result<(), UpstreamError> {
        self.enter(Call::Control).await?;
        self.with_player(player, |p| {
            p.apply(control);
            Ok(())
        })
    }

    async fn fetch_image(
        &self,
        _player: &str,
        reference: &str,
        limits: DisplayLimits,
    ) -> Result<Option<Vec<u8>>, UpstreamError> {
        self.enter(Call::Image).await?;
        if !limits.wants_images() {
            return Ok(None);
        }
        Ok(self.images.borrow().get(reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> MemoryPlayer {
        let mut p = MemoryPlayer::new(PlayerInfo::new("mpd", PlayerInfo::FLAG_PLAYLIST, 5));
        p.status.playlist = vec![ItemRef::new("a", "A"), ItemRef::new("b", "B")];
        p.status.active_item = Some("a".into());
        p.status.basic.volume = 50;
        p
    }

    #[tokio::test]
    async fn test_controls_mutate_status() {
        let ctrl = MemoryController::new();
        ctrl.add_player(player());

        ctrl.send_control("mpd", &Control::PlayPause).await.unwrap();
        ctrl.send_control("mpd", &Control::Next).await.unwrap();
        ctrl.send_control("mpd", &Control::Volume(150)).await.unwrap();
        ctrl.send_control("mpd", &Control::Enqueue("z".into())).await.unwrap();

        let status = ctrl.fetch_status("mpd").await.unwrap();
        assert_eq!(status.basic.state, PlaybackState::Play);
        assert_eq!(status.active_item.as_deref(), Some("b"));
        assert_eq!(status.basic.position, 1);
        assert_eq!(status.basic.volume, BasicStatus::MAX_VOLUME);
        assert_eq!(status.queue, vec![ItemRef::new("z", "z")]);
    }

    #[tokio::test]
    async fn test_removed_player_is_gone() {
        let ctrl = MemoryController::new();
        ctrl.add_player(player());
        ctrl.remove_player("mpd");
        assert_eq!(ctrl.fetch_status("mpd").await, Err(UpstreamError::ServiceGone));
        assert!(ctrl.fetch_players().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failure_hits_once() {
        let ctrl = MemoryController::new();
        ctrl.add_player(player());
        ctrl.fail_next(Call::Status, UpstreamError::NoReply);

        assert_eq!(ctrl.fetch_status("mpd").await, Err(UpstreamError::NoReply));
        assert!(ctrl.fetch_status("mpd").await.is_ok());
        assert_eq!(ctrl.calls(Call::Status), 2);
    }

    #[tokio::test]
    async fn test_image_default_and_lookup() {
        let ctrl = MemoryController::new();
        ctrl.set_image("/c.png", vec![1, 2, 3]);
        let none = ctrl.fetch_image("x", "/c.png", DisplayLimits::default()).await.unwrap();
        assert!(none.is_none());
        let some = ctrl
            .fetch_image("x", "/c.png", DisplayLimits::new(100, 100))
            .await
            .unwrap();
        assert_eq!(some, Some(vec![1, 2, 3]));
    }
}
