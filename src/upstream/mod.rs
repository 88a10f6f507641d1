//! Upstream Player Controller
//!
//! The boundary to whatever actually controls the media players. Calls are
//! asynchronous and are awaited from the relay's event loop, which is
//! single-threaded, so implementations need not be `Send`.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Control, DisplayLimits, Item, ListContents, ListEntry, PlayerInfo, PlayerStatus};

pub use memory::MemoryController;

/// Errors reported by the upstream controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The call timed out without a reply.
    #[error("no reply from upstream")]
    NoReply,

    /// The player (or the whole service) disappeared.
    #[error("upstream service gone")]
    ServiceGone,

    /// The call failed for another reason.
    #[error("upstream call failed: {0}")]
    Failed(String),
}

/// Player controller interface.
///
/// Every operation addresses one player by name, except
/// [`PlayerController::fetch_players`].
#[async_trait(?Send)]
pub trait PlayerController {
    /// List the players currently available.
    async fn fetch_players(&self) -> Result<Vec<PlayerInfo>, UpstreamError>;

    /// Current status of a player.
    async fn fetch_status(&self, player: &str) -> Result<PlayerStatus, UpstreamError>;

    /// Metadata of one item.
    async fn fetch_item(&self, player: &str, id: &str) -> Result<Item, UpstreamError>;

    /// Contents of a named list.
    async fn fetch_list(&self, player: &str, id: &str) -> Result<ListContents, UpstreamError>;

    /// All named lists of a player.
    async fn fetch_library(&self, player: &str) -> Result<Vec<ListEntry>, UpstreamError>;

    /// Forward a control command.
    async fn send_control(&self, player: &str, control: &Control) -> Result<(), UpstreamError>;

    /// Resolve an image reference to encoded image bytes fitting `limits`.
    ///
    /// Controllers without image support keep the default.
    async fn fetch_image(
        &self,
        _player: &str,
        _reference: &str,
        _limits: DisplayLimits,
    ) -> Result<Option<Vec<u8>>, UpstreamError> {
        Ok(None)
    }
}
