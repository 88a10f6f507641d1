//! Request/Response Broker
//!
//! Services item, list and library lookups. A lookup becomes an owned
//! future carrying its [`PendingRequest`]; when it completes, the reply is
//! delivered only if the originating session still exists, is still
//! following the same player, and that player still exists. Otherwise the
//! reply is dropped. There is no other cancellation.

use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, error, warn};

use super::session::{SessionHandle, SessionRegistry};
use crate::codec::{CodecError, TargetSet, WireRecord};
use crate::model::{
    DisplayLimits, ItemPayload, LibraryPayload, ListContents, ListEntry, ListPayload, PlayerInfo,
};
use crate::transport::{Message, MessageKind};
use crate::upstream::{PlayerController, UpstreamError};

/// What is being looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// One item.
    Item,
    /// One named list.
    List,
    /// The library.
    Library,
}

/// An issued lookup awaiting its reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    /// Originating session. Weak: may no longer resolve.
    pub session: SessionHandle,
    /// Requested item or list id; empty for the library.
    pub requested_id: String,
    /// Player the request was issued against.
    pub player: String,
    /// Lookup kind.
    pub kind: RequestKind,
}

/// Reply data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Item with optional image bytes.
    Item(ItemPayload),
    /// List contents.
    List(ListContents),
    /// Library entries.
    Library(Vec<ListEntry>),
}

/// A finished lookup.
#[derive(Debug)]
pub struct Completion {
    /// The request.
    pub request: PendingRequest,
    /// Its outcome.
    pub result: Result<Reply, UpstreamError>,
}

/// What happened to a completion.
#[derive(Debug)]
pub enum Delivery {
    /// Send this message to this session.
    Send(SessionHandle, Message),
    /// Stale or unencodable; nothing is sent.
    Discarded,
    /// The upstream call failed; nothing is sent.
    Failed(UpstreamError),
}

/// Lookup bookkeeping.
#[derive(Debug)]
pub struct Broker {
    /// `(player, list id) -> display name`, learnt from library and list
    /// replies.
    names: BTreeMap<(String, String), String>,
    list_limit: usize,
}

impl Broker {
    /// Create a broker.
    pub fn new(list_limit: usize) -> Self {
        Self {
            names: BTreeMap::new(),
            list_limit,
        }
    }

    /// Issue a lookup. The returned future owns everything it needs.
    pub fn issue(
        &self,
        controller: Rc<dyn PlayerController>,
        request: PendingRequest,
        limits: DisplayLimits,
    ) -> impl Future<Output = Completion> + 'static {
        debug!(
            "Issuing {:?} lookup {:?} on {} for {}",
            request.kind, request.requested_id, request.player, request.session
        );
        async move {
            let player = request.player.as_str();
            let id = request.requested_id.as_str();
            let result = match request.kind {
                RequestKind::Item => fetch_item_with_image(&*controller, player, id, limits)
                    .await
                    .map(Reply::Item),
                RequestKind::List => controller.fetch_list(player, id).await.map(Reply::List),
                RequestKind::Library => controller.fetch_library(player).await.map(Reply::Library),
            };
            Completion { request, result }
        }
    }

    /// Route a completed lookup.
    pub fn complete(
        &mut self,
        completion: Completion,
        registry: &SessionRegistry,
        players: &[PlayerInfo],
    ) -> Delivery {
        let Completion { request, result } = completion;
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    "{:?} lookup {:?} on {} failed: {}",
                    request.kind, request.requested_id, request.player, e
                );
                return Delivery::Failed(e);
            }
        };

        match &reply {
            Reply::Library(entries) => self.learn(&request.player, entries),
            Reply::List(contents) => self.learn(&request.player, &contents.nested),
            Reply::Item(_) => {}
        }

        let Some(session) = registry.get(request.session) else {
            debug!("Dropping reply for closed session {}", request.session);
            return Delivery::Discarded;
        };
        if !session.follows(&request.player) {
            debug!(
                "Dropping reply for {}: session {} switched away",
                request.player, request.session
            );
            return Delivery::Discarded;
        }
        if !players.iter().any(|p| p.name == request.player) {
            debug!("Dropping reply for vanished player {}", request.player);
            return Delivery::Discarded;
        }

        match self.encode_reply(&request, reply, &session.targets) {
            Ok(message) => Delivery::Send(request.session, message),
            Err(e) => {
                error!("Failed to encode {:?} reply: {}", request.kind, e);
                Delivery::Discarded
            }
        }
    }

    /// Display name of a list, if known.
    pub fn list_name(&self, player: &str, id: &str) -> Option<&str> {
        self.names
            .get(&(player.to_string(), id.to_string()))
            .map(String::as_str)
    }

    /// Drop everything learnt about a player.
    pub fn forget_player(&mut self, player: &str) {
        self.names.retain(|(p, _), _| p != player);
    }

    fn learn(&mut self, player: &str, entries: &[ListEntry]) {
        for entry in entries {
            self.names
                .insert((player.to_string(), entry.id.clone()), entry.name.clone());
        }
    }

    fn encode_reply(
        &self,
        request: &PendingRequest,
        reply: Reply,
        targets: &TargetSet,
    ) -> Result<Message, CodecError> {
        let (kind, payload) = match reply {
            Reply::Item(item) => (MessageKind::ItemResponse, item.encode_for(targets)?),
            Reply::List(contents) => {
                let id = request.requested_id.as_str();
                let name = self.list_name(&request.player, id).unwrap_or(id);
                let payload = ListPayload::build(id, name, &contents, self.list_limit);
                (MessageKind::ListResponse, payload.encode_for(targets)?)
            }
            Reply::Library(entries) => {
                let payload = LibraryPayload::build(&entries, self.list_limit);
                (MessageKind::LibraryResponse, payload.encode_for(targets)?)
            }
        };
        Ok(Message::new(kind, payload))
    }
}

async fn fetch_item_with_image(
    controller: &dyn PlayerController,
    player: &str,
    id: &str,
    limits: DisplayLimits,
) -> Result<ItemPayload, UpstreamError> {
    let item = controller.fetch_item(player, id).await?;
    let image_data = match item.image.as_deref() {
        Some(reference) if limits.wants_images() => {
            match controller.fetch_image(player, reference, limits).await {
                Ok(data) => data,
                Err(e) => {
                    debug!("Image {} of {} unavailable: {}", reference, id, e);
                    None
                }
            }
        }
        _ => None,
    };
    Ok(ItemPayload { item, image_data })
}

// =============================================================================
// TESTS
// =============================================================================
