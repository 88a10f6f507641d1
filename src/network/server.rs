//! Relay Server
//!
//! One task owns every piece of relay state and multiplexes:
//! - newly attached connections,
//! - inbound frames and closes from connection tasks,
//! - the synchronization timer and change notifications,
//! - completions of upstream calls.
//!
//! Nothing here is locked; handlers run one at a time and never await.
//! Upstream calls are owned futures polled by the loop, and their results
//! are re-validated on arrival.

use encoding_rs::Encoding;
use futures_util::future::{join_all, FutureExt, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::broker::{Broker, Completion, Delivery, PendingRequest, RequestKind};
use super::connection::{spawn_connection, ConnectionEvent, IoLimits};
use super::protocol::{ClientMessage, ParseError};
use super::session::{SessionHandle, SessionRegistry};
use crate::codec::{TargetSet, WireRecord};
use crate::config::{ConfigError, RelayConfig};
use crate::model::{Control, PlayerList};
use crate::sync::{BroadcastScope, Pulled, SyncEngine};
use crate::transport::{Acceptor, Incoming, Message, MessageKind, TcpAcceptor};
use crate::upstream::{PlayerController, UpstreamError};

/// Messages a session may have queued before it counts as stuck.
pub const OUTBOX_CAPACITY: usize = 256;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind the listener.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// Configuration rejected.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result of an upstream call, as seen by the loop.
enum UpstreamCompletion {
    Tick(Pulled),
    Lookup(Completion),
    Control {
        player: String,
        result: Result<(), UpstreamError>,
    },
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable, thread-safe handle to a running relay.
#[derive(Clone, Debug)]
pub struct ServerHandle {
    attach_tx: mpsc::Sender<Incoming>,
    shutdown_tx: broadcast::Sender<()>,
    changed: Arc<Notify>,
}

impl ServerHandle {
    /// Hand a connection to the relay. Returns false if the relay is gone.
    pub async fn attach(&self, incoming: Incoming) -> bool {
        self.attach_tx.send(incoming).await.is_ok()
    }

    /// Tell the relay that player state changed; a tick runs promptly.
    pub fn notify_changed(&self) {
        self.changed.notify_one();
    }

    /// Ask the relay to notify every client and stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Receiver that fires on shutdown.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

/// Forward connections from `acceptor` to the relay until shutdown.
pub async fn accept_loop<A: Acceptor>(mut acceptor: A, handle: ServerHandle) {
    let mut shutdown_rx = handle.subscribe_shutdown();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            result = acceptor.accept() => match result {
                Ok(incoming) => {
                    if !handle.attach(incoming).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("Accept loop stopped");
}

// =============================================================================
// SERVER
// =============================================================================

/// The relay.
pub struct RelayServer {
    config: RelayConfig,
    controller: Rc<dyn PlayerController>,
    registry: SessionRegistry,
    engine: SyncEngine,
    broker: Broker,
    fallback: &'static Encoding,
    limits: IoLimits,
    handle: ServerHandle,
    attach_rx: mpsc::Receiver<Incoming>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: mpsc::Receiver<ConnectionEvent>,
    upstream: FuturesUnordered<LocalBoxFuture<'static, UpstreamCompletion>>,
    tick_in_flight: bool,
    resync_pending: bool,
    writers: Vec<JoinHandle<()>>,
}

impl RelayServer {
    /// Create a relay over `controller`.
    pub fn new(config: RelayConfig, controller: Rc<dyn PlayerController>) -> Result<Self, RelayError> {
        config.validate()?;
        let (attach_tx, attach_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            registry: SessionRegistry::new(),
            engine: SyncEngine::new(config.list_limit),
            broker: Broker::new(config.list_limit),
            fallback: config.source_encoding(),
            limits: IoLimits {
                retry: config.retry_policy(),
                max_payload: config.max_payload_len,
            },
            handle: ServerHandle {
                attach_tx,
                shutdown_tx,
                changed: Arc::new(Notify::new()),
            },
            config,
            controller,
            attach_rx,
            events_tx,
            events_rx,
            upstream: FuturesUnordered::new(),
            tick_in_flight: false,
            resync_pending: false,
            writers: Vec::new(),
        })
    }

    /// Handle for attaching connections, notifying and shutting down.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Bind the configured TCP address and serve until shutdown.
    pub async fn serve_tcp(self) -> Result<(), RelayError> {
        let acceptor = TcpAcceptor::bind(self.config.bind_addr).await?;
        info!("Relay listening on {}", acceptor.local_addr()?);
        let accept_task = tokio::spawn(accept_loop(acceptor, self.handle()));
        let result = self.run().await;
        accept_task.abort();
        result
    }

    /// Run the event loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<(), RelayError> {
        let mut timer = interval(self.config.poll_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.handle.subscribe_shutdown();
        let changed = Arc::clone(&self.handle.changed);

        info!(
            "Relay running: poll {}ms, list limit {}, source encoding {}",
            self.config.poll_interval_ms,
            self.config.list_limit,
            self.fallback.name()
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = timer.tick() => self.request_tick(),
                _ = changed.notified() => self.request_tick(),
                Some(incoming) = self.attach_rx.recv() => self.accept(incoming),
                Some(event) = self.events_rx.recv() => self.on_connection_event(event),
                Some(done) = self.upstream.next(), if !self.upstream.is_empty() => self.on_upstream(done),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    fn accept(&mut self, incoming: Incoming) {
        self.writers.retain(|w| !w.is_finished());
        if self.registry.len() >= self.config.max_connections {
            warn!("Connection limit reached, rejecting {}", incoming.peer);
            return;
        }

        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let handle = self.registry.insert(incoming.peer.clone(), outbox_tx);
        let tasks = spawn_connection(incoming.stream, handle, outbox_rx, self.events_tx.clone(), self.limits);
        if let Some(session) = self.registry.get_mut(handle) {
            session.set_reader(tasks.reader.abort_handle());
        }
        self.writers.push(tasks.writer);
        info!("New connection from {} as session {}", incoming.peer, handle);
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Inbound { handle, message } => self.on_inbound(handle, message),
            ConnectionEvent::Closed { handle, reason: None } => {
                if self.registry.remove(handle) {
                    info!("Session {} disconnected", handle);
                }
            }
            ConnectionEvent::Closed { handle, reason: Some(e) } => {
                if self.registry.remove(handle) {
                    warn!("Session {} dropped: {}", handle, e);
                }
            }
        }
    }

    fn close_session(&mut self, handle: SessionHandle, why: &str) {
        if self.registry.remove(handle) {
            warn!("Session {} closed: {}", handle, why);
        }
    }

    /// Queue `message`; a session that cannot take it is closed.
    fn send_to(&mut self, handle: SessionHandle, message: Message) -> bool {
        let Some(session) = self.registry.get(handle) else {
            return false;
        };
        match session.send(message) {
            Ok(()) => true,
            Err(e) => {
                self.close_session(handle, &e.to_string());
                false
            }
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    fn on_inbound(&mut self, handle: SessionHandle, message: Message) {
        let Some(session) = self.registry.get(handle) else {
            return;
        };
        if let Err(e) = session.check_order(message.kind) {
            self.close_session(handle, &format!("protocol violation: {}", e));
            return;
        }
        let parsed = match ClientMessage::parse(&message) {
            Ok(parsed) => parsed,
            Err(e @ ParseError::WrongDirection(_)) => {
                self.close_session(handle, &format!("protocol violation: {}", e));
                return;
            }
            Err(e) => {
                warn!("Session {}: {} (probable peer version mismatch)", handle, e);
                self.close_session(handle, "undecodable message");
                return;
            }
        };

        match parsed {
            ClientMessage::Ignore => {}
            ClientMessage::ClientInfo(info) => {
                let Some(session) = self.registry.get_mut(handle) else {
                    return;
                };
                if let Err(e) = session.establish(&info, self.fallback) {
                    self.close_session(handle, &format!("protocol violation: {}", e));
                    return;
                }
                self.send_player_list(handle);
                if self.config.auto_select_single_player {
                    if let [only] = self.engine.players() {
                        let name = only.name.clone();
                        self.select_player(handle, name);
                    }
                }
            }
            ClientMessage::PlayerSelect(name) => self.select_player(handle, name),
            ClientMessage::Control(control) => self.forward_control(handle, control),
            ClientMessage::ItemRequest(id) => self.issue_lookup(handle, RequestKind::Item, id),
            ClientMessage::ListRequest(id) => self.issue_lookup(handle, RequestKind::List, id),
            ClientMessage::LibraryRequest => self.issue_lookup(handle, RequestKind::Library, String::new()),
        }
    }

    fn player_list_payload(&self, targets: &TargetSet) -> Option<Message> {
        match PlayerList::from_players(self.engine.players()).encode_for(targets) {
            Ok(bytes) => Some(Message::new(MessageKind::PlayerList, bytes)),
            Err(e) => {
                error!("Failed to encode player list: {}", e);
                None
            }
        }
    }

    fn send_player_list(&mut self, handle: SessionHandle) {
        let Some(session) = self.registry.get(handle) else {
            return;
        };
        if let Some(message) = self.player_list_payload(&session.targets) {
            self.send_to(handle, message);
        }
    }

    fn broadcast_player_list(&mut self) {
        let mut cache: BTreeMap<String, Option<Message>> = BTreeMap::new();
        let mut out = Vec::new();
        for session in self.registry.iter().filter(|s| s.is_established()) {
            let message = cache
                .entry(session.targets.key().to_string())
                .or_insert_with(|| self.player_list_payload(&session.targets));
            if let Some(message) = message {
                out.push((session.handle, message.clone()));
            }
        }
        debug!("Player list sent to {} sessions", out.len());
        for (handle, message) in out {
            self.send_to(handle, message);
        }
    }

    fn select_player(&mut self, handle: SessionHandle, name: String) {
        let Some(info) = self.engine.player(&name).cloned() else {
            debug!("Session {} selected unknown player {:?}", handle, name);
            self.send_player_list(handle);
            return;
        };
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        session.subscribed = Some(name.clone());
        let targets = session.targets.clone();

        let descriptor = match info.encode_for(&targets) {
            Ok(bytes) => Message::new(MessageKind::PlayerDescriptor, bytes),
            Err(e) => {
                error!("Failed to encode descriptor of {}: {}", name, e);
                return;
            }
        };
        let snapshot = self.engine.snapshot(&name, &targets);
        info!("Session {} follows {}", handle, name);
        for message in std::iter::once(descriptor).chain(snapshot) {
            if !self.send_to(handle, message) {
                break;
            }
        }
    }

    fn subscribed_player(&self, handle: SessionHandle) -> Option<String> {
        let player = self.registry.get(handle)?.subscribed.clone();
        if player.is_none() {
            debug!("Session {} sent a request without selecting a player", handle);
        }
        player
    }

    fn forward_control(&mut self, handle: SessionHandle, control: Control) {
        let Some(player) = self.subscribed_player(handle) else {
            return;
        };
        debug!("Session {} -> {}: {:?}", handle, player, control);
        let controller = Rc::clone(&self.controller);
        self.upstream.push(
            async move {
                let result = controller.send_control(&player, &control).await;
                UpstreamCompletion::Control { player, result }
            }
            .boxed_local(),
        );
    }

    fn issue_lookup(&mut self, handle: SessionHandle, kind: RequestKind, requested_id: String) {
        let Some(player) = self.subscribed_player(handle) else {
            return;
        };
        let limits = match self.registry.get(handle) {
            Some(session) => session.limits,
            None => return,
        };
        let request = PendingRequest {
            session: handle,
            requested_id,
            player,
            kind,
        };
        let lookup = self.broker.issue(Rc::clone(&self.controller), request, limits);
        self.upstream.push(lookup.map(UpstreamCompletion::Lookup).boxed_local());
    }

    // =========================================================================
    // UPSTREAM
    // =========================================================================

    /// Start a tick, or mark one pending if a tick is already running.
    fn request_tick(&mut self) {
        if self.tick_in_flight {
            self.resync_pending = true;
            return;
        }
        self.tick_in_flight = true;
        let pull = self.engine.pull(Rc::clone(&self.controller));
        self.upstream.push(pull.map(UpstreamCompletion::Tick).boxed_local());
    }

    fn on_upstream(&mut self, done: UpstreamCompletion) {
        match done {
            UpstreamCompletion::Tick(pulled) => self.on_tick(pulled),
            UpstreamCompletion::Lookup(completion) => {
                let player = completion.request.player.clone();
                match self.broker.complete(completion, &self.registry, self.engine.players()) {
                    Delivery::Send(handle, message) => {
                        self.send_to(handle, message);
                    }
                    Delivery::Discarded => {}
                    Delivery::Failed(UpstreamError::ServiceGone) => self.player_gone(&player),
                    Delivery::Failed(_) => {}
                }
            }
            UpstreamCompletion::Control { player, result } => match result {
                Ok(()) => {
                    if self.config.resync_after_control {
                        self.request_tick();
                    }
                }
                Err(UpstreamError::ServiceGone) => self.player_gone(&player),
                Err(e) => warn!("Control for {} failed: {}", player, e),
            },
        }
    }

    fn on_tick(&mut self, pulled: Pulled) {
        self.tick_in_flight = false;
        let outcome = self.engine.apply(pulled);

        for name in &outcome.removed {
            self.forget_player(name);
        }
        if outcome.directory_changed {
            self.broadcast_player_list();
        }

        let mut deliveries = Vec::new();
        {
            let mut scope = BroadcastScope::new();
            for (player, changes) in &outcome.updates {
                let recipients = self.registry.followers(player);
                deliveries.extend(self.engine.broadcast(player, *changes, &recipients, &mut scope));
            }
            if !outcome.updates.is_empty() {
                debug!(
                    "Tick {}: {} updates, {} payloads encoded, {} shared",
                    self.engine.ticks(),
                    outcome.updates.len(),
                    scope.encodes(),
                    scope.hits()
                );
            }
        }
        for (handle, message) in deliveries {
            self.send_to(handle, message);
        }

        if self.resync_pending {
            self.resync_pending = false;
            self.request_tick();
        }
    }

    fn forget_player(&mut self, name: &str) {
        self.broker.forget_player(name);
        for session in self.registry.iter_mut() {
            if session.subscribed.as_deref() == Some(name) {
                session.subscribed = None;
            }
        }
    }

    fn player_gone(&mut self, name: &str) {
        if self.engine.remove_player(name) {
            info!("Player {} gone", name);
            self.forget_player(name);
            self.broadcast_player_list();
        }
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    async fn shutdown(&mut self) {
        info!("Notifying {} sessions of shutdown", self.registry.len());
        for handle in self.registry.handles() {
            self.send_to(handle, Message::empty(MessageKind::ShutdownNotice));
            self.registry.remove(handle);
        }
        let writers = std::mem::take(&mut self.writers);
        if tokio::time::timeout(self.limits.retry.budget(), join_all(writers))
            .await
            .is_err()
        {
            warn!("Some connections did not drain before shutdown");
        }
    }
}
