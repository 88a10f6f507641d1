//! Network Layer
//!
//! Client sessions, the relay event loop and the lookup broker. All state
//! here lives on the loop task; connection tasks only move frames.

pub mod broker;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod session;

pub use broker::{Broker, Completion, Delivery, PendingRequest, Reply, RequestKind};
pub use connection::{spawn_connection, ConnectionEvent, ConnectionTasks, IoLimits};
pub use protocol::{ClientInfo, ClientMessage, Empty, Key, ParseError};
pub use server::{accept_loop, RelayError, RelayServer, ServerHandle, OUTBOX_CAPACITY};
pub use session::{ClientSession, ProtocolError, SendError, SessionHandle, SessionRegistry, SessionState};
