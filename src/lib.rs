//! # Player Relay
//!
//! Remote-control relay for media players. Keeps a snapshot of each player's
//! state, streams changes to connected clients over a framed binary protocol
//! and relays their commands and lookups back to the player controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PLAYER RELAY                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  codec/          - Wire codec (pure)                         │
//! │  ├── reader.rs   - Bounded byte cursors                      │
//! │  ├── charset.rs  - Encoding negotiation                      │
//! │  ├── strvec.rs   - String vectors                            │
//! │  └── field.rs    - Schemas and typed fields                  │
//! │                                                              │
//! │  transport/      - Framing over any byte stream              │
//! │  ├── frame.rs    - Kinds, frame layout                       │
//! │  ├── io.rs       - Retry-bounded frame I/O                   │
//! │  └── listener.rs - Acceptors                                 │
//! │                                                              │
//! │  model/          - Player, status, item and list records     │
//! │  sync/           - Fingerprints, diffs, broadcast cache      │
//! │  upstream/       - Player controller boundary                │
//! │                                                              │
//! │  network/        - Sessions, broker, event loop              │
//! │  ├── session.rs  - Handshake state and registry              │
//! │  ├── broker.rs   - Item / list / library lookups             │
//! │  └── server.rs   - The relay loop                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Single Owner
//!
//! All relay state is owned by one task on a current-thread runtime:
//! - No locks around sessions, fingerprints or pending lookups
//! - Upstream calls are futures polled by the loop, never spawned
//! - Every reply is re-validated against the session registry on arrival

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod core;
pub mod model;
pub mod network;
pub mod sync;
pub mod transport;
pub mod upstream;

// Re-export commonly used types
pub use config::{ConfigError, RelayConfig};
pub use network::{RelayError, RelayServer, ServerHandle};
pub use transport::{Incoming, Message, MessageKind};
pub use upstream::{MemoryController, PlayerController, UpstreamError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version sent in the greeting.
pub const PROTOCOL_VERSION: u8 = 7;
