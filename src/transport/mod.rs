//! Framed Transport
//!
//! Turns byte streams into `(kind, payload)` messages.
//!
//! - `frame.rs`    - message kinds, frame layout, errors
//! - `io.rs`       - retry-bounded frame read/write
//! - `listener.rs` - connection acceptors

pub mod frame;
pub mod io;
pub mod listener;

pub use frame::{FrameError, Message, MessageKind, GREETING};
pub use io::{read_frame, read_greeting, write_frame, write_greeting, RetryPolicy};
pub use listener::{Acceptor, ByteStream, Incoming, TcpAcceptor};
