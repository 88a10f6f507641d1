//! Connection Tasks
//!
//! Each connection gets a reader task and a writer task. They only move
//! frames: the reader forwards inbound messages to the event loop, the
//! writer drains the session outbox. Neither touches relay state.

use tokio::io::{split, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::session::SessionHandle;
use crate::transport::{read_frame, write_frame, write_greeting, ByteStream, FrameError, Message, RetryPolicy};

/// Something that happened on a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A complete inbound frame.
    Inbound {
        /// Session the frame arrived on.
        handle: SessionHandle,
        /// The frame.
        message: Message,
    },
    /// The connection ended. `None` is an orderly close by the peer.
    Closed {
        /// Session that ended.
        handle: SessionHandle,
        /// Failure, if any.
        reason: Option<FrameError>,
    },
}

/// Join handles of one connection's tasks.
#[derive(Debug)]
pub struct ConnectionTasks {
    /// Inbound side.
    pub reader: JoinHandle<()>,
    /// Outbound side.
    pub writer: JoinHandle<()>,
}

/// Frame I/O limits.
#[derive(Clone, Copy, Debug)]
pub struct IoLimits {
    /// Partial I/O budget.
    pub retry: RetryPolicy,
    /// Largest accepted inbound payload.
    pub max_payload: usize,
}

/// Start the reader and writer for a stream.
///
/// The writer sends the greeting first, then every message queued on
/// `outbox` until the sender side is dropped.
pub fn spawn_connection(
    stream: Box<dyn ByteStream>,
    handle: SessionHandle,
    mut outbox: mpsc::Receiver<Message>,
    events: mpsc::Sender<ConnectionEvent>,
    limits: IoLimits,
) -> ConnectionTasks {
    let (mut rd, mut wr) = split(stream);

    let reader_events = events.clone();
    let reader = tokio::spawn(async move {
        loop {
            let event = match read_frame(&mut rd, limits.retry, limits.max_payload).await {
                Ok(Some(message)) => ConnectionEvent::Inbound { handle, message },
                Ok(None) => ConnectionEvent::Closed { handle, reason: None },
                Err(e) => ConnectionEvent::Closed { handle, reason: Some(e) },
            };
            let done = matches!(event, ConnectionEvent::Closed { .. });
            if reader_events.send(event).await.is_err() || done {
                break;
            }
        }
    });

    let writer = tokio::spawn(async move {
        let result: Result<(), FrameError> = async {
            write_greeting(&mut wr, limits.retry).await?;
            while let Some(message) = outbox.recv().await {
                write_frame(&mut wr, &message, limits.retry).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                let _ = wr.shutdown().await;
                debug!("Writer for {} finished", handle);
            }
            Err(e) => {
                let _ = events.send(ConnectionEvent::Closed { handle, reason: Some(e) }).await;
            }
        }
    });

    ConnectionTasks { reader, writer }
}
