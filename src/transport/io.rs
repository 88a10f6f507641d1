//! Bounded Frame I/O
//!
//! Reads and writes whole frames over any async byte stream. A partial
//! transfer is retried as long as the peer keeps making progress; the
//! connection fails once `max_attempts` consecutive intervals pass with no
//! bytes moved. Waiting for the first byte of the next frame is unbounded,
//! so idle clients are never dropped.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::frame::{FrameError, Message, MessageKind, GREETING, HEADER_LEN, PREFIX, SUFFIX};

/// Retry budget for partial I/O.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive no-progress intervals tolerated.
    pub max_attempts: u32,
    /// Length of one interval.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }

    /// Longest a stalled transfer can wait before failing.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(40, Duration::from_millis(50))
    }
}

// =============================================================================
// READ
// =============================================================================

/// Fill `buf` completely, failing if the peer stalls.
pub async fn read_exact_bounded<R>(
    reader: &mut R,
    buf: &mut [u8],
    policy: RetryPolicy,
) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    let mut attempts = 0;
    while filled < buf.len() {
        match timeout(policy.interval, reader.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => return Err(FrameError::UnexpectedEof),
            Ok(Ok(n)) => {
                filled += n;
                attempts = 0;
            }
            Ok(Err(e)) => return Err(FrameError::Io(e)),
            Err(_) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(FrameError::Stalled { attempts });
                }
            }
        }
    }
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames. Kind ignore frames are returned like any other.
pub async fn read_frame<R>(
    reader: &mut R,
    policy: RetryPolicy,
    max_payload: usize,
) -> Result<Option<Message>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    read_exact_bounded(reader, &mut header[1..], policy).await?;

    let prefix: [u8; 4] = [header[0], header[1], header[2], header[3]];
    if prefix != PREFIX {
        return Err(FrameError::BadPrefix(prefix));
    }
    let raw_kind = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let kind = MessageKind::from_u32(raw_kind).ok_or(FrameError::UnknownKind(raw_kind))?;
    let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if len > max_payload {
        return Err(FrameError::TooLarge { len, max: max_payload });
    }

    let mut body = vec![0u8; len + SUFFIX.len()];
    read_exact_bounded(reader, &mut body, policy).await?;
    let suffix: [u8; 4] = [body[len], body[len + 1], body[len + 2], body[len + 3]];
    if suffix != SUFFIX {
        return Err(FrameError::BadSuffix(suffix));
    }
    body.truncate(len);

    #[cfg(feature = "debug-tracing")]
    tracing::trace!("<- {:?} {}", kind, hex::encode(&body));

    Ok(Some(Message::new(kind, body)))
}

/// Read and check the greeting, returning the protocol version.
pub async fn read_greeting<R>(reader: &mut R, policy: RetryPolicy) -> Result<u8, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; GREETING.len()];
    read_exact_bounded(reader, &mut buf, policy).await?;
    if buf[..4] != PREFIX || buf[5..] != SUFFIX {
        return Err(FrameError::BadGreeting(buf.to_vec()));
    }
    Ok(buf[4])
}

// =============================================================================
// WRITE
// =============================================================================

/// Write all of `bytes`, failing if the peer stops draining.
pub async fn write_all_bounded<W>(
    writer: &mut W,
    bytes: &[u8],
    policy: RetryPolicy,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    let mut attempts = 0;
    while written < bytes.len() {
        match timeout(policy.interval, writer.write(&bytes[written..])).await {
            Ok(Ok(0)) => return Err(FrameError::UnexpectedEof),
            Ok(Ok(n)) => {
                written += n;
                attempts = 0;
            }
            Ok(Err(e)) => return Err(FrameError::Io(e)),
            Err(_) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(FrameError::Stalled { attempts });
                }
            }
        }
    }
    match timeout(policy.budget(), writer.flush()).await {
        Ok(result) => result.map_err(FrameError::Io),
        Err(_) => Err(FrameError::Stalled {
            attempts: policy.max_attempts,
        }),
    }
}

/// Write one frame.
pub async fn write_frame<W>(
    writer: &mut W,
    message: &Message,
    policy: RetryPolicy,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    #[cfg(feature = "debug-tracing")]
    tracing::trace!("-> {:?} {}", message.kind, hex::encode(&message.payload));

    let frame = message.to_frame()?;
    write_all_bounded(writer, &frame, policy).await
}

/// Write the greeting.
pub async fn write_greeting<W>(writer: &mut W, policy: RetryPolicy) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_all_bounded(writer, &GREETING, policy).await
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const MAX: usize = 1024;

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = duplex(64);
        let msg = Message::new(MessageKind::ItemRequest, b"some-id".to_vec());
        write_frame(&mut a, &msg, fast()).await.unwrap();
        let got = read_frame(&mut b, fast(), MAX).await.unwrap().unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let (a, mut b) = duplex(64);
        drop(a);
        assert!(read_frame(&mut b, fast(), MAX).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let (mut a, mut b) = duplex(64);
        let frame = Message::new(MessageKind::Status, vec![0; 8]).to_frame().unwrap();
        a.write_all(&frame[..10]).await.unwrap();
        drop(a);
        assert!(matches!(
            read_frame(&mut b, fast(), MAX).await,
            Err(FrameError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_stall_mid_frame_fails() {
        let (mut a, mut b) = duplex(64);
        let frame = Message::new(MessageKind::Status, vec![0; 8]).to_frame().unwrap();
        a.write_all(&frame[..6]).await.unwrap();
        // Keep `a` alive so the reader sees silence rather than EOF.
        let result = read_frame(&mut b, fast(), MAX).await;
        assert!(matches!(result, Err(FrameError::Stalled { attempts: 3 })));
        drop(a);
    }

    #[tokio::test]
    async fn test_slow_but_progressing_peer_succeeds() {
        let (mut a, mut b) = duplex(64);
        let msg = Message::new(MessageKind::Queue, vec![7; 20]);
        let frame = msg.to_frame().unwrap();
        let writer = tokio::spawn(async move {
            for chunk in frame.chunks(3) {
                a.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(15)).await;
            }
            a
        });
        let got = read_frame(&mut b, fast(), MAX).await.unwrap().unwrap();
        assert_eq!(got, msg);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_prefix_rejected() {
        let (mut a, mut b) = duplex(64);
        let mut frame = Message::empty(MessageKind::Ignore).to_frame().unwrap();
        frame[2] = 0x00;
        a.write_all(&frame).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, fast(), MAX).await,
            Err(FrameError::BadPrefix(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_suffix_rejected() {
        let (mut a, mut b) = duplex(64);
        let mut frame = Message::new(MessageKind::Status, vec![1, 2]).to_frame().unwrap();
        let last = frame.len() - 1;
        frame[last] = 0x00;
        a.write_all(&frame).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, fast(), MAX).await,
            Err(FrameError::BadSuffix(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kind_and_oversize() {
        let (mut a, mut b) = duplex(64);
        let mut frame = Message::empty(MessageKind::Ignore).to_frame().unwrap();
        frame[4..8].copy_from_slice(&99u32.to_be_bytes());
        a.write_all(&frame).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, fast(), MAX).await,
            Err(FrameError::UnknownKind(99))
        ));

        let (mut a, mut b) = duplex(64);
        let frame = Message::new(MessageKind::Status, vec![0; 32]).to_frame().unwrap();
        a.write_all(&frame).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, fast(), 16).await,
            Err(FrameError::TooLarge { len: 32, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_greeting() {
        let (mut a, mut b) = duplex(64);
        write_greeting(&mut a, fast()).await.unwrap();
        assert_eq!(read_greeting(&mut b, fast()).await.unwrap(), crate::PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_write_stalls_when_peer_never_reads() {
        let (mut a, _b) = duplex(8);
        let msg = Message::new(MessageKind::Playlist, vec![0; 64]);
        assert!(matches!(
            write_frame(&mut a, &msg, fast()).await,
            Err(FrameError::Stalled { .. })
        ));
    }
}
