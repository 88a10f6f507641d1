//! Connection Acceptors
//!
//! The relay only needs "something that yields byte streams". TCP is the
//! built-in implementation; tests attach in-memory duplex streams directly.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

/// A bidirectional byte stream the relay can frame.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// One accepted connection.
pub struct Incoming {
    /// The stream.
    pub stream: Box<dyn ByteStream>,
    /// Peer description for logs.
    pub peer: String,
}

impl Incoming {
    /// Wrap a stream.
    pub fn new<S: ByteStream>(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Box::new(stream),
            peer: peer.into(),
        }
    }
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming").field("peer", &self.peer).finish()
    }
}

/// Source of incoming connections.
#[async_trait]
pub trait Acceptor: Send {
    /// Wait for the next connection.
    async fn accept(&mut self) -> io::Result<Incoming>;
}

/// TCP acceptor.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind to `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&mut self) -> io::Result<Incoming> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Incoming::new(stream, addr.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_tcp_accept() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(addr).await.unwrap();
            s.write_all(b"hi").await.unwrap();
        });

        let mut incoming = acceptor.accept().await.unwrap();
        let mut buf = [0u8; 2];
        incoming.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        assert!(incoming.peer.starts_with("127.0.0.1:"));
        client.await.unwrap();
    }
}
