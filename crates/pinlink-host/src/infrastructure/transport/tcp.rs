//! TCP transports: dial a board (e.g. behind a Wi-Fi bridge) or wait for one
//! to dial in.

use std::io;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::{BoxedTransport, TransportBootstrap};

/// Connects to `host:port` on every attempt.
#[derive(Debug, Clone)]
pub struct TcpDialBootstrap {
    address: String,
}

impl TcpDialBootstrap {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl TransportBootstrap for TcpDialBootstrap {
    async fn open(&self) -> io::Result<BoxedTransport> {
        debug!(address = %self.address, "dialling board");
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("tcp dial {}", self.address)
    }
}

/// Binds `address` and accepts a single board per attempt.
///
/// The listening socket only lives for the duration of `open`, so a second
/// board dialling in while a session is active is refused by the OS.
#[derive(Debug, Clone)]
pub struct TcpListenBootstrap {
    address: String,
}

impl TcpListenBootstrap {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl TransportBootstrap for TcpListenBootstrap {
    async fn open(&self) -> io::Result<BoxedTransport> {
        let listener = TcpListener::bind(&self.address).await?;
        info!(address = %listener.local_addr()?, "waiting for board to connect");
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "board connected");
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("tcp listen {}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_dial_bootstrap_opens_stream_to_listener() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bootstrap = TcpDialBootstrap::new(addr.to_string());

        // Act
        let (opened, accepted) = tokio::join!(bootstrap.open(), listener.accept());
        let mut transport = opened.expect("dial must succeed");
        let (mut peer, _) = accepted.unwrap();
        transport.write_all(&[1, 2, 3]).await.unwrap();

        // Assert
        let mut buf = [0u8; 3];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dial_bootstrap_reports_refused_connection() {
        // Bind then drop so the port is (almost certainly) closed.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let bootstrap = TcpDialBootstrap::new(addr.to_string());

        assert!(bootstrap.open().await.is_err());
    }

    #[tokio::test]
    async fn test_listen_bootstrap_fails_on_unparseable_address() {
        let bootstrap = TcpListenBootstrap::new("not an address");

        assert!(bootstrap.open().await.is_err());
    }
}
