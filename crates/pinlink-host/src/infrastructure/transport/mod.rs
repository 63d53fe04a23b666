//! Byte-stream transports to the board.
//!
//! The connection never cares *how* the stream was obtained; it asks a
//! [`TransportBootstrap`] to open one and then reads and writes bytes.
//!
//! # Why a trait? (for beginners)
//!
//! The same session code runs against a TCP socket, a USB serial port, or an
//! in-memory pipe in tests.  Hiding "open me a stream" behind an async trait
//! means the connection state machine is written once and tested without any
//! hardware: the tests hand it a `tokio::io::duplex` pipe and play the board
//! on the other end.

pub mod tcp;

#[cfg(feature = "serial")]
pub mod serial;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SessionError;
use crate::infrastructure::storage::config::{TransportConfig, TransportKind};

pub use tcp::{TcpDialBootstrap, TcpListenBootstrap};

#[cfg(feature = "serial")]
pub use serial::SerialBootstrap;

/// A bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// An opened transport of any concrete type.
pub type BoxedTransport = Box<dyn Transport>;

/// Opens the byte stream for one connection attempt.
///
/// `open` is called once per attempt; it may block for as long as it needs
/// (waiting for a board to dial in, for example) because an abort cancels it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportBootstrap: Send + Sync {
    /// Opens a fresh stream.
    async fn open(&self) -> io::Result<BoxedTransport>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Builds the bootstrap named by `config`.
///
/// # Errors
///
/// Returns [`SessionError::InvalidOperation`] when the serial transport is
/// requested but the crate was built without the `serial` feature.
pub fn bootstrap_from_config(
    config: &TransportConfig,
) -> Result<Arc<dyn TransportBootstrap>, SessionError> {
    match config.kind {
        TransportKind::TcpDial => Ok(Arc::new(TcpDialBootstrap::new(config.address.clone()))),
        TransportKind::TcpListen => Ok(Arc::new(TcpListenBootstrap::new(config.address.clone()))),
        #[cfg(feature = "serial")]
        TransportKind::Serial => Ok(Arc::new(SerialBootstrap::new(
            config.address.clone(),
            config.baud,
        ))),
        #[cfg(not(feature = "serial"))]
        TransportKind::Serial => Err(SessionError::invalid(
            "serial transport requires the `serial` feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_from_config_describes_tcp_dial_address() {
        // Arrange
        let cfg = TransportConfig {
            kind: TransportKind::TcpDial,
            address: "10.0.0.7:4545".to_string(),
            baud: 0,
        };

        // Act
        let bootstrap = bootstrap_from_config(&cfg).expect("tcp is always available");

        // Assert
        assert!(bootstrap.describe().contains("10.0.0.7:4545"));
    }

    #[test]
    fn test_bootstrap_from_config_builds_listener() {
        let cfg = TransportConfig {
            kind: TransportKind::TcpListen,
            ..TransportConfig::default()
        };

        let bootstrap = bootstrap_from_config(&cfg).unwrap();

        assert!(bootstrap.describe().starts_with("tcp listen"));
    }

    #[test]
    fn test_any_async_stream_is_a_transport() {
        use pinlink_core::{encode_packet, Command, Event, Packet};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Arrange – a scripted stream: the board says Pong(7), expects Ping(7)
        let pong = encode_packet(&Packet::Event(Event::Pong(7))).unwrap();
        let ping = encode_packet(&Packet::Command(Command::Ping(7))).unwrap();
        let mock = tokio_test::io::Builder::new().read(&pong).write(&ping).build();
        let mut transport: BoxedTransport = Box::new(mock);

        // Act / Assert
        tokio_test::block_on(async {
            let mut buf = vec![0u8; pong.len()];
            transport.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, pong);
            transport.write_all(&ping).await.unwrap();
        });
    }

    #[cfg(not(feature = "serial"))]
    #[test]
    fn test_serial_without_feature_is_invalid_operation() {
        let cfg = TransportConfig {
            kind: TransportKind::Serial,
            ..TransportConfig::default()
        };

        assert!(matches!(
            bootstrap_from_config(&cfg),
            Err(SessionError::InvalidOperation(_))
        ));
    }
}
