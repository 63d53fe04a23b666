//! The caller-facing session: one board, its connection and its resources.
//!
//! # Typical use (for beginners)
//!
//! ```no_run
//! use std::sync::Arc;
//! use pinlink_host::{ConnectionConfig, Session, TcpDialBootstrap};
//!
//! # async fn demo() -> Result<(), pinlink_host::SessionError> {
//! let session = Session::new(
//!     Arc::new(TcpDialBootstrap::new("192.168.4.1:4545")),
//!     ConnectionConfig::default(),
//! );
//! session.wait_for_connect().await?;
//! let led = session.open_digital_output(0, false, true).await?;
//! led.write(false).await?;
//! led.close().await;
//! session.disconnect();
//! # Ok(())
//! # }
//! ```
//!
//! Sessions are plain values: create as many as there are boards.  Dropping
//! a session aborts its connection.

use std::sync::Arc;

use pinlink_core::protocol::{Parity, Pull, StopBits};
use pinlink_core::{FrameCodec, HandshakeInfo, ListenerId, ListenerRegistry, PacketListener};
use tracing::info;

use crate::application::handles::{AnalogInput, DigitalInput, DigitalOutput, PwmOutput, Uart};
use crate::application::resources::Resources;
use crate::error::SessionError;
use crate::infrastructure::connection::{Connection, ConnectionState};
use crate::infrastructure::storage::config::{ConnectionConfig, HostConfig};
use crate::infrastructure::transport::{bootstrap_from_config, TransportBootstrap};

/// State shared between a session and its handles.
pub(crate) struct SessionShared {
    pub(crate) connection: Arc<Connection>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) resources: Arc<Resources>,
}

/// Frees every resource whenever the connection goes away; the board resets
/// its pins when a session ends.
struct Invalidator(Arc<Resources>);

impl PacketListener for Invalidator {
    fn on_disconnect(&self) {
        self.0.invalidate();
    }
}

/// A host-side session with one board.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Creates a disconnected session.  Nothing is opened until
    /// [`Session::wait_for_connect`].
    pub fn new(bootstrap: Arc<dyn TransportBootstrap>, config: ConnectionConfig) -> Self {
        let listeners = Arc::new(ListenerRegistry::new());
        let connection = Connection::new(bootstrap, config, Arc::clone(&listeners));
        Self::assemble(connection, listeners)
    }

    /// Like [`Session::new`] with a custom frame codec.
    pub fn with_codec(
        bootstrap: Arc<dyn TransportBootstrap>,
        config: ConnectionConfig,
        codec: Arc<dyn FrameCodec>,
    ) -> Self {
        let listeners = Arc::new(ListenerRegistry::new());
        let connection = Connection::with_codec(bootstrap, config, Arc::clone(&listeners), codec);
        Self::assemble(connection, listeners)
    }

    /// Builds a session from a loaded configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the configured transport is unavailable in this build.
    pub fn from_config(config: &HostConfig) -> Result<Self, SessionError> {
        let bootstrap = bootstrap_from_config(&config.transport)?;
        Ok(Self::new(bootstrap, config.connection.clone()))
    }

    fn assemble(connection: Connection, listeners: Arc<ListenerRegistry>) -> Self {
        let resources = Arc::new(Resources::new());
        listeners.register(Arc::new(Invalidator(Arc::clone(&resources))));
        Self {
            shared: Arc::new(SessionShared {
                connection: Arc::new(connection),
                listeners,
                resources,
            }),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Waits until the board is verified.  See
    /// [`Connection::wait_for_connect`] for the error cases.
    pub async fn wait_for_connect(&self) -> Result<(), SessionError> {
        self.shared.connection.wait_for_connect().await
    }

    /// Cancels any attempt and closes the transport.  Never blocks.
    pub fn abort_connection(&self) {
        self.shared.connection.abort();
    }

    /// Aborts the connection, frees every pin and module, and invalidates
    /// all open handles.
    pub fn disconnect(&self) {
        info!("disconnecting session");
        self.shared.connection.abort();
        self.shared.resources.invalidate();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    pub fn handshake(&self) -> Option<HandshakeInfo> {
        self.shared.connection.handshake()
    }

    /// Resolves when the current verified connection ends (immediately if
    /// there is none).
    pub async fn closed(&self) {
        self.shared.connection.closed().await;
    }

    /// Sends one soft-reset frame; every listener then hears one disconnect.
    pub async fn soft_reset(&self) -> Result<(), SessionError> {
        self.shared.connection.soft_reset().await
    }

    /// Sends one hard-reset frame.
    pub async fn hard_reset(&self) -> Result<(), SessionError> {
        self.shared.connection.hard_reset().await
    }

    // ── Handles ───────────────────────────────────────────────────────────────

    pub async fn open_digital_input(&self, pin: u8, pull: Pull) -> Result<DigitalInput, SessionError> {
        self.require_connected()?;
        DigitalInput::open(Arc::clone(&self.shared), pin, pull).await
    }

    pub async fn open_digital_output(
        &self,
        pin: u8,
        open_drain: bool,
        initial: bool,
    ) -> Result<DigitalOutput, SessionError> {
        self.require_connected()?;
        DigitalOutput::open(Arc::clone(&self.shared), pin, open_drain, initial).await
    }

    pub async fn open_analog_input(&self, pin: u8) -> Result<AnalogInput, SessionError> {
        self.require_connected()?;
        AnalogInput::open(Arc::clone(&self.shared), pin).await
    }

    pub async fn open_pwm_output(
        &self,
        pin: u8,
        open_drain: bool,
        freq_hz: u32,
    ) -> Result<PwmOutput, SessionError> {
        self.require_connected()?;
        PwmOutput::open(Arc::clone(&self.shared), pin, open_drain, freq_hz).await
    }

    /// Opens the UART.  The board has a single UART module, so a second
    /// concurrent call fails with [`SessionError::OutOfResource`].
    pub async fn open_uart(
        &self,
        rx_pin: u8,
        tx_pin: u8,
        baud: u32,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Uart, SessionError> {
        self.require_connected()?;
        Uart::open(Arc::clone(&self.shared), rx_pin, tx_pin, baud, parity, stop_bits).await
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::ConnectionLost(format!(
                "not connected ({:?})",
                self.state()
            )))
        }
    }

    // ── Pass-throughs ─────────────────────────────────────────────────────────

    /// Marks `pin` as taken without configuring it.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidOperation`] if the pin is in use or does not exist.
    pub fn reserve_pin(&self, pin: u8) -> Result<(), SessionError> {
        self.shared.resources.reserve_pin(pin)
    }

    /// Frees a pin taken by [`Session::reserve_pin`].
    pub fn release_pin(&self, pin: u8) {
        self.shared.resources.release_pin(pin);
    }

    pub fn register_listener(&self, listener: Arc<dyn PacketListener>) -> ListenerId {
        self.shared.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.unregister(id)
    }

    /// Number of pins currently open or reserved.
    pub fn pins_in_use(&self) -> usize {
        self.shared.resources.pins_in_use()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.connection.abort();
    }
}
