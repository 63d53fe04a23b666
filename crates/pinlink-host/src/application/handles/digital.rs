//! Digital input and output handles.

use std::sync::Arc;

use pinlink_core::protocol::Pull;
use pinlink_core::{Command, Event, PacketListener, PinMode};
use tokio::sync::watch;

use super::{float_pin, HandleCore};
use crate::application::resources::ClaimRequest;
use crate::application::session::SessionShared;
use crate::error::SessionError;

fn single_pin(pin: u8, mode: PinMode) -> ClaimRequest {
    ClaimRequest {
        pins: vec![(pin, mode)],
        ..ClaimRequest::default()
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

/// A pin driven by the host.
pub struct DigitalOutput {
    core: HandleCore,
    pin: u8,
}

impl DigitalOutput {
    pub(crate) async fn open(
        shared: Arc<SessionShared>,
        pin: u8,
        open_drain: bool,
        initial: bool,
    ) -> Result<Self, SessionError> {
        let claim = shared.resources.claim(single_pin(pin, PinMode::DigitalOutput))?;
        let handle = Self {
            core: HandleCore::new(shared, claim, None),
            pin,
        };
        handle
            .core
            .send(Command::SetPinDigitalOut {
                pin,
                value: initial,
                open_drain,
            })
            .await?;
        Ok(handle)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Drives the pin high (`true`) or low.
    pub async fn write(&self, value: bool) -> Result<(), SessionError> {
        self.core
            .send(Command::SetDigitalOutLevel {
                pin: self.pin,
                value,
            })
            .await
    }

    /// Returns the pin to a floating input and frees it.  Idempotent.
    pub async fn close(&self) {
        self.core.close_with(vec![float_pin(self.pin)]).await;
    }
}

// ── Input ─────────────────────────────────────────────────────────────────────

struct LevelListener {
    pin: u8,
    level: watch::Sender<Option<bool>>,
}

impl PacketListener for LevelListener {
    fn on_event(&self, event: &Event) {
        if let Event::DigitalInStatus { pin, level } = *event {
            if pin == self.pin {
                self.level.send_replace(Some(level));
            }
        }
    }
}

/// A pin sampled by the board, which reports every level change.
pub struct DigitalInput {
    core: HandleCore,
    pin: u8,
    level: watch::Receiver<Option<bool>>,
}

impl DigitalInput {
    pub(crate) async fn open(
        shared: Arc<SessionShared>,
        pin: u8,
        pull: Pull,
    ) -> Result<Self, SessionError> {
        let claim = shared.resources.claim(single_pin(pin, PinMode::DigitalInput))?;
        let (tx, level) = watch::channel(None);
        let listener = shared.listeners.register(Arc::new(LevelListener { pin, level: tx }));
        let handle = Self {
            core: HandleCore::new(shared, claim, Some(listener)),
            pin,
            level,
        };
        handle
            .core
            .send(Command::SetPinDigitalIn { pin, pull })
            .await?;
        Ok(handle)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Last level reported by the board, or `None` before the first report.
    pub fn read(&self) -> Result<Option<bool>, SessionError> {
        self.core.claim().check()?;
        Ok(*self.level.borrow())
    }

    /// Waits until the board reports `level`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionLost`] if the connection ends first.
    pub async fn wait_for(&self, level: bool) -> Result<(), SessionError> {
        self.core.claim().check()?;
        let connection = &self.core.shared().connection;
        if !connection.is_connected() {
            return Err(SessionError::ConnectionLost("not connected".to_string()));
        }
        let mut rx = self.level.clone();
        tokio::select! {
            reached = rx.wait_for(|v| *v == Some(level)) => reached
                .map(|_| ())
                .map_err(|_| SessionError::invalid("handle is closed")),
            _ = connection.closed() => Err(SessionError::ConnectionLost(
                "connection ended while waiting for input".to_string(),
            )),
        }
    }

    /// Returns the pin to a floating input and frees it.  Idempotent.
    pub async fn close(&self) {
        self.core.close_with(vec![float_pin(self.pin)]).await;
    }
}
