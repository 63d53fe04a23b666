//! Caller-facing handles for opened pins and peripherals.
//!
//! Every handle wraps a [`HandleCore`]: the session internals, the resources
//! it owns and, for inputs, the listener that feeds it.  `close()` returns the
//! pins to floating inputs and frees them; dropping a handle frees the
//! bookkeeping without talking to the board.

pub mod analog;
pub mod digital;
pub mod pwm;
pub mod uart;

use std::sync::Arc;

use pinlink_core::protocol::Pull;
use pinlink_core::{Command, ListenerId};
use tracing::debug;

use crate::application::resources::Claim;
use crate::application::session::SessionShared;
use crate::error::SessionError;

pub use analog::AnalogInput;
pub use digital::{DigitalInput, DigitalOutput};
pub use pwm::PwmOutput;
pub use uart::Uart;

pub(crate) struct HandleCore {
    shared: Arc<SessionShared>,
    claim: Claim,
    listener: Option<ListenerId>,
}

impl HandleCore {
    pub(crate) fn new(shared: Arc<SessionShared>, claim: Claim, listener: Option<ListenerId>) -> Self {
        Self {
            shared,
            claim,
            listener,
        }
    }

    pub(crate) fn shared(&self) -> &SessionShared {
        &self.shared
    }

    pub(crate) fn claim(&self) -> &Claim {
        &self.claim
    }

    /// Sends `command` on behalf of a live handle.
    pub(crate) async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.claim.check()?;
        self.shared.connection.queue_packet(command).await
    }

    /// Best-effort reset of the board side, then release.
    pub(crate) async fn close_with(&self, resets: Vec<Command>) {
        if self.claim.check().is_ok() {
            for command in resets {
                if let Err(e) = self.shared.connection.queue_packet(command).await {
                    debug!(error = %e, "reset during close not delivered");
                    break;
                }
            }
        }
        self.teardown();
    }

    fn teardown(&self) {
        if let Some(id) = self.listener {
            self.shared.listeners.unregister(id);
        }
        self.claim.release();
    }
}

impl Drop for HandleCore {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// The command that parks a pin as a floating input.
pub(crate) fn float_pin(pin: u8) -> Command {
    Command::SetPinDigitalIn {
        pin,
        pull: Pull::Floating,
    }
}
