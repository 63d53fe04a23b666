//! Analog input handle.

use std::sync::Arc;

use pinlink_core::domain::pins::sample_to_volts;
use pinlink_core::{Command, Event, PacketListener, PinMode};
use tokio::sync::watch;

use super::{float_pin, HandleCore};
use crate::application::resources::ClaimRequest;
use crate::application::session::SessionShared;
use crate::error::SessionError;

struct SampleListener {
    pin: u8,
    sample: watch::Sender<Option<u16>>,
}

impl PacketListener for SampleListener {
    fn on_event(&self, event: &Event) {
        if let Event::AnalogInStatus { pin, value } = *event {
            if pin == self.pin {
                self.sample.send_replace(Some(value));
            }
        }
    }
}

/// A pin sampled by the board's 10-bit ADC.
pub struct AnalogInput {
    core: HandleCore,
    pin: u8,
    sample: watch::Receiver<Option<u16>>,
}

impl AnalogInput {
    pub(crate) async fn open(shared: Arc<SessionShared>, pin: u8) -> Result<Self, SessionError> {
        let claim = shared.resources.claim(ClaimRequest {
            pins: vec![(pin, PinMode::AnalogInput)],
            ..ClaimRequest::default()
        })?;
        let (tx, sample) = watch::channel(None);
        let listener = shared
            .listeners
            .register(Arc::new(SampleListener { pin, sample: tx }));
        let handle = Self {
            core: HandleCore::new(shared, claim, Some(listener)),
            pin,
            sample,
        };
        handle.core.send(Command::SetPinAnalogIn { pin }).await?;
        Ok(handle)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Latest raw sample (0..=1023), or `None` before the first report.
    pub fn read_raw(&self) -> Result<Option<u16>, SessionError> {
        self.core.claim().check()?;
        Ok(*self.sample.borrow())
    }

    /// Latest sample in volts against the 3.3 V reference.
    pub fn read(&self) -> Result<Option<f32>, SessionError> {
        Ok(self.read_raw()?.map(sample_to_volts))
    }

    /// Returns the pin to a floating digital input and frees it.  Idempotent.
    pub async fn close(&self) {
        self.core.close_with(vec![float_pin(self.pin)]).await;
    }
}
