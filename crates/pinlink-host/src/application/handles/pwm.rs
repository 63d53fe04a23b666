//! PWM output handle.
//!
//! The board clocks its PWM modules from 16 MHz through a prescaler of 1, 8,
//! 64 or 256.  The smallest prescaler whose period fits the 16-bit register
//! gives the finest duty-cycle resolution; the duty register additionally
//! carries two sub-clock fraction bits.

use std::sync::Arc;

use pinlink_core::domain::pins::PwmTiming;
use pinlink_core::protocol::PwmScale;
use pinlink_core::{Command, PinMode};

use super::{float_pin, HandleCore};
use crate::application::resources::ClaimRequest;
use crate::application::session::SessionShared;
use crate::error::SessionError;

/// A pin driven by one of the PWM modules.
pub struct PwmOutput {
    core: HandleCore,
    pin: u8,
    module: u8,
    timing: PwmTiming,
}

impl PwmOutput {
    pub(crate) async fn open(
        shared: Arc<SessionShared>,
        pin: u8,
        open_drain: bool,
        freq_hz: u32,
    ) -> Result<Self, SessionError> {
        let timing = PwmTiming::for_frequency(freq_hz)
            .ok_or_else(|| SessionError::invalid(format!("PWM frequency {freq_hz} Hz out of range")))?;
        let claim = shared.resources.claim(ClaimRequest {
            pins: vec![(pin, PinMode::Peripheral)],
            pwm_module: true,
            ..ClaimRequest::default()
        })?;
        let module = claim
            .pwm_module()
            .ok_or_else(|| SessionError::OutOfResource("no free PWM module".to_string()))?;

        let handle = Self {
            core: HandleCore::new(shared, claim, None),
            pin,
            module,
            timing,
        };
        for command in [
            Command::SetPinDigitalOut {
                pin,
                value: false,
                open_drain,
            },
            Command::SetPinPwm {
                pin,
                module,
                enable: true,
            },
            Command::SetPwmPeriod {
                module,
                scale: timing.scale,
                period: timing.period,
            },
        ] {
            handle.core.send(command).await?;
        }
        Ok(handle)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn module(&self) -> u8 {
        self.module
    }

    /// Prescaler and period chosen for the requested frequency.
    pub fn timing(&self) -> PwmTiming {
        self.timing
    }

    /// Sets the duty cycle as a fraction of the period.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidOperation`] unless `duty_cycle` is in `[0, 1]`.
    pub async fn set_duty_cycle(&self, duty_cycle: f32) -> Result<(), SessionError> {
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(SessionError::invalid(format!(
                "duty cycle {duty_cycle} outside [0, 1]"
            )));
        }
        let (duty, fraction) = self.timing.duty_for_cycle(duty_cycle);
        self.set_duty(duty, fraction).await
    }

    /// Sets the high time of each period in microseconds.  Pulses longer than
    /// the period saturate at 100%.
    pub async fn set_pulse_width_us(&self, micros: u32) -> Result<(), SessionError> {
        let (duty, fraction) = self.timing.duty_for_pulse_us(micros as f32);
        self.set_duty(duty, fraction).await
    }

    async fn set_duty(&self, duty: u16, fraction: u8) -> Result<(), SessionError> {
        self.core
            .send(Command::SetPwmDutyCycle {
                module: self.module,
                duty,
                fraction,
            })
            .await
    }

    /// Stops the module, floats the pin and frees both.  Idempotent.
    pub async fn close(&self) {
        self.core
            .close_with(vec![
                Command::SetPinPwm {
                    pin: self.pin,
                    module: self.module,
                    enable: false,
                },
                Command::SetPwmPeriod {
                    module: self.module,
                    scale: PwmScale::X1,
                    period: 0,
                },
                float_pin(self.pin),
            ])
            .await;
    }
}
