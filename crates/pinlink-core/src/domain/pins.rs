//! Pin capability table and peripheral clock arithmetic for the board.
//!
//! ```text
//! pin 0          onboard LED (digital output only)
//! pins 1..=48    header pins (digital in/out)
//! pins 1..=16    also analog-capable
//! peripheral     3..=7, 10..=14, 27..=32, 34..=40, 45..=48 (PWM and UART routing)
//! ```

use serde::{Deserialize, Serialize};

use crate::protocol::packet::PwmScale;

/// Pin slots: the onboard LED plus 48 header pins.
pub const PIN_COUNT: usize = 49;

/// Index of the onboard LED.
pub const ONBOARD_LED_PIN: u8 = 0;

/// Number of PWM output modules.
pub const PWM_MODULE_COUNT: usize = 9;

/// Number of UART modules.
pub const UART_MODULE_COUNT: usize = 1;

/// PWM and UART base clock in hertz.
pub const BASE_CLOCK_HZ: u32 = 16_000_000;

/// Analog reference voltage.
pub const ANALOG_REFERENCE_VOLTS: f32 = 3.3;

/// Largest 10-bit analog sample.
pub const ANALOG_FULL_SCALE: u16 = 1023;

const PERIPHERAL_RANGES: [(u8, u8); 4] = [(3, 7), (10, 14), (27, 32), (34, 40)];
const PERIPHERAL_TAIL: (u8, u8) = (45, 48);

/// The ways a pin can be configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    DigitalInput,
    DigitalOutput,
    AnalogInput,
    /// Routed to a PWM or UART module.
    Peripheral,
}

/// Whether `pin` can operate in `mode`.
pub fn supports(pin: u8, mode: PinMode) -> bool {
    let header = (1..=48).contains(&pin);
    match mode {
        PinMode::DigitalOutput => pin == ONBOARD_LED_PIN || header,
        PinMode::DigitalInput => header,
        PinMode::AnalogInput => (1..=16).contains(&pin),
        PinMode::Peripheral => {
            PERIPHERAL_RANGES
                .iter()
                .chain(std::iter::once(&PERIPHERAL_TAIL))
                .any(|&(lo, hi)| (lo..=hi).contains(&pin))
        }
    }
}

/// Converts a 10-bit analog sample to volts.
pub fn sample_to_volts(sample: u16) -> f32 {
    f32::from(sample.min(ANALOG_FULL_SCALE)) * ANALOG_REFERENCE_VOLTS / f32::from(ANALOG_FULL_SCALE)
}

// ── PWM ───────────────────────────────────────────────────────────────────────

/// Prescaler and period register value for a PWM frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmTiming {
    pub scale: PwmScale,
    /// Period register value; the period is `period + 1` scaled clocks.
    pub period: u16,
}

impl PwmTiming {
    /// Picks the smallest prescaler whose period fits 16 bits.
    ///
    /// Returns `None` for zero or unreachable frequencies.
    pub fn for_frequency(freq_hz: u32) -> Option<Self> {
        if freq_hz == 0 {
            return None;
        }
        PwmScale::ALL.iter().find_map(|&scale| {
            let clocks = BASE_CLOCK_HZ / scale.divider() / freq_hz;
            if (2..=u32::from(u16::MAX) + 1).contains(&clocks) {
                Some(Self {
                    scale,
                    period: (clocks - 1) as u16,
                })
            } else {
                None
            }
        })
    }

    /// Duty register value and two-bit sub-clock fraction for `duty_cycle` in `[0, 1]`.
    pub fn duty_for_cycle(&self, duty_cycle: f32) -> (u16, u8) {
        let clocks = (f32::from(self.period) + 1.0) * duty_cycle.clamp(0.0, 1.0);
        split_clocks(clocks)
    }

    /// Duty register value and fraction for a pulse of `micros` microseconds.
    ///
    /// Pulses longer than the period saturate at a 100% duty cycle.
    pub fn duty_for_pulse_us(&self, micros: f32) -> (u16, u8) {
        let clocks_per_us = BASE_CLOCK_HZ as f32 / 1_000_000.0 / self.scale.divider() as f32;
        let clocks = (micros.max(0.0) * clocks_per_us).min(f32::from(self.period) + 1.0);
        split_clocks(clocks)
    }
}

fn split_clocks(clocks: f32) -> (u16, u8) {
    let whole = clocks.floor();
    let fraction = ((clocks - whole) * 4.0).floor() as u8;
    (whole.min(f32::from(u16::MAX)) as u16, fraction.min(3))
}

// ── UART ──────────────────────────────────────────────────────────────────────

/// Baud rate generator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartTiming {
    pub rate: u16,
    pub speed4x: bool,
}

impl UartTiming {
    /// Computes the generator value for `baud`, preferring the 4x clock.
    ///
    /// Returns `None` for baud rates the generator cannot produce.
    pub fn for_baud(baud: u32) -> Option<Self> {
        if baud == 0 {
            return None;
        }
        let fast = BASE_CLOCK_HZ / 4;
        let slow = BASE_CLOCK_HZ / 16;
        [(fast, true), (slow, false)]
            .into_iter()
            .find_map(|(clock, speed4x)| {
                let divisor = (clock + baud / 2) / baud;
                if (1..=u32::from(u16::MAX) + 1).contains(&divisor) {
                    Some(Self {
                        rate: (divisor - 1) as u16,
                        speed4x,
                    })
                } else {
                    None
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onboard_led_is_output_only() {
        assert!(supports(ONBOARD_LED_PIN, PinMode::DigitalOutput));
        assert!(!supports(ONBOARD_LED_PIN, PinMode::DigitalInput));
        assert!(!supports(ONBOARD_LED_PIN, PinMode::AnalogInput));
        assert!(!supports(ONBOARD_LED_PIN, PinMode::Peripheral));
    }

    #[test]
    fn test_header_pins_are_digital_capable() {
        for pin in 1..=48 {
            assert!(supports(pin, PinMode::DigitalInput), "pin {pin}");
            assert!(supports(pin, PinMode::DigitalOutput), "pin {pin}");
        }
        assert!(!supports(49, PinMode::DigitalOutput));
    }

    #[test]
    fn test_analog_capability_limited_to_first_sixteen_pins() {
        assert!(supports(5, PinMode::AnalogInput));
        assert!(supports(16, PinMode::AnalogInput));
        assert!(!supports(17, PinMode::AnalogInput));
    }

    #[test]
    fn test_peripheral_capability_follows_table() {
        assert!(supports(3, PinMode::Peripheral));
        assert!(supports(48, PinMode::Peripheral));
        assert!(!supports(8, PinMode::Peripheral));
        assert!(!supports(33, PinMode::Peripheral));
        assert!(!supports(44, PinMode::Peripheral));
    }

    #[test]
    fn test_sample_to_volts_spans_reference() {
        assert_eq!(sample_to_volts(0), 0.0);
        assert!((sample_to_volts(ANALOG_FULL_SCALE) - ANALOG_REFERENCE_VOLTS).abs() < 1e-6);
    }

    #[test]
    fn test_pwm_timing_uses_smallest_fitting_prescaler() {
        // 1 kHz: 16_000 clocks fits without prescaling
        assert_eq!(
            PwmTiming::for_frequency(1_000),
            Some(PwmTiming {
                scale: PwmScale::X1,
                period: 15_999
            })
        );
        // 50 Hz: 320_000 clocks needs the x8 prescaler (40_000)
        assert_eq!(
            PwmTiming::for_frequency(50),
            Some(PwmTiming {
                scale: PwmScale::X8,
                period: 39_999
            })
        );
    }

    #[test]
    fn test_pwm_timing_rejects_unreachable_frequencies() {
        assert_eq!(PwmTiming::for_frequency(0), None);
        assert_eq!(PwmTiming::for_frequency(16_000_000), None);
    }

    #[test]
    fn test_pwm_timing_reaches_one_hertz_with_largest_prescaler() {
        assert_eq!(
            PwmTiming::for_frequency(1),
            Some(PwmTiming {
                scale: PwmScale::X256,
                period: 62_499
            })
        );
    }

    #[test]
    fn test_duty_for_cycle_splits_whole_and_fraction() {
        let timing = PwmTiming {
            scale: PwmScale::X1,
            period: 9,
        };

        assert_eq!(timing.duty_for_cycle(0.5), (5, 0));
        assert_eq!(timing.duty_for_cycle(0.5625), (5, 2));
        assert_eq!(timing.duty_for_cycle(2.0), (10, 0));
    }

    #[test]
    fn test_duty_for_pulse_saturates_at_period() {
        let timing = PwmTiming::for_frequency(50).unwrap();

        // x8 prescaler: 2 clocks per microsecond
        assert_eq!(timing.duty_for_pulse_us(1_500.0), (3_000, 0));
        assert_eq!(timing.duty_for_pulse_us(1_000_000.0), (40_000, 0));
    }

    #[test]
    fn test_uart_timing_prefers_fast_clock() {
        // 4 MHz / 115200 ≈ 34.7 → 35 → rate 34
        assert_eq!(
            UartTiming::for_baud(115_200),
            Some(UartTiming {
                rate: 34,
                speed4x: true
            })
        );
    }

    #[test]
    fn test_uart_timing_falls_back_to_slow_clock_for_low_baud() {
        // 4 MHz / 50 = 80_000 does not fit; 1 MHz / 50 = 20_000 does
        assert_eq!(
            UartTiming::for_baud(50),
            Some(UartTiming {
                rate: 19_999,
                speed4x: false
            })
        );
        assert_eq!(UartTiming::for_baud(0), None);
    }
}
