//! All pinlink packet types.
//!
//! A [`Packet`] is either a [`Command`] travelling host → device or an
//! [`Event`] travelling device → host.  Commands use op codes 0x00–0x3F and
//! events use 0x40–0x7F so a single op code byte identifies both the direction
//! and the payload layout.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version the host speaks; carried in the device handshake.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// First byte of every frame on the wire.
pub const SYNC_BYTE: u8 = 0xA5;

/// Bytes in a frame that are not payload: sync, op code, length, checksum.
pub const FRAME_OVERHEAD: usize = 4;

/// Largest payload a single frame can carry (the length field is one byte).
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Largest UART chunk that fits in one frame next to the module byte.
pub const MAX_UART_CHUNK: usize = MAX_PAYLOAD - 1;

/// Width of each identifier string in the handshake payload.
pub const HANDSHAKE_ID_LEN: usize = 8;

// ── Op codes ──────────────────────────────────────────────────────────────────

/// All op codes defined by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    // Commands (0x00–0x3F)
    SoftReset = 0x00,
    HardReset = 0x01,
    Ping = 0x02,
    SetPinDigitalOut = 0x03,
    SetDigitalOutLevel = 0x04,
    SetPinDigitalIn = 0x05,
    SetPinAnalogIn = 0x06,
    SetPinPwm = 0x07,
    SetPwmPeriod = 0x08,
    SetPwmDutyCycle = 0x09,
    UartConfig = 0x0A,
    SetPinUart = 0x0B,
    UartTx = 0x0C,
    UartClose = 0x0D,
    // Events (0x40–0x7F)
    Handshake = 0x40,
    Pong = 0x41,
    DigitalInStatus = 0x42,
    AnalogInStatus = 0x43,
    UartRx = 0x44,
}

impl TryFrom<u8> for OpCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(OpCode::SoftReset),
            0x01 => Ok(OpCode::HardReset),
            0x02 => Ok(OpCode::Ping),
            0x03 => Ok(OpCode::SetPinDigitalOut),
            0x04 => Ok(OpCode::SetDigitalOutLevel),
            0x05 => Ok(OpCode::SetPinDigitalIn),
            0x06 => Ok(OpCode::SetPinAnalogIn),
            0x07 => Ok(OpCode::SetPinPwm),
            0x08 => Ok(OpCode::SetPwmPeriod),
            0x09 => Ok(OpCode::SetPwmDutyCycle),
            0x0A => Ok(OpCode::UartConfig),
            0x0B => Ok(OpCode::SetPinUart),
            0x0C => Ok(OpCode::UartTx),
            0x0D => Ok(OpCode::UartClose),
            0x40 => Ok(OpCode::Handshake),
            0x41 => Ok(OpCode::Pong),
            0x42 => Ok(OpCode::DigitalInStatus),
            0x43 => Ok(OpCode::AnalogInStatus),
            0x44 => Ok(OpCode::UartRx),
            _ => Err(()),
        }
    }
}

// ── Field enums ───────────────────────────────────────────────────────────────

/// Input pull configuration for a digital input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pull {
    #[default]
    Floating = 0x00,
    Up = 0x01,
    Down = 0x02,
}

impl TryFrom<u8> for Pull {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(Pull::Floating),
            0x01 => Ok(Pull::Up),
            0x02 => Ok(Pull::Down),
            _ => Err(()),
        }
    }
}

/// UART parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Parity {
    #[default]
    None = 0x00,
    Even = 0x01,
    Odd = 0x02,
}

impl TryFrom<u8> for Parity {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(Parity::None),
            0x01 => Ok(Parity::Even),
            0x02 => Ok(Parity::Odd),
            _ => Err(()),
        }
    }
}

/// UART stop bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Prescaler applied to the PWM base clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PwmScale {
    X1 = 0x00,
    X8 = 0x01,
    X64 = 0x02,
    X256 = 0x03,
}

impl PwmScale {
    /// All prescalers, smallest first.
    pub const ALL: [PwmScale; 4] = [PwmScale::X1, PwmScale::X8, PwmScale::X64, PwmScale::X256];

    /// The clock divider this prescaler applies.
    pub fn divider(self) -> u32 {
        match self {
            PwmScale::X1 => 1,
            PwmScale::X8 => 8,
            PwmScale::X64 => 64,
            PwmScale::X256 => 256,
        }
    }
}

impl TryFrom<u8> for PwmScale {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(PwmScale::X1),
            0x01 => Ok(PwmScale::X8),
            0x02 => Ok(PwmScale::X64),
            0x03 => Ok(PwmScale::X256),
            _ => Err(()),
        }
    }
}

// ── Packets ───────────────────────────────────────────────────────────────────

/// Identification the device sends once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInfo {
    /// Board hardware revision, at most [`HANDSHAKE_ID_LEN`] ASCII bytes.
    pub hardware_id: String,
    /// Bootloader revision.
    pub bootloader_id: String,
    /// Firmware (application) revision.
    pub firmware_id: String,
    /// Wire protocol version implemented by the firmware.
    pub protocol_version: u8,
}

impl HandshakeInfo {
    /// Whether the firmware speaks the same protocol version as this host.
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// Host → device commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Return every pin and module to its power-on state; the device drops the session.
    SoftReset,
    /// Reboot the device.
    HardReset,
    /// Keepalive probe; the device answers with [`Event::Pong`] carrying the same token.
    Ping(u16),
    SetPinDigitalOut { pin: u8, value: bool, open_drain: bool },
    SetDigitalOutLevel { pin: u8, value: bool },
    SetPinDigitalIn { pin: u8, pull: Pull },
    SetPinAnalogIn { pin: u8 },
    SetPinPwm { pin: u8, module: u8, enable: bool },
    SetPwmPeriod { module: u8, scale: PwmScale, period: u16 },
    /// `fraction` holds the two sub-clock bits of the duty cycle (0..=3).
    SetPwmDutyCycle { module: u8, duty: u16, fraction: u8 },
    UartConfig {
        module: u8,
        rate: u16,
        speed4x: bool,
        two_stop_bits: bool,
        parity: Parity,
    },
    SetPinUart { pin: u8, module: u8, tx: bool, enable: bool },
    UartTx { module: u8, data: Vec<u8> },
    UartClose { module: u8 },
}

impl Command {
    /// Returns the op code for this command.
    pub fn op_code(&self) -> OpCode {
        match self {
            Command::SoftReset => OpCode::SoftReset,
            Command::HardReset => OpCode::HardReset,
            Command::Ping(_) => OpCode::Ping,
            Command::SetPinDigitalOut { .. } => OpCode::SetPinDigitalOut,
            Command::SetDigitalOutLevel { .. } => OpCode::SetDigitalOutLevel,
            Command::SetPinDigitalIn { .. } => OpCode::SetPinDigitalIn,
            Command::SetPinAnalogIn { .. } => OpCode::SetPinAnalogIn,
            Command::SetPinPwm { .. } => OpCode::SetPinPwm,
            Command::SetPwmPeriod { .. } => OpCode::SetPwmPeriod,
            Command::SetPwmDutyCycle { .. } => OpCode::SetPwmDutyCycle,
            Command::UartConfig { .. } => OpCode::UartConfig,
            Command::SetPinUart { .. } => OpCode::SetPinUart,
            Command::UartTx { .. } => OpCode::UartTx,
            Command::UartClose { .. } => OpCode::UartClose,
        }
    }
}

/// Device → host events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Handshake(HandshakeInfo),
    Pong(u16),
    DigitalInStatus { pin: u8, level: bool },
    /// `value` is a 10-bit sample (0..=1023).
    AnalogInStatus { pin: u8, value: u16 },
    UartRx { module: u8, data: Vec<u8> },
}

impl Event {
    /// Returns the op code for this event.
    pub fn op_code(&self) -> OpCode {
        match self {
            Event::Handshake(_) => OpCode::Handshake,
            Event::Pong(_) => OpCode::Pong,
            Event::DigitalInStatus { .. } => OpCode::DigitalInStatus,
            Event::AnalogInStatus { .. } => OpCode::AnalogInStatus,
            Event::UartRx { .. } => OpCode::UartRx,
        }
    }
}

/// A single unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Command(Command),
    Event(Event),
}

impl Packet {
    /// Returns the op code for this packet.
    pub fn op_code(&self) -> OpCode {
        match self {
            Packet::Command(c) => c.op_code(),
            Packet::Event(e) => e.op_code(),
        }
    }
}

impl From<Command> for Packet {
    fn from(command: Command) -> Self {
        Packet::Command(command)
    }
}

impl From<Event> for Packet {
    fn from(event: Event) -> Self {
        Packet::Event(event)
    }
}
