//! Frame codec for encoding and decoding pinlink packets.
//!
//! Wire format:
//! ```text
//! [sync:0xA5][op:1][len:1][payload:len][checksum:1]
//! ```
//! `checksum` is the wrapping byte sum of `op`, `len` and the payload.
//! All multi-byte payload integers are big-endian.

use thiserror::Error;

use crate::protocol::packet::{
    Command, Event, HandshakeInfo, OpCode, Packet, Parity, Pull, PwmScale, FRAME_OVERHEAD,
    HANDSHAKE_ID_LEN, MAX_PAYLOAD, SYNC_BYTE,
};

/// Errors that can occur during packet encoding or decoding.
///
/// [`ProtocolError::InsufficientData`] is the only "wait for more bytes"
/// outcome; every other variant means the bytes at the cursor are not a
/// valid frame.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame it starts.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The frame does not start with the sync byte.
    #[error("bad sync byte: 0x{0:02X}")]
    BadSync(u8),

    /// The op code byte is not a recognized value.
    #[error("unknown op code: 0x{0:02X}")]
    UnknownOpCode(u8),

    /// The trailing checksum does not match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The payload could not be parsed (wrong length, field out of range, ...).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload does not fit the one-byte length field.
    #[error("payload too large: {0} bytes (max {MAX_PAYLOAD})")]
    PayloadTooLarge(usize),

    /// A partial frame of this many buffered bytes was given up on because
    /// its remaining bytes never arrived.
    #[error("partial frame of {0} bytes never completed")]
    StalledFrame(usize),
}

impl ProtocolError {
    /// Whether the error only means the frame is not complete yet.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::InsufficientData { .. })
    }
}

/// Pluggable framing strategy.
///
/// The connection drives whichever codec it is given; [`WireCodec`] is the
/// framing the stock firmware speaks.
pub trait FrameCodec: Send + Sync {
    /// Encodes one packet into a complete frame.
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError>;

    /// Decodes one packet from the start of `bytes`, returning it together
    /// with the number of bytes consumed.
    fn decode(&self, bytes: &[u8]) -> Result<(Packet, usize), ProtocolError>;

    /// Offset of the first plausible frame start in `bytes`, if any.
    fn next_frame_start(&self, bytes: &[u8]) -> Option<usize>;
}

/// The default sync/length/checksum framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct WireCodec;

impl FrameCodec for WireCodec {
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
        encode_packet(packet)
    }

    fn decode(&self, bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
        decode_packet(bytes)
    }

    fn next_frame_start(&self, bytes: &[u8]) -> Option<usize> {
        bytes.iter().position(|&b| b == SYNC_BYTE)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into a complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] when the payload exceeds
/// [`MAX_PAYLOAD`] and [`ProtocolError::MalformedPayload`] when a field is out
/// of its wire range.
///
/// # Examples
///
/// ```rust
/// use pinlink_core::protocol::{decode_packet, encode_packet, Command, Packet};
///
/// let packet = Packet::Command(Command::Ping(7));
/// let bytes = encode_packet(&packet).unwrap();
/// let (decoded, consumed) = decode_packet(&bytes).unwrap();
/// assert_eq!(decoded, packet);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(packet)?;
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let op = packet.op_code() as u8;
    let len = payload.len() as u8;

    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.push(SYNC_BYTE);
    buf.push(op);
    buf.push(len);
    buf.extend_from_slice(&payload);
    buf.push(checksum(op, len, &payload));
    Ok(buf)
}

/// Decodes one [`Packet`] from the beginning of `bytes`.
///
/// Returns the decoded packet and the total number of bytes consumed, so the
/// caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if the frame is not complete
/// yet, or another [`ProtocolError`] variant if the frame is malformed.
pub fn decode_packet(bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    const HEADER_LEN: usize = 3;

    let Some(&first) = bytes.first() else {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_LEN,
            available: 0,
        });
    };
    if first != SYNC_BYTE {
        return Err(ProtocolError::BadSync(first));
    }
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }

    let op_byte = bytes[1];
    let op = OpCode::try_from(op_byte).map_err(|_| ProtocolError::UnknownOpCode(op_byte))?;
    let len = bytes[2];

    let total = FRAME_OVERHEAD + len as usize;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + len as usize];
    let expected = checksum(op_byte, len, payload);
    let actual = bytes[total - 1];
    if expected != actual {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }

    let packet = decode_payload(op, payload)?;
    Ok((packet, total))
}

fn checksum(op: u8, len: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(op.wrapping_add(len), |acc, &b| acc.wrapping_add(b))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match packet {
        Packet::Command(c) => encode_command(&mut buf, c)?,
        Packet::Event(e) => encode_event(&mut buf, e)?,
    }
    Ok(buf)
}

fn encode_command(buf: &mut Vec<u8>, command: &Command) -> Result<(), ProtocolError> {
    match command {
        Command::SoftReset | Command::HardReset => {}
        Command::Ping(token) => buf.extend_from_slice(&token.to_be_bytes()),
        Command::SetPinDigitalOut {
            pin,
            value,
            open_drain,
        } => {
            buf.push(*pin);
            buf.push(u8::from(*value) | (u8::from(*open_drain) << 1));
        }
        Command::SetDigitalOutLevel { pin, value } => {
            buf.push(*pin);
            buf.push(u8::from(*value));
        }
        Command::SetPinDigitalIn { pin, pull } => {
            buf.push(*pin);
            buf.push(*pull as u8);
        }
        Command::SetPinAnalogIn { pin } => buf.push(*pin),
        Command::SetPinPwm {
            pin,
            module,
            enable,
        } => {
            buf.push(*pin);
            buf.push(*module);
            buf.push(u8::from(*enable));
        }
        Command::SetPwmPeriod {
            module,
            scale,
            period,
        } => {
            buf.push(*module);
            buf.push(*scale as u8);
            buf.extend_from_slice(&period.to_be_bytes());
        }
        Command::SetPwmDutyCycle {
            module,
            duty,
            fraction,
        } => {
            if *fraction > 3 {
                return Err(ProtocolError::MalformedPayload(format!(
                    "duty fraction {fraction} out of range 0..=3"
                )));
            }
            buf.push(*module);
            buf.push(*fraction);
            buf.extend_from_slice(&duty.to_be_bytes());
        }
        Command::UartConfig {
            module,
            rate,
            speed4x,
            two_stop_bits,
            parity,
        } => {
            buf.push(*module);
            buf.push(
                (*parity as u8) | (u8::from(*two_stop_bits) << 2) | (u8::from(*speed4x) << 3),
            );
            buf.extend_from_slice(&rate.to_be_bytes());
        }
        Command::SetPinUart {
            pin,
            module,
            tx,
            enable,
        } => {
            buf.push(*pin);
            buf.push(*module);
            buf.push(u8::from(*tx) | (u8::from(*enable) << 1));
        }
        Command::UartTx { module, data } => {
            buf.push(*module);
            buf.extend_from_slice(data);
        }
        Command::UartClose { module } => buf.push(*module),
    }
    Ok(())
}

fn encode_event(buf: &mut Vec<u8>, event: &Event) -> Result<(), ProtocolError> {
    match event {
        Event::Handshake(info) => {
            write_fixed_id(buf, &info.hardware_id, "hardware_id")?;
            write_fixed_id(buf, &info.bootloader_id, "bootloader_id")?;
            write_fixed_id(buf, &info.firmware_id, "firmware_id")?;
            buf.push(info.protocol_version);
        }
        Event::Pong(token) => buf.extend_from_slice(&token.to_be_bytes()),
        Event::DigitalInStatus { pin, level } => {
            buf.push(*pin);
            buf.push(u8::from(*level));
        }
        Event::AnalogInStatus { pin, value } => {
            buf.push(*pin);
            buf.extend_from_slice(&value.to_be_bytes());
        }
        Event::UartRx { module, data } => {
            buf.push(*module);
            buf.extend_from_slice(data);
        }
    }
    Ok(())
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(op: OpCode, p: &[u8]) -> Result<Packet, ProtocolError> {
    let packet = match op {
        OpCode::SoftReset => {
            require_len(p, 0, "SoftReset")?;
            Command::SoftReset.into()
        }
        OpCode::HardReset => {
            require_len(p, 0, "HardReset")?;
            Command::HardReset.into()
        }
        OpCode::Ping => {
            require_len(p, 2, "Ping")?;
            Command::Ping(read_u16(p, 0)).into()
        }
        OpCode::SetPinDigitalOut => {
            require_len(p, 2, "SetPinDigitalOut")?;
            Command::SetPinDigitalOut {
                pin: p[0],
                value: p[1] & 0x01 != 0,
                open_drain: p[1] & 0x02 != 0,
            }
            .into()
        }
        OpCode::SetDigitalOutLevel => {
            require_len(p, 2, "SetDigitalOutLevel")?;
            Command::SetDigitalOutLevel {
                pin: p[0],
                value: p[1] != 0,
            }
            .into()
        }
        OpCode::SetPinDigitalIn => {
            require_len(p, 2, "SetPinDigitalIn")?;
            let pull = Pull::try_from(p[1])
                .map_err(|_| ProtocolError::MalformedPayload(format!("unknown pull mode: {}", p[1])))?;
            Command::SetPinDigitalIn { pin: p[0], pull }.into()
        }
        OpCode::SetPinAnalogIn => {
            require_len(p, 1, "SetPinAnalogIn")?;
            Command::SetPinAnalogIn { pin: p[0] }.into()
        }
        OpCode::SetPinPwm => {
            require_len(p, 3, "SetPinPwm")?;
            Command::SetPinPwm {
                pin: p[0],
                module: p[1],
                enable: p[2] != 0,
            }
            .into()
        }
        OpCode::SetPwmPeriod => {
            require_len(p, 4, "SetPwmPeriod")?;
            let scale = PwmScale::try_from(p[1])
                .map_err(|_| ProtocolError::MalformedPayload(format!("unknown pwm scale: {}", p[1])))?;
            Command::SetPwmPeriod {
                module: p[0],
                scale,
                period: read_u16(p, 2),
            }
            .into()
        }
        OpCode::SetPwmDutyCycle => {
            require_len(p, 4, "SetPwmDutyCycle")?;
            if p[1] > 3 {
                return Err(ProtocolError::MalformedPayload(format!(
                    "duty fraction {} out of range 0..=3",
                    p[1]
                )));
            }
            Command::SetPwmDutyCycle {
                module: p[0],
                fraction: p[1],
                duty: read_u16(p, 2),
            }
            .into()
        }
        OpCode::UartConfig => {
            require_len(p, 4, "UartConfig")?;
            let flags = p[1];
            let parity = Parity::try_from(flags & 0x03)
                .map_err(|_| ProtocolError::MalformedPayload(format!("unknown parity: {}", flags & 0x03)))?;
            Command::UartConfig {
                module: p[0],
                parity,
                two_stop_bits: flags & 0x04 != 0,
                speed4x: flags & 0x08 != 0,
                rate: read_u16(p, 2),
            }
            .into()
        }
        OpCode::SetPinUart => {
            require_len(p, 3, "SetPinUart")?;
            Command::SetPinUart {
                pin: p[0],
                module: p[1],
                tx: p[2] & 0x01 != 0,
                enable: p[2] & 0x02 != 0,
            }
            .into()
        }
        OpCode::UartTx => {
            require_min_len(p, 1, "UartTx")?;
            Command::UartTx {
                module: p[0],
                data: p[1..].to_vec(),
            }
            .into()
        }
        OpCode::UartClose => {
            require_len(p, 1, "UartClose")?;
            Command::UartClose { module: p[0] }.into()
        }
        OpCode::Handshake => {
            require_len(p, 3 * HANDSHAKE_ID_LEN + 1, "Handshake")?;
            Event::Handshake(HandshakeInfo {
                hardware_id: read_fixed_id(p, 0)?,
                bootloader_id: read_fixed_id(p, HANDSHAKE_ID_LEN)?,
                firmware_id: read_fixed_id(p, 2 * HANDSHAKE_ID_LEN)?,
                protocol_version: p[3 * HANDSHAKE_ID_LEN],
            })
            .into()
        }
        OpCode::Pong => {
            require_len(p, 2, "Pong")?;
            Event::Pong(read_u16(p, 0)).into()
        }
        OpCode::DigitalInStatus => {
            require_len(p, 2, "DigitalInStatus")?;
            Event::DigitalInStatus {
                pin: p[0],
                level: p[1] != 0,
            }
            .into()
        }
        OpCode::AnalogInStatus => {
            require_len(p, 3, "AnalogInStatus")?;
            let value = read_u16(p, 1);
            if value > 1023 {
                return Err(ProtocolError::MalformedPayload(format!(
                    "analog sample {value} exceeds 10 bits"
                )));
            }
            Event::AnalogInStatus { pin: p[0], value }.into()
        }
        OpCode::UartRx => {
            require_min_len(p, 1, "UartRx")?;
            Event::UartRx {
                module: p[0],
                data: p[1..].to_vec(),
            }
            .into()
        }
    };
    Ok(packet)
}

// ── Primitive helpers ─────────────────────────────────────────────────────────

fn require_len(p: &[u8], len: usize, context: &str) -> Result<(), ProtocolError> {
    if p.len() != len {
        return Err(ProtocolError::MalformedPayload(format!(
            "{context}: expected {len} payload bytes, got {}",
            p.len()
        )));
    }
    Ok(())
}

fn require_min_len(p: &[u8], len: usize, context: &str) -> Result<(), ProtocolError> {
    if p.len() < len {
        return Err(ProtocolError::MalformedPayload(format!(
            "{context}: expected at least {len} payload bytes, got {}",
            p.len()
        )));
    }
    Ok(())
}

fn read_u16(p: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([p[offset], p[offset + 1]])
}

fn write_fixed_id(buf: &mut Vec<u8>, id: &str, field: &str) -> Result<(), ProtocolError> {
    if !id.is_ascii() || id.len() > HANDSHAKE_ID_LEN {
        return Err(ProtocolError::MalformedPayload(format!(
            "{field} must be at most {HANDSHAKE_ID_LEN} ASCII bytes"
        )));
    }
    buf.extend_from_slice(id.as_bytes());
    buf.resize(buf.len() + HANDSHAKE_ID_LEN - id.len(), 0);
    Ok(())
}

fn read_fixed_id(p: &[u8], offset: usize) -> Result<String, ProtocolError> {
    let raw = &p[offset..offset + HANDSHAKE_ID_LEN];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(HANDSHAKE_ID_LEN);
    let id = &raw[..end];
    if !id.is_ascii() {
        return Err(ProtocolError::MalformedPayload(
            "handshake identifier is not ASCII".to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(id).into_owned())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::PROTOCOL_VERSION;

    fn handshake() -> HandshakeInfo {
        HandshakeInfo {
            hardware_id: "PLNK0001".to_string(),
            bootloader_id: "BOOT01".to_string(),
            firmware_id: "FW0300".to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    #[test]
    fn test_encode_soft_reset_is_a_bare_frame() {
        // Arrange / Act
        let bytes = encode_packet(&Command::SoftReset.into()).unwrap();

        // Assert – sync, op, len 0, checksum = op + len
        assert_eq!(bytes, vec![SYNC_BYTE, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_hard_reset_is_a_bare_frame() {
        let bytes = encode_packet(&Command::HardReset.into()).unwrap();
        assert_eq!(bytes, vec![SYNC_BYTE, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn test_checksum_covers_op_len_and_payload() {
        // Arrange
        let bytes = encode_packet(&Command::SetDigitalOutLevel { pin: 5, value: true }.into())
            .unwrap();

        // Assert – op 0x04 + len 2 + pin 5 + value 1 = 12
        assert_eq!(bytes, vec![SYNC_BYTE, 0x04, 0x02, 0x05, 0x01, 0x0C]);
    }

    #[test]
    fn test_handshake_ids_are_padded_and_trimmed() {
        // Arrange
        let original = Packet::Event(Event::Handshake(handshake()));

        // Act
        let bytes = encode_packet(&original).unwrap();
        let (decoded, consumed) = decode_packet(&bytes).unwrap();

        // Assert
        assert_eq!(bytes.len(), FRAME_OVERHEAD + 25);
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_handshake_id_longer_than_field_is_rejected() {
        let mut info = handshake();
        info.firmware_id = "FIRMWARE-TOO-LONG".to_string();

        let result = encode_packet(&Event::Handshake(info).into());

        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_uart_config_flags_survive_decode() {
        let original = Packet::Command(Command::UartConfig {
            module: 0,
            rate: 34,
            speed4x: true,
            two_stop_bits: true,
            parity: Parity::Odd,
        });

        let bytes = encode_packet(&original).unwrap();
        let (decoded, _) = decode_packet(&bytes).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_uart_tx_over_max_payload_is_rejected() {
        let packet = Packet::Command(Command::UartTx {
            module: 0,
            data: vec![0u8; MAX_PAYLOAD],
        });

        assert_eq!(
            encode_packet(&packet),
            Err(ProtocolError::PayloadTooLarge(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn test_duty_fraction_out_of_range_is_rejected_on_encode() {
        let packet = Packet::Command(Command::SetPwmDutyCycle {
            module: 0,
            duty: 10,
            fraction: 4,
        });

        assert!(matches!(
            encode_packet(&packet),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_decode_empty_slice_needs_more_data() {
        let err = decode_packet(&[]).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn test_decode_partial_frame_needs_more_data() {
        // Arrange
        let bytes = encode_packet(&Command::Ping(0xBEEF).into()).unwrap();

        // Act
        let err = decode_packet(&bytes[..bytes.len() - 1]).unwrap_err();

        // Assert
        assert_eq!(
            err,
            ProtocolError::InsufficientData {
                needed: bytes.len(),
                available: bytes.len() - 1
            }
        );
    }

    #[test]
    fn test_decode_rejects_missing_sync_byte() {
        assert_eq!(decode_packet(&[0x00, 0x00]), Err(ProtocolError::BadSync(0x00)));
    }

    #[test]
    fn test_decode_rejects_unknown_op_code() {
        assert_eq!(
            decode_packet(&[SYNC_BYTE, 0x3F, 0x00, 0x3F]),
            Err(ProtocolError::UnknownOpCode(0x3F))
        );
    }

    #[test]
    fn test_decode_rejects_corrupted_checksum() {
        // Arrange
        let mut bytes = encode_packet(&Event::Pong(3).into()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        // Act
        let err = decode_packet(&bytes).unwrap_err();

        // Assert
        assert!(matches!(err, ProtocolError::ChecksumMismatch { .. }));
        assert!(!err.is_incomplete());
    }

    #[test]
    fn test_decode_rejects_wrong_payload_length() {
        // Ping with a 1-byte payload: op 0x02 + len 1 + 0x07 = 0x0A
        let bytes = [SYNC_BYTE, 0x02, 0x01, 0x07, 0x0A];
        assert!(matches!(
            decode_packet(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_decode_rejects_analog_sample_wider_than_ten_bits() {
        // op 0x43 + len 3 + pin 1 + 0x04 + 0x00 = 0x4B
        let bytes = [SYNC_BYTE, 0x43, 0x03, 0x01, 0x04, 0x00, 0x4B];
        assert!(matches!(
            decode_packet(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_decode_consumes_only_first_frame() {
        // Arrange
        let mut bytes = encode_packet(&Event::Pong(1).into()).unwrap();
        let first_len = bytes.len();
        bytes.extend(encode_packet(&Event::Pong(2).into()).unwrap());

        // Act
        let (decoded, consumed) = decode_packet(&bytes).unwrap();

        // Assert
        assert_eq!(decoded, Packet::Event(Event::Pong(1)));
        assert_eq!(consumed, first_len);
    }

    #[test]
    fn test_wire_codec_finds_next_sync_byte() {
        let codec = WireCodec;
        assert_eq!(codec.next_frame_start(&[0x01, 0x02, SYNC_BYTE, 0x00]), Some(2));
        assert_eq!(codec.next_frame_start(&[0x01, 0x02]), None);
    }
}
