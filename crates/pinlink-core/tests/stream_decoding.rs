//! Integration tests for the pinlink-core stream decoder.
//!
//! These tests feed byte streams shaped like what a serial line or socket
//! actually delivers (split reads, coalesced frames, line noise) through the
//! public API and check what comes out the other end.

use pinlink_core::{
    encode_packet,
    protocol::{packet::SYNC_BYTE, Pull},
    Command, DecodeOutcome, Event, HandshakeInfo, Packet, ProtocolError, StreamDecoder,
};

fn handshake() -> Event {
    Event::Handshake(HandshakeInfo {
        hardware_id: "PL0003".to_string(),
        bootloader_id: "BOOT0001".to_string(),
        firmware_id: "FW0500".to_string(),
        protocol_version: 1,
    })
}

fn bytes_of(event: Event) -> Vec<u8> {
    encode_packet(&Packet::Event(event)).expect("encode must succeed")
}

fn packets(outcomes: &[DecodeOutcome]) -> Vec<Packet> {
    outcomes
        .iter()
        .filter_map(|o| match o {
            DecodeOutcome::Packet(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_byte_at_a_time_delivery_yields_every_event() {
    // Arrange
    let mut stream = bytes_of(handshake());
    stream.extend(bytes_of(Event::DigitalInStatus { pin: 12, level: true }));
    stream.extend(bytes_of(Event::AnalogInStatus { pin: 3, value: 1023 }));
    let mut decoder = StreamDecoder::with_wire_codec();
    let mut outcomes = Vec::new();

    // Act
    for byte in stream {
        decoder.extend(&[byte]);
        outcomes.extend(decoder.by_ref());
    }

    // Assert
    assert_eq!(
        packets(&outcomes),
        vec![
            Packet::Event(handshake()),
            Packet::Event(Event::DigitalInStatus { pin: 12, level: true }),
            Packet::Event(Event::AnalogInStatus { pin: 3, value: 1023 }),
        ]
    );
    assert_eq!(outcomes.len(), 3, "no malformed frames expected");
}

#[test]
fn test_noise_between_frames_is_skipped() {
    let mut stream = bytes_of(Event::Pong(1));
    stream.extend([0xFF, 0x00, 0x7E]);
    stream.extend(bytes_of(Event::Pong(2)));
    let mut decoder = StreamDecoder::with_wire_codec();

    decoder.extend(&stream);
    let outcomes: Vec<_> = decoder.by_ref().collect();

    assert_eq!(
        packets(&outcomes),
        vec![Packet::Event(Event::Pong(1)), Packet::Event(Event::Pong(2))]
    );
    assert!(matches!(
        outcomes[1],
        DecodeOutcome::Malformed(ProtocolError::BadSync(0xFF))
    ));
}

#[test]
fn test_uart_payload_containing_sync_bytes_is_decoded_intact() {
    // The sync byte may appear inside a payload; framing relies on the length.
    let data = vec![SYNC_BYTE, 0x01, SYNC_BYTE, SYNC_BYTE];
    let mut decoder = StreamDecoder::with_wire_codec();

    decoder.extend(&bytes_of(Event::UartRx {
        module: 0,
        data: data.clone(),
    }));

    assert_eq!(
        decoder.next_outcome(),
        Some(DecodeOutcome::Packet(Packet::Event(Event::UartRx {
            module: 0,
            data
        })))
    );
}

#[test]
fn test_truncated_frame_followed_by_valid_frame_recovers() {
    // Arrange – a header that claims a longer payload than the checksum lands on
    let mut stream = vec![SYNC_BYTE, 0x41, 0x02, 0x00];
    let good = encode_packet(&Packet::Command(Command::SetPinDigitalIn {
        pin: 7,
        pull: Pull::Up,
    }))
    .unwrap();
    stream.extend(&good);
    let mut decoder = StreamDecoder::with_wire_codec();

    // Act
    decoder.extend(&stream);
    let outcomes: Vec<_> = decoder.by_ref().collect();

    // Assert
    assert_eq!(
        packets(&outcomes),
        vec![Packet::Command(Command::SetPinDigitalIn {
            pin: 7,
            pull: Pull::Up
        })]
    );
    assert_eq!(decoder.buffered_len(), 0);
}
