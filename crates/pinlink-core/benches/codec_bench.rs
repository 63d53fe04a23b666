//! Criterion benchmarks for the pinlink frame codec and stream decoder.
//!
//! Run with:
//! ```bash
//! cargo bench --package pinlink-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pinlink_core::protocol::{MAX_UART_CHUNK, Parity};
use pinlink_core::{
    decode_packet, encode_packet, Command, Event, HandshakeInfo, Packet, StreamDecoder,
};

// ── Packet fixtures ───────────────────────────────────────────────────────────

fn fixtures() -> Vec<(&'static str, Packet)> {
    vec![
        ("ping", Command::Ping(42).into()),
        (
            "set_pin_digital_out",
            Command::SetPinDigitalOut {
                pin: 5,
                value: true,
                open_drain: false,
            }
            .into(),
        ),
        (
            "uart_config",
            Command::UartConfig {
                module: 0,
                rate: 34,
                speed4x: true,
                two_stop_bits: false,
                parity: Parity::None,
            }
            .into(),
        ),
        (
            "uart_tx_full_chunk",
            Command::UartTx {
                module: 0,
                data: vec![0x55; MAX_UART_CHUNK],
            }
            .into(),
        ),
        (
            "handshake",
            Event::Handshake(HandshakeInfo {
                hardware_id: "PL0003".to_string(),
                bootloader_id: "BOOT0001".to_string(),
                firmware_id: "FW0500".to_string(),
                protocol_version: 1,
            })
            .into(),
        ),
        (
            "analog_in_status",
            Event::AnalogInStatus { pin: 3, value: 512 }.into(),
        ),
    ]
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, packet) in fixtures() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &packet, |b, p| {
            b.iter(|| encode_packet(black_box(p)).unwrap())
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, packet) in fixtures() {
        let bytes = encode_packet(&packet).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &bytes, |b, bytes| {
            b.iter(|| decode_packet(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn bench_stream_decoder(c: &mut Criterion) {
    // 256 status events in one buffer, as a busy input pin would produce.
    let mut stream = Vec::new();
    for i in 0..256u16 {
        let event = Event::DigitalInStatus {
            pin: (i % 48) as u8 + 1,
            level: i % 2 == 0,
        };
        stream.extend(encode_packet(&event.into()).unwrap());
    }

    c.bench_function("stream_decoder_256_events", |b| {
        b.iter(|| {
            let mut decoder = StreamDecoder::with_wire_codec();
            decoder.extend(black_box(&stream));
            decoder.by_ref().count()
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_stream_decoder);
criterion_main!(benches);
