//! Incremental decoder that turns an inbound byte stream into packets.
//!
//! # Why a buffer is needed
//!
//! Serial ports and sockets are *streams*: a single read may return half a
//! frame, or the tail of one frame followed by three complete ones.  The
//! decoder accumulates bytes and hands out one [`DecodeOutcome`] at a time.
//!
//! # Resynchronisation
//!
//! A corrupted frame (noise on the line, a dropped byte) must not tear the
//! session down.  When the codec reports a malformed frame the decoder drops
//! the leading byte and skips forward to the next plausible frame start.
//! Only when `max_failures` consecutive frames fail does it give up with
//! [`DecodeOutcome::ResyncExhausted`].
//!
//! A frame header whose length byte points past the bytes that ever arrive
//! (a board reset mid-frame, a corrupted length) looks "incomplete" forever
//! and would swallow every good frame behind it.  The decoder has no clock,
//! so the owner of the stream decides when a partial frame has waited long
//! enough and calls [`StreamDecoder::abandon_partial`].

use std::sync::Arc;

use tracing::trace;

use crate::protocol::codec::{FrameCodec, ProtocolError, WireCodec};
use crate::protocol::packet::Packet;

/// Default bound on consecutive malformed frames before giving up.
pub const DEFAULT_MAX_RESYNC_FAILURES: u32 = 8;

/// One step of decoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete, valid packet.
    Packet(Packet),
    /// A malformed frame was skipped; decoding can continue.
    Malformed(ProtocolError),
    /// Too many consecutive malformed frames; the stream is unusable.
    ResyncExhausted,
}

/// Buffers inbound bytes and yields decoded packets.
pub struct StreamDecoder {
    codec: Arc<dyn FrameCodec>,
    buf: Vec<u8>,
    consecutive_failures: u32,
    max_failures: u32,
}

impl StreamDecoder {
    /// Creates a decoder over `codec` that gives up after `max_failures`
    /// consecutive malformed frames.  A bound of zero is treated as one.
    pub fn new(codec: Arc<dyn FrameCodec>, max_failures: u32) -> Self {
        Self {
            codec,
            buf: Vec::with_capacity(512),
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
        }
    }

    /// Creates a decoder using [`WireCodec`] and the default failure bound.
    pub fn with_wire_codec() -> Self {
        Self::new(Arc::new(WireCodec), DEFAULT_MAX_RESYNC_FAILURES)
    }

    /// Appends freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting to be decoded.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Consecutive malformed frames seen since the last good packet.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns the next outcome, or `None` when more bytes are needed.
    pub fn next_outcome(&mut self) -> Option<DecodeOutcome> {
        if self.buf.is_empty() {
            return None;
        }

        match self.codec.decode(&self.buf) {
            Ok((packet, consumed)) => {
                self.buf.drain(..consumed);
                self.consecutive_failures = 0;
                Some(DecodeOutcome::Packet(packet))
            }
            Err(e) if e.is_incomplete() => None,
            Err(e) => Some(self.skip_malformed(e)),
        }
    }

    /// Treats the buffered partial frame as malformed: drops its sync byte,
    /// rescans for the next frame start and counts one failure.
    ///
    /// Returns `None` when nothing is buffered.  If the buffer actually holds
    /// a decodable (or already malformed) frame, this is the same as
    /// [`StreamDecoder::next_outcome`].
    pub fn abandon_partial(&mut self) -> Option<DecodeOutcome> {
        if self.buf.is_empty() {
            return None;
        }
        match self.codec.decode(&self.buf) {
            Err(e) if e.is_incomplete() => {
                let error = ProtocolError::StalledFrame(self.buf.len());
                Some(self.skip_malformed(error))
            }
            _ => self.next_outcome(),
        }
    }

    fn skip_malformed(&mut self, error: ProtocolError) -> DecodeOutcome {
        let skip = self
            .codec
            .next_frame_start(&self.buf[1..])
            .map_or(self.buf.len(), |offset| offset + 1);
        trace!(skipped = skip, "resynchronising after malformed frame");
        self.buf.drain(..skip);
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.max_failures {
            self.buf.clear();
            DecodeOutcome::ResyncExhausted
        } else {
            DecodeOutcome::Malformed(error)
        }
    }
}

impl Iterator for StreamDecoder {
    type Item = DecodeOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::encode_packet;
    use crate::protocol::packet::{Event, SYNC_BYTE};

    fn frame(event: Event) -> Vec<u8> {
        encode_packet(&Packet::Event(event)).unwrap()
    }

    #[test]
    fn test_partial_frame_yields_nothing_until_completed() {
        // Arrange
        let bytes = frame(Event::Pong(9));
        let mut decoder = StreamDecoder::with_wire_codec();

        // Act
        decoder.extend(&bytes[..2]);
        let first = decoder.next_outcome();
        decoder.extend(&bytes[2..]);
        let second = decoder.next_outcome();

        // Assert
        assert_eq!(first, None);
        assert_eq!(second, Some(DecodeOutcome::Packet(Event::Pong(9).into())));
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_coalesced_frames_are_yielded_in_order() {
        let mut decoder = StreamDecoder::with_wire_codec();
        decoder.extend(&frame(Event::Pong(1)));
        decoder.extend(&frame(Event::Pong(2)));

        let outcomes: Vec<_> = decoder.by_ref().collect();

        assert_eq!(
            outcomes,
            vec![
                DecodeOutcome::Packet(Event::Pong(1).into()),
                DecodeOutcome::Packet(Event::Pong(2).into()),
            ]
        );
    }

    #[test]
    fn test_malformed_frame_then_valid_frame_yields_one_packet() {
        // Arrange – corrupt the checksum of the first frame
        let mut bad = frame(Event::DigitalInStatus { pin: 3, level: true });
        let last = bad.len() - 1;
        bad[last] ^= 0x55;
        let good = frame(Event::DigitalInStatus { pin: 4, level: false });

        let mut decoder = StreamDecoder::with_wire_codec();
        decoder.extend(&bad);
        decoder.extend(&good);

        // Act
        let outcomes: Vec<_> = decoder.by_ref().collect();

        // Assert
        let packets: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, DecodeOutcome::Packet(_)))
            .collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(
            packets[0],
            &DecodeOutcome::Packet(Event::DigitalInStatus { pin: 4, level: false }.into())
        );
        assert!(matches!(
            outcomes[0],
            DecodeOutcome::Malformed(ProtocolError::ChecksumMismatch { .. })
        ));
        assert_eq!(decoder.consecutive_failures(), 0);
    }

    #[test]
    fn test_leading_garbage_is_skipped_as_one_failure() {
        let mut decoder = StreamDecoder::with_wire_codec();
        decoder.extend(&[0x00, 0x13, 0x37]);
        decoder.extend(&frame(Event::Pong(5)));

        let first = decoder.next_outcome();
        assert!(matches!(first, Some(DecodeOutcome::Malformed(ProtocolError::BadSync(0x00)))));
        assert_eq!(decoder.consecutive_failures(), 1);

        let second = decoder.next_outcome();
        assert_eq!(second, Some(DecodeOutcome::Packet(Event::Pong(5).into())));
    }

    #[test]
    fn test_repeated_failures_exhaust_resync() {
        // Arrange – three frames with unknown op codes, bound of three
        let mut decoder = StreamDecoder::new(Arc::new(WireCodec), 3);
        for _ in 0..3 {
            decoder.extend(&[SYNC_BYTE, 0x3F, 0x00, 0x3F]);
        }

        // Act
        let outcomes: Vec<_> = decoder.by_ref().collect();

        // Assert
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2], DecodeOutcome::ResyncExhausted);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_abandoned_partial_frame_releases_frames_behind_it() {
        // Arrange – a header claiming 200 payload bytes, cut off after one
        let good = frame(Event::DigitalInStatus { pin: 4, level: true });
        let mut decoder = StreamDecoder::with_wire_codec();
        decoder.extend(&[SYNC_BYTE, 0x44, 200, 0x00]);
        decoder.extend(&good);
        assert_eq!(decoder.next_outcome(), None, "looks incomplete until abandoned");

        // Act
        let abandoned = decoder.abandon_partial();
        let rest: Vec<_> = decoder.by_ref().collect();

        // Assert
        assert_eq!(
            abandoned,
            Some(DecodeOutcome::Malformed(ProtocolError::StalledFrame(4 + good.len())))
        );
        assert_eq!(
            rest,
            vec![DecodeOutcome::Packet(Event::DigitalInStatus { pin: 4, level: true }.into())]
        );
        assert_eq!(decoder.buffered_len(), 0);
        assert_eq!(decoder.consecutive_failures(), 0);
    }

    #[test]
    fn test_abandon_partial_on_empty_buffer_is_none() {
        let mut decoder = StreamDecoder::with_wire_codec();

        assert_eq!(decoder.abandon_partial(), None);
        assert_eq!(decoder.consecutive_failures(), 0);
    }

    #[test]
    fn test_abandon_partial_counts_towards_exhaustion() {
        let mut decoder = StreamDecoder::new(Arc::new(WireCodec), 1);
        decoder.extend(&[SYNC_BYTE, 0x44, 200]);

        assert_eq!(decoder.abandon_partial(), Some(DecodeOutcome::ResyncExhausted));
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_good_packet_resets_failure_count() {
        let mut decoder = StreamDecoder::new(Arc::new(WireCodec), 2);
        decoder.extend(&[SYNC_BYTE, 0x3F, 0x00, 0x3F]);
        decoder.extend(&frame(Event::Pong(1)));
        decoder.extend(&[SYNC_BYTE, 0x3F, 0x00, 0x3F]);
        decoder.extend(&frame(Event::Pong(2)));

        let outcomes: Vec<_> = decoder.by_ref().collect();

        assert!(!outcomes.contains(&DecodeOutcome::ResyncExhausted));
        assert_eq!(outcomes.len(), 4);
    }
}
