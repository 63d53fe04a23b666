//! Protocol module containing packet types, the frame codec and the stream decoder.

pub mod codec;
pub mod packet;
pub mod stream;

pub use codec::{decode_packet, encode_packet, FrameCodec, ProtocolError, WireCodec};
pub use packet::*;
pub use stream::{DecodeOutcome, StreamDecoder};
