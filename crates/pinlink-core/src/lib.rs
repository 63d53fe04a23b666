//! # pinlink-core
//!
//! Shared library for pinlink containing the device wire protocol, the
//! exclusive resource allocator and the listener registry.
//!
//! It has zero dependencies on OS APIs, async runtimes, or I/O handles; the
//! `pinlink-host` crate drives it over a real byte stream.
//!
//! # Architecture overview (for beginners)
//!
//! pinlink talks to a small microcontroller board that exposes general
//! purpose pins, analog inputs, PWM outputs and a UART.  The host sends
//! *commands* ("make pin 5 an output and drive it high") and the board sends
//! back *events* ("pin 12 is now low", "here are some UART bytes").
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the wire.  Every packet is a small
//!   self-delimited frame (sync byte, op code, length, payload, checksum).
//!   [`StreamDecoder`] turns an arbitrary byte stream back into packets and
//!   resynchronises after corrupted frames.
//!
//! - **`domain`** – Pure bookkeeping with no I/O.  The [`ResourceAllocator`]
//!   guarantees that each pin or peripheral module has at most one owner, the
//!   pin capability table says which pins can do what, and the
//!   [`ListenerRegistry`] fans decoded events out to observers.

pub mod domain;
pub mod protocol;

pub use domain::allocator::{AllocationError, ResourceAllocator};
pub use domain::listeners::{ListenerId, ListenerRegistry, PacketListener};
pub use domain::pins::{PinMode, PIN_COUNT, PWM_MODULE_COUNT, UART_MODULE_COUNT};
pub use protocol::codec::{decode_packet, encode_packet, FrameCodec, ProtocolError, WireCodec};
pub use protocol::packet::{Command, Event, HandshakeInfo, Packet};
pub use protocol::stream::{DecodeOutcome, StreamDecoder};
