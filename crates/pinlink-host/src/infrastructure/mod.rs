//! Infrastructure layer for the host.
//!
//! Contains the OS-facing adapters: the transports that open a byte stream
//! to the board, the connection state machine that drives it, and the
//! configuration file.

pub mod connection;
pub mod storage;
pub mod transport;
