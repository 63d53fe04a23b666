//! # pinlink-host
//!
//! Host-side session layer for pinlink boards.
//!
//! # Architecture overview (for beginners)
//!
//! ```text
//! Session ──► Connection ──► TransportBootstrap ──► byte stream ──► board
//!    │            │
//!    │            └── receive task: StreamDecoder ──► ListenerRegistry
//!    │
//!    └── Resources (pin / PWM / UART allocators) ──► handles
//! ```
//!
//! - **`infrastructure`** – Talks to the outside world: transports (TCP,
//!   serial), the [`infrastructure::connection::Connection`] state machine,
//!   and the TOML configuration.
//! - **`application`** – The [`Session`] facade and the pin handles it opens.
//!
//! The protocol itself, the allocator and the listener registry live in
//! `pinlink-core`.

pub mod application;
pub mod error;
pub mod infrastructure;

pub use application::handles::{AnalogInput, DigitalInput, DigitalOutput, PwmOutput, Uart};
pub use application::session::Session;
pub use error::SessionError;
pub use infrastructure::connection::ConnectionState;
pub use infrastructure::storage::config::{ConnectionConfig, HostConfig, TransportConfig, TransportKind};
pub use infrastructure::transport::{
    BoxedTransport, TcpDialBootstrap, TcpListenBootstrap, Transport, TransportBootstrap,
};

#[cfg(feature = "serial")]
pub use infrastructure::transport::SerialBootstrap;
