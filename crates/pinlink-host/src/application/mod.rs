//! Application layer for the host.
//!
//! Contains the [`session::Session`] facade and the handles it hands out.
//! The facade composes the connection (from `infrastructure`), the resource
//! allocators and the listener registry (from `pinlink_core`).
//!
//! **Dependency rule**: this layer may depend on `infrastructure` and
//! `pinlink_core`; nothing in `infrastructure` imports it.

pub mod handles;
pub(crate) mod resources;
pub mod session;
