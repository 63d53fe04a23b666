//! Pure bookkeeping with no I/O dependencies.
//!
//! # What lives here?
//!
//! - **`allocator`** – [`allocator::ResourceAllocator`], the exclusive-owner
//!   table for pins and peripheral modules.  Allocation is a single atomic
//!   test-and-set, so two tasks racing to open the same pin can never both win.
//!
//! - **`pins`** – The board's pin capability table (which pins can be analog
//!   inputs, which can be routed to PWM or UART) plus the PWM and UART clock
//!   arithmetic.
//!
//! - **`listeners`** – [`listeners::ListenerRegistry`], the fan-out point for
//!   decoded device events and disconnect notifications.

pub mod allocator;
pub mod listeners;
pub mod pins;
