//! Pin and module bookkeeping shared by the session and its handles.
//!
//! # Epochs (for beginners)
//!
//! `disconnect` frees every pin at once.  A handle opened before the
//! disconnect must not later "release" a pin that a *new* handle now owns.
//! Each [`Claim`] remembers the epoch it was granted in; invalidation bumps
//! the epoch, and a claim from an older epoch releases nothing.  The epoch
//! and the allocators are updated under one lock so a release can never
//! interleave with an invalidation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pinlink_core::domain::pins::supports;
use pinlink_core::{PinMode, ResourceAllocator, PIN_COUNT, PWM_MODULE_COUNT, UART_MODULE_COUNT};
use tracing::debug;

use crate::error::SessionError;

struct Book {
    epoch: u64,
    reserved: HashSet<u8>,
}

/// The session's three allocators plus the invalidation epoch.
pub(crate) struct Resources {
    pins: ResourceAllocator,
    pwm: ResourceAllocator,
    uart: ResourceAllocator,
    book: Mutex<Book>,
}

/// What an `open_*` call asks for.
#[derive(Debug, Default)]
pub(crate) struct ClaimRequest {
    pub pins: Vec<(u8, PinMode)>,
    pub pwm_module: bool,
    pub uart_module: bool,
}

impl Resources {
    pub(crate) fn new() -> Self {
        Self {
            pins: ResourceAllocator::new(PIN_COUNT),
            pwm: ResourceAllocator::new(PWM_MODULE_COUNT),
            uart: ResourceAllocator::new(UART_MODULE_COUNT),
            book: Mutex::new(Book {
                epoch: 0,
                reserved: HashSet::new(),
            }),
        }
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates and allocates everything in `request`, or nothing.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidOperation`] for an unsupported mode, a pin
    ///   listed twice, or a pin that is already open.
    /// - [`SessionError::OutOfResource`] when no module of the requested kind
    ///   is free.
    pub(crate) fn claim(self: &Arc<Self>, request: ClaimRequest) -> Result<Claim, SessionError> {
        let mut seen = HashSet::new();
        for &(pin, mode) in &request.pins {
            if !supports(pin, mode) {
                return Err(SessionError::invalid(format!(
                    "pin {pin} does not support {mode:?}"
                )));
            }
            if !seen.insert(pin) {
                return Err(SessionError::invalid(format!("pin {pin} requested twice")));
            }
        }

        let book = self.book();
        let mut claim = Claim {
            resources: Arc::clone(self),
            epoch: book.epoch,
            pins: Vec::with_capacity(request.pins.len()),
            pwm_module: None,
            uart_module: None,
            closed: AtomicBool::new(false),
        };

        for &(pin, _) in &request.pins {
            match self.pins.request_allocate(pin as usize) {
                Ok(true) => claim.pins.push(pin),
                Ok(false) => {
                    self.rollback(&mut claim);
                    return Err(SessionError::invalid(format!("pin {pin} already open")));
                }
                Err(e) => {
                    self.rollback(&mut claim);
                    return Err(SessionError::invalid(e.to_string()));
                }
            }
        }

        if request.pwm_module {
            match self.pwm.allocate_any() {
                Some(module) => claim.pwm_module = Some(module as u8),
                None => {
                    self.rollback(&mut claim);
                    return Err(SessionError::OutOfResource("no free PWM module".to_string()));
                }
            }
        }

        if request.uart_module {
            match self.uart.allocate_any() {
                Some(module) => claim.uart_module = Some(module as u8),
                None => {
                    self.rollback(&mut claim);
                    return Err(SessionError::OutOfResource("no free UART module".to_string()));
                }
            }
        }

        drop(book);
        debug!(pins = ?claim.pins, pwm = ?claim.pwm_module, uart = ?claim.uart_module, "resources claimed");
        Ok(claim)
    }

    // Caller holds the book lock.
    fn rollback(&self, claim: &mut Claim) {
        self.free(claim);
        claim.closed.store(true, Ordering::Release);
    }

    fn free(&self, claim: &Claim) {
        for &pin in &claim.pins {
            self.pins.release(pin as usize);
        }
        if let Some(module) = claim.pwm_module {
            self.pwm.release(module as usize);
        }
        if let Some(module) = claim.uart_module {
            self.uart.release(module as usize);
        }
    }

    /// Reserves a pin without opening it.
    pub(crate) fn reserve_pin(&self, pin: u8) -> Result<(), SessionError> {
        let mut book = self.book();
        match self.pins.request_allocate(pin as usize) {
            Ok(true) => {
                book.reserved.insert(pin);
                Ok(())
            }
            Ok(false) => Err(SessionError::invalid(format!("pin {pin} already in use"))),
            Err(e) => Err(SessionError::invalid(e.to_string())),
        }
    }

    /// Frees a pin taken by [`Resources::reserve_pin`].  Pins owned by
    /// handles are left alone.
    pub(crate) fn release_pin(&self, pin: u8) {
        let mut book = self.book();
        if book.reserved.remove(&pin) {
            self.pins.release(pin as usize);
        }
    }

    /// Frees everything and invalidates every outstanding claim.
    pub(crate) fn invalidate(&self) {
        let mut book = self.book();
        book.epoch += 1;
        book.reserved.clear();
        self.pins.release_all();
        self.pwm.release_all();
        self.uart.release_all();
        debug!(epoch = book.epoch, "all resources released");
    }

    pub(crate) fn pins_in_use(&self) -> usize {
        self.pins.allocated_count()
    }
}

/// Ownership of the pins and modules behind one handle.
///
/// Dropping a claim releases it.
pub(crate) struct Claim {
    resources: Arc<Resources>,
    epoch: u64,
    pins: Vec<u8>,
    pwm_module: Option<u8>,
    uart_module: Option<u8>,
    closed: AtomicBool,
}

impl Claim {
    pub(crate) fn pwm_module(&self) -> Option<u8> {
        self.pwm_module
    }

    pub(crate) fn uart_module(&self) -> Option<u8> {
        self.uart_module
    }

    /// Fails once the claim has been released or invalidated.
    pub(crate) fn check(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::invalid("handle is closed"));
        }
        if self.resources.book().epoch != self.epoch {
            return Err(SessionError::invalid("handle invalidated by disconnect"));
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Releases the claimed resources.  Idempotent; a no-op for claims from
    /// an earlier epoch.
    pub(crate) fn release(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let book = self.resources.book();
        if book.epoch == self.epoch {
            self.resources.free(self);
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digital_out(pin: u8) -> ClaimRequest {
        ClaimRequest {
            pins: vec![(pin, PinMode::DigitalOutput)],
            ..ClaimRequest::default()
        }
    }

    #[test]
    fn test_second_claim_on_same_pin_is_invalid_operation() {
        // Arrange
        let resources = Arc::new(Resources::new());
        let _first = resources.claim(digital_out(5)).unwrap();

        // Act
        let second = resources.claim(ClaimRequest {
            pins: vec![(5, PinMode::AnalogInput)],
            ..ClaimRequest::default()
        });

        // Assert
        assert!(matches!(second, Err(SessionError::InvalidOperation(_))));
    }

    #[test]
    fn test_release_frees_pin_for_next_claim() {
        let resources = Arc::new(Resources::new());
        let first = resources.claim(digital_out(5)).unwrap();

        first.release();
        first.release();

        assert!(resources.claim(digital_out(5)).is_ok());
        assert!(matches!(first.check(), Err(SessionError::InvalidOperation(_))));
    }

    #[test]
    fn test_unsupported_mode_allocates_nothing() {
        let resources = Arc::new(Resources::new());

        let result = resources.claim(ClaimRequest {
            pins: vec![(40, PinMode::AnalogInput)],
            ..ClaimRequest::default()
        });

        assert!(matches!(result, Err(SessionError::InvalidOperation(_))));
        assert_eq!(resources.pins_in_use(), 0);
    }

    #[test]
    fn test_failed_module_allocation_rolls_back_pins() {
        // Arrange – take the only UART module
        let resources = Arc::new(Resources::new());
        let uart = |rx: u8, tx: u8| ClaimRequest {
            pins: vec![(rx, PinMode::Peripheral), (tx, PinMode::Peripheral)],
            uart_module: true,
            ..ClaimRequest::default()
        };
        let _first = resources.claim(uart(3, 4)).unwrap();

        // Act
        let second = resources.claim(uart(5, 6));

        // Assert
        assert!(matches!(second, Err(SessionError::OutOfResource(_))));
        assert_eq!(resources.pins_in_use(), 2);
    }

    #[test]
    fn test_invalidate_makes_old_claims_inert() {
        // Arrange
        let resources = Arc::new(Resources::new());
        let stale = resources.claim(digital_out(7)).unwrap();

        // Act
        resources.invalidate();
        let fresh = resources.claim(digital_out(7)).unwrap();
        drop(stale);

        // Assert – the stale drop must not free the fresh owner's pin
        assert!(fresh.check().is_ok());
        assert_eq!(resources.pins_in_use(), 1);
    }

    #[test]
    fn test_reserve_and_release_pin() {
        let resources = Arc::new(Resources::new());

        resources.reserve_pin(9).unwrap();
        assert!(matches!(
            resources.reserve_pin(9),
            Err(SessionError::InvalidOperation(_))
        ));
        assert!(matches!(
            resources.reserve_pin(PIN_COUNT as u8),
            Err(SessionError::InvalidOperation(_))
        ));
        resources.release_pin(9);

        assert!(resources.reserve_pin(9).is_ok());
    }

    #[test]
    fn test_release_pin_ignores_pins_owned_by_handles() {
        let resources = Arc::new(Resources::new());
        let claim = resources.claim(digital_out(12)).unwrap();

        resources.release_pin(12);

        assert!(claim.check().is_ok());
        assert!(resources.reserve_pin(12).is_err());
    }
}
