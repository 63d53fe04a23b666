//! Exclusive ownership over a fixed set of indexed hardware resources.
//!
//! # Why atomics? (for beginners)
//!
//! Two tasks may try to open the same pin at the same moment.  With a plain
//! `bool` per slot, both could read "free" before either writes "taken", and
//! both would believe they own the pin.  `AtomicBool::compare_exchange` reads
//! and writes the flag as one indivisible step: exactly one caller sees the
//! transition from `false` to `true`, every other caller sees `false` returned.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Errors raised by [`ResourceAllocator`].
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum AllocationError {
    /// The index does not name a slot in this allocator.
    #[error("resource index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },
}

/// A fixed-size table of exclusively owned slots.
///
/// Slots are created with the allocator and never added or removed.
pub struct ResourceAllocator {
    slots: Box<[AtomicBool]>,
}

impl ResourceAllocator {
    /// Creates an allocator with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Marks `index` allocated iff it was free.
    ///
    /// Returns `Ok(true)` when the caller obtained ownership and `Ok(false)`
    /// when another owner holds the slot.  Contention is reported immediately,
    /// never waited on.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::IndexOutOfRange`] for an index outside
    /// `0..capacity`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pinlink_core::ResourceAllocator;
    ///
    /// let pins = ResourceAllocator::new(4);
    /// assert_eq!(pins.request_allocate(2), Ok(true));
    /// assert_eq!(pins.request_allocate(2), Ok(false));
    /// pins.release(2);
    /// assert_eq!(pins.request_allocate(2), Ok(true));
    /// ```
    pub fn request_allocate(&self, index: usize) -> Result<bool, AllocationError> {
        let slot = self.slot(index)?;
        Ok(slot
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    /// Allocates the lowest free slot, if any.
    pub fn allocate_any(&self) -> Option<usize> {
        (0..self.slots.len()).find(|&i| {
            self.slots[i]
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Marks `index` free.
    ///
    /// Releasing a free slot, or an index outside the table, is a no-op:
    /// handle teardown paths may race and both call this.
    pub fn release(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            slot.store(false, Ordering::Release);
        }
    }

    /// Frees every slot.
    pub fn release_all(&self) {
        for slot in self.slots.iter() {
            slot.store(false, Ordering::Release);
        }
    }

    /// Whether `index` is currently owned.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::IndexOutOfRange`] for an invalid index.
    pub fn is_allocated(&self, index: usize) -> Result<bool, AllocationError> {
        Ok(self.slot(index)?.load(Ordering::Acquire))
    }

    /// Number of slots currently owned.
    pub fn allocated_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.load(Ordering::Acquire))
            .count()
    }

    fn slot(&self, index: usize) -> Result<&AtomicBool, AllocationError> {
        self.slots.get(index).ok_or(AllocationError::IndexOutOfRange {
            index,
            capacity: self.slots.len(),
        })
    }
}
