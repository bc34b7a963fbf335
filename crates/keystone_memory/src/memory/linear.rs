//! # Linear Allocator
//!
//! A bump allocator for transient allocations that are released all at once.
//!
//! ```text
//!   ┌─────┬──┬────────┬─┬──────┬──────────────────────────────┐
//!   │ A1  │▒▒│   A2   │▒│  A3  │          free                │
//!   └─────┴──┴────────┴─┴──────┴──────────────────────────────┘
//!                                ▲
//!                              cursor          ▒ = alignment padding
//! ```

use std::ptr::NonNull;

use crate::error::{MemoryError, MemoryResult};
use crate::memory::align::align_adjustment;
use crate::memory::allocator::{
    Allocator, AllocatorCore, AllocatorKind, Backing, SharedAllocator, Strategy,
};
use crate::memory::region::Region;

/// Default host alignment for standalone allocators.
pub(crate) const DEFAULT_HOST_ALIGNMENT: usize = 16;

/// Monotonic allocator. Supports [`LinearAllocator::clear`], not
/// individual deallocation.
///
/// # Thread Safety
///
/// Not thread-safe. Share through [`SharedAllocator`].
///
/// # Example
///
/// ```rust
/// use keystone_memory::{Allocator, LinearAllocator};
///
/// let mut frame = LinearAllocator::with_capacity(1024).unwrap();
/// let a = frame.allocate(100, 8).unwrap();
/// let b = frame.allocate(100, 8).unwrap();
/// assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 100);
///
/// frame.clear();
/// assert_eq!(frame.memory_used(), 0);
/// ```
#[derive(Debug)]
pub struct LinearAllocator {
    core: AllocatorCore,
    /// Offset of the next free byte.
    cursor: usize,
}

impl LinearAllocator {
    /// Creates a linear allocator over a fresh host region.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero size or if the host is out of memory.
    pub fn with_capacity(size: usize) -> MemoryResult<Self> {
        Self::validate(size, &())?;
        let (backing, region) = Backing::host(size, DEFAULT_HOST_ALIGNMENT)?;
        Ok(Self::assemble(backing, region, ()))
    }

    /// Creates a linear allocator over `size` bytes carved from `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero size or if the parent has no room.
    pub fn from_parent(
        parent: &SharedAllocator<dyn Allocator>,
        size: usize,
        alignment: u8,
    ) -> MemoryResult<Self> {
        Self::validate(size, &())?;
        let (backing, region) = Backing::carve(parent, size, alignment)?;
        Ok(Self::assemble(backing, region, ()))
    }

    /// Bytes left between the cursor and the end of the region.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.core.region().len() - self.cursor
    }

    /// Resets the cursor to the start of the region.
    ///
    /// Every pointer issued before the call becomes invalid.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.core.reset();
    }
}

impl Strategy for LinearAllocator {
    type Args = ();

    fn validate(size: usize, _args: &()) -> MemoryResult<()> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        Ok(())
    }

    fn assemble(backing: Backing, region: Region, _args: ()) -> Self {
        Self {
            core: AllocatorCore::new(AllocatorKind::Linear, backing, region),
            cursor: 0,
        }
    }
}

impl Allocator for LinearAllocator {
    fn allocate(&mut self, size: usize, alignment: u8) -> Option<NonNull<u8>> {
        assert!(size > 0, "cannot allocate zero bytes");
        assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");

        let region = self.core.region();
        let adjustment = align_adjustment(region.address() + self.cursor, usize::from(alignment));
        let end = self
            .cursor
            .checked_add(adjustment)
            .and_then(|aligned| aligned.checked_add(size))
            .filter(|end| *end <= region.len());

        let Some(end) = end else {
            tracing::trace!(
                "linear allocator exhausted: {} bytes requested, {} remaining",
                size,
                self.remaining()
            );
            return None;
        };

        let aligned = self.cursor + adjustment;
        self.cursor = end;
        self.core.record_allocation(size + adjustment);

        Some(region.pointer_at(aligned))
    }

    fn deallocate(&mut self, _ptr: NonNull<u8>) {
        panic!("linear allocator does not support individual deallocation; use clear()");
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Linear
    }

    fn region(&self) -> Region {
        self.core.region()
    }

    fn memory_used(&self) -> usize {
        self.core.memory_used()
    }

    fn allocation_count(&self) -> usize {
        self.core.allocation_count()
    }

    fn has_parent(&self) -> bool {
        self.core.has_parent()
    }
}
