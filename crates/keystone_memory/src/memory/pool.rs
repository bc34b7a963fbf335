//! # Pool Allocator
//!
//! Fixed-size slot allocator for objects that are frequently allocated and
//! freed, such as per-object transform records.
//!
//! Free slots form an intrusive chain: the first word of every free slot
//! holds the offset of the next free slot.
//!
//! ```text
//!   head ──► [slot 2] ──► [slot 0] ──► [slot 3] ──► NIL
//! ```

use std::mem::size_of;
use std::ptr::NonNull;

use crate::error::{MemoryError, MemoryResult};
use crate::memory::align::align_adjustment;
use crate::memory::allocator::{
    Allocator, AllocatorCore, AllocatorKind, Backing, SharedAllocator, Strategy,
};
use crate::memory::region::Region;

/// End-of-chain marker.
const NIL: usize = usize::MAX;

/// Size of the link stored in every free slot.
pub const SLOT_LINK_SIZE: usize = size_of::<usize>();

/// Construction arguments for a [`PoolAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolArgs {
    /// Size of every instance in bytes.
    pub instance_size: usize,
    /// Alignment of every instance.
    pub alignment: u8,
}

impl PoolArgs {
    /// Creates pool arguments.
    #[inline]
    #[must_use]
    pub const fn new(instance_size: usize, alignment: u8) -> Self {
        Self { instance_size, alignment }
    }

    /// Arguments for instances of `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is aligned to more than 128 bytes.
    #[must_use]
    pub fn of<T>() -> Self {
        let alignment = u8::try_from(std::mem::align_of::<T>())
            .unwrap_or_else(|_| panic!("alignment of {} exceeds 128", std::any::type_name::<T>()));
        Self::new(size_of::<T>(), alignment)
    }
}

/// O(1) allocator for instances of one size and alignment.
///
/// # Thread Safety
///
/// Not thread-safe. Share through [`SharedAllocator`].
///
/// # Example
///
/// ```rust
/// use keystone_memory::{Allocator, PoolAllocator};
///
/// let mut pool = PoolAllocator::with_capacity(32, 16, 3).unwrap();
/// let slots: Vec<_> = (0..3).map(|_| pool.allocate(32, 16).unwrap()).collect();
/// assert!(pool.allocate(32, 16).is_none());
///
/// pool.deallocate(slots[1]);
/// assert_eq!(pool.allocate(32, 16), Some(slots[1]));
/// # for slot in slots { pool.deallocate(slot); }
/// ```
#[derive(Debug)]
pub struct PoolAllocator {
    core: AllocatorCore,
    instance_size: usize,
    alignment: u8,
    /// Offset of slot 0.
    first_slot: usize,
    /// Number of slots the region holds.
    capacity: usize,
    /// Offset of the first free slot, or `NIL`.
    head: usize,
    /// Per-slot occupancy, indexed by slot.
    occupied: Vec<bool>,
}

impl PoolAllocator {
    /// Creates a pool with room for `instance_count` instances over a fresh
    /// host region.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid instance parameters or if the host is
    /// out of memory.
    pub fn with_capacity(
        instance_size: usize,
        alignment: u8,
        instance_count: usize,
    ) -> MemoryResult<Self> {
        let args = PoolArgs::new(instance_size, alignment);
        if instance_count == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let size = instance_size
            .checked_mul(instance_count)
            .ok_or(MemoryError::OutOfMemory {
                requested: usize::MAX,
                alignment: usize::from(alignment),
            })?;
        Self::validate(size, &args)?;
        let (backing, region) = Backing::host(size, usize::from(alignment))?;
        Ok(Self::assemble(backing, region, args))
    }

    /// Creates a pool over `size` bytes carved from `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid instance parameters or if the parent has
    /// no room.
    pub fn from_parent(
        parent: &SharedAllocator<dyn Allocator>,
        size: usize,
        args: PoolArgs,
    ) -> MemoryResult<Self> {
        Self::validate(size, &args)?;
        let (backing, region) = Backing::carve(parent, size, args.alignment)?;
        Ok(Self::assemble(backing, region, args))
    }

    /// Size of every instance.
    #[inline]
    #[must_use]
    pub const fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Alignment of every instance.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> u8 {
        self.alignment
    }

    /// Total number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots.
    #[inline]
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.capacity - self.core.allocation_count()
    }

    fn slot_index(&self, offset: usize) -> Option<usize> {
        let relative = offset.checked_sub(self.first_slot)?;
        (relative % self.instance_size == 0)
            .then_some(relative / self.instance_size)
            .filter(|index| *index < self.capacity)
    }
}

impl Strategy for PoolAllocator {
    type Args = PoolArgs;

    fn validate(size: usize, args: &PoolArgs) -> MemoryResult<()> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        if !args.alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment { alignment: usize::from(args.alignment) });
        }
        if args.instance_size < SLOT_LINK_SIZE {
            return Err(MemoryError::InvalidInstanceSize {
                instance_size: args.instance_size,
                minimum: SLOT_LINK_SIZE,
            });
        }
        if args.instance_size % usize::from(args.alignment) != 0 {
            return Err(MemoryError::InstanceNotAligned {
                instance_size: args.instance_size,
                alignment: usize::from(args.alignment),
            });
        }
        if size < args.instance_size {
            return Err(MemoryError::RegionTooSmall { size, minimum: args.instance_size });
        }
        Ok(())
    }

    fn assemble(backing: Backing, region: Region, args: PoolArgs) -> Self {
        let first_slot = align_adjustment(region.address(), usize::from(args.alignment));
        let capacity = region.len().saturating_sub(first_slot) / args.instance_size;

        // Chain every slot to its successor; the last one terminates.
        for index in 0..capacity {
            let offset = first_slot + index * args.instance_size;
            let next = if index + 1 < capacity { offset + args.instance_size } else { NIL };
            region.write(offset, next);
        }

        tracing::trace!(
            "pool of {} slots x {} bytes over {} bytes",
            capacity,
            args.instance_size,
            region.len()
        );

        Self {
            core: AllocatorCore::new(AllocatorKind::Pool, backing, region),
            instance_size: args.instance_size,
            alignment: args.alignment,
            first_slot,
            capacity,
            head: if capacity == 0 { NIL } else { first_slot },
            occupied: vec![false; capacity],
        }
    }
}

impl Allocator for PoolAllocator {
    fn allocate(&mut self, size: usize, alignment: u8) -> Option<NonNull<u8>> {
        assert!(
            size == self.instance_size && alignment == self.alignment,
            "pool serves {}-byte instances aligned to {}, got {size} bytes aligned to {alignment}",
            self.instance_size,
            self.alignment
        );

        if self.head == NIL {
            tracing::trace!("pool exhausted: all {} slots in use", self.capacity);
            return None;
        }

        let region = self.core.region();
        let slot = self.head;
        self.head = region.read(slot);
        self.occupied[(slot - self.first_slot) / self.instance_size] = true;
        self.core.record_allocation(self.instance_size);

        Some(region.pointer_at(slot))
    }

    fn deallocate(&mut self, ptr: NonNull<u8>) {
        let region = self.core.region();
        let (slot, index) = region
            .offset_of(ptr)
            .and_then(|offset| self.slot_index(offset).map(|index| (offset, index)))
            .unwrap_or_else(|| panic!("pointer {ptr:p} is not a slot of this pool"));
        assert!(self.occupied[index], "double free of pool slot {ptr:p}");
        self.occupied[index] = false;

        region.write(slot, self.head);
        self.head = slot;
        self.core.record_release(self.instance_size);
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Pool
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_three_slots_lifo() {
        let mut pool = PoolAllocator::with_capacity(32, 8, 3).unwrap();
        assert_eq!(pool.capacity(), 3);

        let a = pool.allocate(32, 8).unwrap();
        let b = pool.allocate(32, 8).unwrap();
        let c = pool.allocate(32, 8).unwrap();
        assert!(pool.allocate(32, 8).is_none());

        pool.deallocate(b);
        assert_eq!(pool.allocate(32, 8), Some(b));

        for ptr in [a, b, c] {
            pool.deallocate(ptr);
        }
        assert_eq!(pool.memory_used(), 0);
        assert_eq!(pool.free_slots(), 3);
    }

    #[test]
    fn test_pool_slots_do_not_overlap() {
        let mut pool = PoolAllocator::with_capacity(24, 8, 8).unwrap();
        let mut addresses: Vec<usize> = (0..8)
            .map(|_| pool.allocate(24, 8).unwrap().as_ptr() as usize)
            .collect();
        addresses.sort_unstable();

        for pair in addresses.windows(2) {
            assert!(pair[1] - pair[0] >= 24);
        }
        for address in &addresses {
            assert_eq!(address % 8, 0);
        }

        for address in addresses {
            pool.deallocate(NonNull::new(address as *mut u8).unwrap());
        }
    }

    #[test]
    fn test_pool_refills_after_any_order() {
        let mut pool = PoolAllocator::with_capacity(16, 16, 5).unwrap();
        let slots: Vec<_> = (0..5).map(|_| pool.allocate(16, 16).unwrap()).collect();

        for index in [3, 0, 4, 1, 2] {
            pool.deallocate(slots[index]);
        }

        let again: Vec<_> = (0..5).map(|_| pool.allocate(16, 16).unwrap()).collect();
        assert!(pool.allocate(16, 16).is_none());
        for ptr in again {
            pool.deallocate(ptr);
        }
    }

    #[test]
    fn test_pool_validation() {
        assert_eq!(
            PoolAllocator::with_capacity(4, 4, 10).unwrap_err(),
            MemoryError::InvalidInstanceSize { instance_size: 4, minimum: SLOT_LINK_SIZE }
        );
        assert_eq!(
            PoolAllocator::with_capacity(24, 16, 10).unwrap_err(),
            MemoryError::InstanceNotAligned { instance_size: 24, alignment: 16 }
        );
        assert_eq!(
            PoolAllocator::with_capacity(32, 3, 10).unwrap_err(),
            MemoryError::InvalidAlignment { alignment: 3 }
        );
    }

    #[test]
    fn test_pool_rejects_region_without_a_slot() {
        assert_eq!(
            PoolAllocator::with_capacity(32, 16, 0).unwrap_err(),
            MemoryError::ZeroSize
        );
        assert_eq!(
            PoolAllocator::validate(16, &PoolArgs::new(32, 16)).unwrap_err(),
            MemoryError::RegionTooSmall { size: 16, minimum: 32 }
        );
        assert!(PoolAllocator::validate(32, &PoolArgs::new(32, 16)).is_ok());
    }

    #[test]
    #[should_panic(expected = "double free of pool slot")]
    fn test_pool_double_free_is_fatal() {
        let mut pool = PoolAllocator::with_capacity(32, 8, 3).unwrap();
        let _a = pool.allocate(32, 8).unwrap();
        let b = pool.allocate(32, 8).unwrap();
        pool.deallocate(b);
        pool.deallocate(b);
    }

    #[test]
    fn test_pool_args_of_type() {
        let args = PoolArgs::of::<[f32; 4]>();
        assert_eq!(args, PoolArgs::new(16, 4));
    }

    #[test]
    #[should_panic(expected = "pool serves 32-byte instances")]
    fn test_pool_size_mismatch_is_fatal() {
        let mut pool = PoolAllocator::with_capacity(32, 8, 2).unwrap();
        let _ = pool.allocate(16, 8);
    }

    #[test]
    #[should_panic(expected = "is not a slot of this pool")]
    fn test_pool_misaligned_pointer_is_fatal() {
        let mut pool = PoolAllocator::with_capacity(32, 8, 2).unwrap();
        let slot = pool.allocate(32, 8).unwrap();
        let inside = NonNull::new((slot.as_ptr() as usize + 8) as *mut u8).unwrap();
        pool.deallocate(inside);
    }
}
