//! # Regions
//!
//! A [`Region`] describes a contiguous byte span `(base, len)` that some
//! allocator manages. Allocators never touch raw pointers directly: they
//! address their bookkeeping by offset through the bounds-checked
//! [`Region::read`] / [`Region::write`] accessors, which are the only places
//! where in-region memory is reinterpreted.
//!
//! A [`HostRegion`] owns a span reserved from the host allocator and returns
//! it on drop.

// SAFETY: This module is the escape hatch for raw memory access.
// Every unsafe block is bounds-checked against the region first.
#![allow(unsafe_code)]

use std::alloc::{alloc, dealloc, Layout};
use std::mem::size_of;
use std::ptr::{self, NonNull};

use bytemuck::Pod;

use crate::error::{MemoryError, MemoryResult};
use crate::memory::allocator::Allocator;

/// A fixed, contiguous byte span managed by one allocator.
///
/// `Region` is a descriptor: copying it does not copy or own memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: A region is only ever accessed by the allocator that manages it,
// and allocators are used by one owner at a time (see `SharedAllocator`).
unsafe impl Send for Region {}
// SAFETY: See above; shared descriptors never access memory on their own.
unsafe impl Sync for Region {}

impl Region {
    /// Creates a region descriptor from raw parts.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be valid for reads and writes for as long as
    /// the region is in use, and must not be accessed except through the
    /// allocator that manages it and the pointers that allocator hands out.
    #[inline]
    #[must_use]
    pub const unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// Carves `size` bytes out of `allocator` and describes them as a region.
    ///
    /// Returns `None` when the allocator is exhausted.
    pub(crate) fn allocate_from<A>(allocator: &mut A, size: usize, alignment: u8) -> Option<Self>
    where
        A: Allocator + ?Sized,
    {
        let base = allocator.allocate(size, alignment)?;
        // SAFETY: `allocate` handed out `size` bytes exclusively to us; they
        // stay valid until we give them back through `deallocate`.
        Some(unsafe { Self::from_raw_parts(base, size) })
    }

    /// Base pointer of the region.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length of the region in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length region.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Numeric address of the first byte.
    #[inline]
    #[must_use]
    pub fn address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Offset of `ptr` from the region base, if `ptr` lies inside the region.
    #[inline]
    #[must_use]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        (ptr.as_ptr() as usize)
            .checked_sub(self.address())
            .filter(|offset| *offset < self.len)
    }

    /// Returns true if `ptr` lies inside the region.
    #[inline]
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.offset_of(ptr).is_some()
    }

    /// Pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside the region.
    #[inline]
    #[must_use]
    pub fn pointer_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset < self.len,
            "offset {offset} outside region of {} bytes",
            self.len
        );
        // SAFETY: offset is in bounds of a live allocation, so the result is
        // non-null and keeps the base pointer's provenance.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Reads a plain-old-data value stored at `offset`.
    ///
    /// The value may be unaligned.
    ///
    /// # Panics
    ///
    /// Panics if the value does not fit inside the region.
    #[inline]
    pub(crate) fn read<T: Pod>(&self, offset: usize) -> T {
        self.check_span(offset, size_of::<T>());
        let mut value: T = bytemuck::Zeroable::zeroed();
        // SAFETY: the span is inside the region, and the destination is a
        // distinct local of exactly `size_of::<T>()` bytes.
        unsafe {
            ptr::copy_nonoverlapping(
                self.base.as_ptr().add(offset),
                bytemuck::bytes_of_mut(&mut value).as_mut_ptr(),
                size_of::<T>(),
            );
        }
        value
    }

    /// Writes a plain-old-data value at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the value does not fit inside the region.
    #[inline]
    pub(crate) fn write<T: Pod>(&self, offset: usize, value: T) {
        self.check_span(offset, size_of::<T>());
        let bytes = bytemuck::bytes_of(&value);
        // SAFETY: the span is inside the region, which is valid for writes
        // per the `from_raw_parts` contract.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(offset), bytes.len());
        }
    }

    #[inline]
    fn check_span(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "span {offset}..+{len} outside region of {} bytes",
            self.len
        );
    }
}

/// A region reserved from the host allocator.
///
/// The memory is returned to the host when this value is dropped.
#[derive(Debug)]
pub struct HostRegion {
    region: Region,
    layout: Layout,
}

// SAFETY: HostRegion uniquely owns its allocation.
unsafe impl Send for HostRegion {}

impl HostRegion {
    /// Reserves `size` bytes aligned to `alignment` from the host.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero size, an invalid alignment, or when the
    /// host allocator is out of memory.
    pub fn reserve(size: usize, alignment: usize) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| MemoryError::InvalidAlignment { alignment })?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        let base = NonNull::new(ptr).ok_or(MemoryError::HostAllocationFailed { size, alignment })?;

        tracing::trace!("reserved host region of {} bytes at {:p}", size, base);

        Ok(Self {
            // SAFETY: freshly allocated, exclusively owned until drop.
            region: unsafe { Region::from_raw_parts(base, size) },
            layout,
        })
    }

    /// The reserved span.
    #[inline]
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
    }
}

impl Drop for HostRegion {
    fn drop(&mut self) {
        tracing::trace!(
            "releasing host region of {} bytes at {:p}",
            self.region.len(),
            self.region.base()
        );
        // SAFETY: allocated in `reserve` with this exact layout.
        unsafe {
            dealloc(self.region.base().as_ptr(), self.layout);
        }
    }
}
