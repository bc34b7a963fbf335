//! # Block Allocator
//!
//! General-purpose allocator over an address-ordered, intrusive free list.
//!
//! ## Algorithm
//!
//! - **Allocation**: first fit. The first free block that can hold the
//!   request (plus header and alignment padding) is split; the tail stays
//!   on the list as a new free block unless it is too small to be useful.
//! - **Deallocation**: the freed block is inserted in address order and
//!   merged with its neighbours when they touch.
//!
//! ## Memory Layout
//!
//! ```text
//!   Allocated block:
//!   ┌──────────────┬──────────────────────┬────────────────────────┐
//!   │   padding    │ AllocationHeader     │ user data              │
//!   │              │ { size, adjustment } │                        │
//!   └──────────────┴──────────────────────┴────────────────────────┘
//!   ▲ block start                         ▲ returned pointer
//!   └──────────── adjustment ─────────────┘
//!
//!   Free block:
//!   ┌──────────────────────┬─────────────────────────────────────────┐
//!   │ FreeBlock            │ unused                                  │
//!   │ { size, next }       │                                         │
//!   └──────────────────────┴─────────────────────────────────────────┘
//! ```
//!
//! Free nodes and headers live inside the managed region and are addressed
//! by offset. The free list is the only record of available memory.

use std::mem::size_of;
use std::ptr::NonNull;

use bytemuck::{Pod, Zeroable};

use crate::error::{MemoryError, MemoryResult};
use crate::memory::align::align_adjustment_with_header;
use crate::memory::allocator::{
    Allocator, AllocatorCore, AllocatorKind, Backing, SharedAllocator, Strategy,
};
use crate::memory::linear::DEFAULT_HOST_ALIGNMENT;
use crate::memory::region::Region;

/// End-of-list marker for free-list offsets.
const NIL: usize = usize::MAX;

/// Free-list node, stored at the start of every free block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct FreeBlock {
    size: usize,
    next: usize,
}

/// Written immediately before every pointer handed out.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct AllocationHeader {
    /// Total bytes consumed, including padding and this header.
    size: usize,
    /// Distance from the block start to the returned pointer.
    adjustment: usize,
}

/// Size of the header in front of every block allocation.
pub const HEADER_SIZE: usize = size_of::<AllocationHeader>();

/// Smallest region a block allocator accepts: room for one free node.
pub const MIN_REGION_SIZE: usize = size_of::<FreeBlock>();

// A freed block must always be able to hold a free node.
const _: () = assert!(size_of::<FreeBlock>() <= HEADER_SIZE);

/// A free span reported by [`BlockAllocator::free_blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeSpan {
    /// Offset from the region base.
    pub offset: usize,
    /// Size in bytes.
    pub size: usize,
}

impl FreeSpan {
    /// Offset one past the last byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Walks the free list in address order.
struct Nodes {
    region: Region,
    next: usize,
}

impl Iterator for Nodes {
    type Item = (usize, FreeBlock);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let offset = self.next;
        let block: FreeBlock = self.region.read(offset);
        self.next = block.next;
        Some((offset, block))
    }
}

/// Position in the free list: a node and its predecessor.
#[derive(Clone, Copy, Debug)]
struct Cursor {
    previous: usize,
    current: usize,
}

/// First-fit free-list allocator with splitting and coalescing.
///
/// # Thread Safety
///
/// Not thread-safe. Share through [`SharedAllocator`].
///
/// # Example
///
/// ```rust
/// use keystone_memory::{Allocator, BlockAllocator};
///
/// let mut heap = BlockAllocator::with_capacity(1024).unwrap();
/// let a = heap.allocate(100, 8).unwrap();
/// let b = heap.allocate(200, 8).unwrap();
///
/// heap.deallocate(a);
/// heap.deallocate(b);
/// assert_eq!(heap.free_blocks().count(), 1);
/// ```
#[derive(Debug)]
pub struct BlockAllocator {
    core: AllocatorCore,
    /// Offset of the first free block, or `NIL`.
    head: usize,
}

impl BlockAllocator {
    /// Creates a block allocator over a fresh host region.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` cannot hold a free node or the host is
    /// out of memory.
    pub fn with_capacity(size: usize) -> MemoryResult<Self> {
        Self::with_capacity_aligned(size, DEFAULT_HOST_ALIGNMENT)
    }

    /// Creates a block allocator over a fresh host region with the given
    /// base alignment.
    ///
    /// # Errors
    ///
    /// See [`BlockAllocator::with_capacity`].
    pub fn with_capacity_aligned(size: usize, alignment: usize) -> MemoryResult<Self> {
        Self::validate(size, &())?;
        let (backing, region) = Backing::host(size, alignment)?;
        Ok(Self::assemble(backing, region, ()))
    }

    /// Creates a block allocator over `size` bytes carved from `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` cannot hold a free node or the parent has
    /// no room.
    pub fn from_parent(
        parent: &SharedAllocator<dyn Allocator>,
        size: usize,
        alignment: u8,
    ) -> MemoryResult<Self> {
        Self::validate(size, &())?;
        let (backing, region) = Backing::carve(parent, size, alignment)?;
        Ok(Self::assemble(backing, region, ()))
    }

    /// Iterates the free list in address order.
    pub fn free_blocks(&self) -> impl Iterator<Item = FreeSpan> + '_ {
        self.nodes().map(|(offset, block)| FreeSpan { offset, size: block.size })
    }

    /// Size of the largest free block, or zero when the region is full.
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        self.nodes().map(|(_, block)| block.size).max().unwrap_or(0)
    }

    /// Total free bytes across all free blocks.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.nodes().map(|(_, block)| block.size).sum()
    }

    fn nodes(&self) -> Nodes {
        Nodes {
            region: self.core.region(),
            next: self.head,
        }
    }

    /// Finds the first node matching `stop`, remembering its predecessor.
    ///
    /// When nothing matches, `current` is `NIL` and `previous` is the tail.
    fn seek(&self, mut stop: impl FnMut(usize, &FreeBlock) -> bool) -> Cursor {
        let mut previous = NIL;
        for (offset, block) in self.nodes() {
            if stop(offset, &block) {
                return Cursor { previous, current: offset };
            }
            previous = offset;
        }
        Cursor { previous, current: NIL }
    }

    /// Points `previous` (or the head) at `next`.
    fn relink(&mut self, previous: usize, next: usize) {
        if previous == NIL {
            self.head = next;
        } else {
            let region = self.core.region();
            let mut node: FreeBlock = region.read(previous);
            node.next = next;
            region.write(previous, node);
        }
    }
}

impl Strategy for BlockAllocator {
    type Args = ();

    fn validate(size: usize, _args: &()) -> MemoryResult<()> {
        if size < MIN_REGION_SIZE {
            return Err(MemoryError::RegionTooSmall { size, minimum: MIN_REGION_SIZE });
        }
        Ok(())
    }

    fn assemble(backing: Backing, region: Region, _args: ()) -> Self {
        region.write(0, FreeBlock { size: region.len(), next: NIL });
        Self {
            core: AllocatorCore::new(AllocatorKind::Block, backing, region),
            head: 0,
        }
    }
}

impl Allocator for BlockAllocator {
    fn allocate(&mut self, size: usize, alignment: u8) -> Option<NonNull<u8>> {
        assert!(size > 0, "cannot allocate zero bytes");
        assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");

        let region = self.core.region();
        let alignment = usize::from(alignment);
        let fit = |offset: usize| -> Option<(usize, usize)> {
            let adjustment =
                align_adjustment_with_header(region.address() + offset, alignment, HEADER_SIZE);
            size.checked_add(adjustment).map(|total| (adjustment, total))
        };

        let cursor = self.seek(|offset, block| fit(offset).is_some_and(|(_, total)| total <= block.size));
        if cursor.current == NIL {
            tracing::trace!(
                "block allocator exhausted: {} bytes requested, largest free block {}",
                size,
                self.largest_free_block()
            );
            return None;
        }

        let offset = cursor.current;
        let block: FreeBlock = region.read(offset);
        let (adjustment, mut total) = fit(offset)?;

        let leftover = block.size - total;
        let successor = if leftover <= HEADER_SIZE {
            // Too small to ever hold another allocation: hand out all of it.
            total = block.size;
            block.next
        } else {
            let split = offset + total;
            region.write(split, FreeBlock { size: leftover, next: block.next });
            split
        };
        self.relink(cursor.previous, successor);

        let aligned = offset + adjustment;
        region.write(aligned - HEADER_SIZE, AllocationHeader { size: total, adjustment });
        self.core.record_allocation(total);

        Some(region.pointer_at(aligned))
    }

    fn deallocate(&mut self, ptr: NonNull<u8>) {
        let region = self.core.region();
        let offset = region
            .offset_of(ptr)
            .unwrap_or_else(|| panic!("pointer {ptr:p} was not issued by this block allocator"));
        assert!(offset >= HEADER_SIZE, "pointer {ptr:p} has no allocation header");

        let header: AllocationHeader = region.read(offset - HEADER_SIZE);
        assert!(
            header.adjustment <= offset
                && (offset - header.adjustment)
                    .checked_add(header.size)
                    .is_some_and(|end| end <= region.len()),
            "double free or corrupted allocation header at {ptr:p}"
        );
        let start = offset - header.adjustment;
        let size = header.size;
        let end = start + size;

        let cursor = self.seek(|node, _| node >= end);

        let merged = if cursor.previous == NIL {
            region.write(start, FreeBlock { size, next: self.head });
            self.head = start;
            start
        } else {
            let mut previous: FreeBlock = region.read(cursor.previous);
            let previous_end = cursor.previous + previous.size;
            assert!(previous_end <= start, "double free of {ptr:p}");

            if previous_end == start {
                previous.size += size;
                region.write(cursor.previous, previous);
                cursor.previous
            } else {
                region.write(start, FreeBlock { size, next: previous.next });
                previous.next = start;
                region.write(cursor.previous, previous);
                start
            }
        };

        if cursor.current == end {
            let following: FreeBlock = region.read(cursor.current);
            let mut node: FreeBlock = region.read(merged);
            node.size += following.size;
            node.next = following.next;
            region.write(merged, node);
        }

        self.core.record_release(size);
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Block
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

    fn spans(heap: &BlockAllocator) -> Vec<FreeSpan> {
        heap.free_blocks().collect()
    }

    fn assert_coalesced(heap: &BlockAllocator) {
        let spans = spans(heap);
        for pair in spans.windows(2) {
            assert!(pair[0].end() < pair[1].offset, "adjacent free blocks: {pair:?}");
        }
    }

    #[test]
    fn test_block_starts_with_single_free_block() {
        let heap = BlockAllocator::with_capacity(1024).unwrap();
        assert_eq!(spans(&heap), vec![FreeSpan { offset: 0, size: 1024 }]);
        assert_eq!(heap.memory_used(), 0);
    }

    #[test]
    fn test_block_first_fit_reuses_freed_block() {
        let mut heap = BlockAllocator::with_capacity(1024).unwrap();

        let a = heap.allocate(100, 8).unwrap();
        let b = heap.allocate(200, 8).unwrap();
        heap.deallocate(a);
        let c = heap.allocate(50, 8).unwrap();

        // C lands where A was.
        assert_eq!(c, a);

        // A's block was 16 + 100 bytes; C consumed 16 + 50 of it.
        let region = heap.region();
        let b_offset = region.offset_of(b).unwrap();
        let free = spans(&heap);
        assert_eq!(free[0], FreeSpan { offset: 66, size: 50 });
        assert!(free[0].end() <= b_offset - HEADER_SIZE);
        assert_eq!(free.len(), 2);

        heap.deallocate(b);
        heap.deallocate(c);
        assert_eq!(spans(&heap), vec![FreeSpan { offset: 0, size: 1024 }]);
    }

    #[test]
    fn test_block_round_trip_restores_counters() {
        let mut heap = BlockAllocator::with_capacity(512).unwrap();
        let keep = heap.allocate(32, 16).unwrap();
        let used = heap.memory_used();

        let ptr = heap.allocate(64, 32).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 32, 0);
        heap.deallocate(ptr);

        assert_eq!(heap.memory_used(), used);
        assert_eq!(heap.allocation_count(), 1);
        heap.deallocate(keep);
    }

    #[test]
    fn test_block_coalesces_in_any_order() {
        let mut heap = BlockAllocator::with_capacity(2048).unwrap();
        let ptrs: Vec<_> = (0..8).map(|_| heap.allocate(64, 8).unwrap()).collect();

        for index in [1, 3, 5, 7, 0, 6, 2, 4] {
            heap.deallocate(ptrs[index]);
            assert_coalesced(&heap);
        }

        assert_eq!(spans(&heap), vec![FreeSpan { offset: 0, size: 2048 }]);
    }

    #[test]
    fn test_block_consumes_small_remainder() {
        let mut heap = BlockAllocator::with_capacity(64).unwrap();
        // 16 header + 40 = 56, leaving 8: too small to split.
        let ptr = heap.allocate(40, 16).unwrap();
        assert_eq!(heap.memory_used(), 64);
        assert_eq!(heap.free_blocks().count(), 0);
        assert!(heap.allocate(1, 1).is_none());

        heap.deallocate(ptr);
        assert_eq!(spans(&heap), vec![FreeSpan { offset: 0, size: 64 }]);
    }

    #[test]
    fn test_block_out_of_memory() {
        let mut heap = BlockAllocator::with_capacity(128).unwrap();
        assert!(heap.allocate(200, 8).is_none());
        assert_eq!(heap.allocation_count(), 0);
    }

    #[test]
    fn test_block_rejects_tiny_region() {
        assert_eq!(
            BlockAllocator::with_capacity(8).unwrap_err(),
            MemoryError::RegionTooSmall { size: 8, minimum: MIN_REGION_SIZE }
        );
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_block_double_free_is_fatal() {
        let mut heap = BlockAllocator::with_capacity(256).unwrap();
        let _a = heap.allocate(32, 8).unwrap();
        let b = heap.allocate(32, 8).unwrap();
        let _c = heap.allocate(32, 8).unwrap();
        heap.deallocate(b);
        heap.deallocate(b);
    }

    #[test]
    #[should_panic(expected = "corrupted allocation header")]
    fn test_block_corrupt_header_size_is_fatal() {
        let mut heap = BlockAllocator::with_capacity(256).unwrap();
        let ptr = heap.allocate(32, 8).unwrap();
        let offset = heap.region().offset_of(ptr).unwrap();
        let mut header: AllocationHeader = heap.region().read(offset - HEADER_SIZE);
        header.size = usize::MAX;
        heap.region().write(offset - HEADER_SIZE, header);
        heap.deallocate(ptr);
    }

    #[test]
    #[should_panic(expected = "was not issued by this block allocator")]
    fn test_block_foreign_pointer_is_fatal() {
        let mut heap = BlockAllocator::with_capacity(256).unwrap();
        let mut other = BlockAllocator::with_capacity(256).unwrap();
        let ptr = other.allocate(8, 8).unwrap();
        heap.deallocate(ptr);
    }

    #[test]
    #[should_panic(expected = "memory leak")]
    fn test_block_leak_on_drop_is_fatal() {
        let mut heap = BlockAllocator::with_capacity(256).unwrap();
        let _ = heap.allocate(240, 1).unwrap();
        drop(heap);
    }

    #[test]
    fn test_block_child_returns_region_to_parent() {
        let parent = crate::memory::allocator::share(BlockAllocator::with_capacity(1024).unwrap());
        let parent_dyn: SharedAllocator<dyn Allocator> = parent.clone();

        let mut child = BlockAllocator::from_parent(&parent_dyn, 256, 16).unwrap();
        assert!(child.has_parent());
        assert!(!parent.lock().has_parent());
        assert_eq!(parent.lock().allocation_count(), 1);

        let ptr = child.allocate(32, 8).unwrap();
        assert!(parent.lock().region().contains(ptr));
        child.deallocate(ptr);
        drop(child);

        assert_eq!(parent.lock().allocation_count(), 0);
        assert_eq!(parent.lock().free_blocks().count(), 1);
    }
}
