//! Property-based tests for the allocators.
//!
//! Uses proptest to generate allocation patterns and verify that alignment,
//! disjointness, coalescing and leak detection hold for all of them.

use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

use keystone_memory::memory::align::{align_adjustment, align_forward};
use keystone_memory::{Allocator, BlockAllocator, FreeSpan, LinearAllocator, PoolAllocator};
use proptest::prelude::*;

/// Strategy for power-of-two alignments between 1 and 128.
fn alignment() -> impl Strategy<Value = u8> {
    (0u32..8).prop_map(|shift| 1u8 << shift)
}

/// Strategy for a batch of `(size, alignment)` requests.
fn requests(max_size: usize, max_len: usize) -> impl Strategy<Value = Vec<(usize, u8)>> {
    prop::collection::vec((1..=max_size, (0u32..5).prop_map(|shift| 1u8 << shift)), 1..max_len)
}

/// One step of an interleaved allocate/free sequence.
#[derive(Clone, Debug)]
enum Op {
    Allocate(usize, u8),
    Free(prop::sample::Index),
}

/// Strategy for up to `max_len` mixed operations, biased towards allocation.
fn operations(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        3 => (1usize..300, alignment()).prop_map(|(size, alignment)| Op::Allocate(size, alignment)),
        2 => any::<prop::sample::Index>().prop_map(Op::Free),
    ];
    prop::collection::vec(op, 1..max_len)
}

/// Strategy for a permutation of `0..n` with `n` in `range`.
fn permutation(range: std::ops::Range<usize>) -> impl Strategy<Value = Vec<usize>> {
    range.prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
}

fn assert_disjoint(spans: &mut [(usize, usize)]) {
    spans.sort_unstable();
    for pair in spans.windows(2) {
        let (start, len) = pair[0];
        assert!(start + len <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }
}

fn assert_coalesced(spans: &[FreeSpan]) {
    for pair in spans.windows(2) {
        assert!(
            pair[0].end() < pair[1].offset,
            "free blocks {:?} and {:?} touch or overlap",
            pair[0],
            pair[1]
        );
    }
}

fn address(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr() as usize
}

proptest! {
    /// align_forward lands on the next multiple within one alignment step
    #[test]
    fn align_forward_is_minimal(address in 0usize..(1 << 40), shift in 0u32..16) {
        let alignment = 1usize << shift;
        let aligned = align_forward(address, alignment);

        prop_assert_eq!(aligned % alignment, 0);
        prop_assert!(aligned >= address);
        prop_assert!(aligned < address + alignment);
        prop_assert_eq!(aligned - address, align_adjustment(address, alignment));
    }

    /// Block allocations are aligned and never overlap
    #[test]
    fn block_allocations_are_disjoint(batch in requests(256, 40)) {
        let mut heap = BlockAllocator::with_capacity(8192).unwrap();
        let region = heap.region();
        let mut issued = Vec::new();

        for (size, alignment) in batch {
            if let Some(ptr) = heap.allocate(size, alignment) {
                prop_assert_eq!(address(ptr) % usize::from(alignment), 0);
                prop_assert!(region.contains(ptr));
                prop_assert!(address(ptr) + size <= region.address() + region.len());
                issued.push((ptr, size));
            }
        }

        let mut spans: Vec<_> = issued.iter().map(|(ptr, size)| (address(*ptr), *size)).collect();
        assert_disjoint(&mut spans);

        for (ptr, _) in issued {
            heap.deallocate(ptr);
        }
    }

    /// Allocate then deallocate restores the counters
    #[test]
    fn block_round_trip_restores_usage(
        prefix in requests(128, 10),
        size in 1usize..512,
        alignment in alignment(),
    ) {
        let mut heap = BlockAllocator::with_capacity(16 * 1024).unwrap();
        let held: Vec<_> = prefix
            .into_iter()
            .filter_map(|(size, alignment)| heap.allocate(size, alignment))
            .collect();

        let used = heap.memory_used();
        let count = heap.allocation_count();
        let free: Vec<_> = heap.free_blocks().collect();

        let ptr = heap.allocate(size, alignment).unwrap();
        heap.deallocate(ptr);

        prop_assert_eq!(heap.memory_used(), used);
        prop_assert_eq!(heap.allocation_count(), count);
        prop_assert_eq!(heap.free_blocks().collect::<Vec<_>>(), free);

        for ptr in held {
            heap.deallocate(ptr);
        }
    }

    /// No two free blocks are ever adjacent, whatever the free order
    #[test]
    fn block_free_list_stays_coalesced(order in permutation(1..32), size in 8usize..200) {
        let mut heap = BlockAllocator::with_capacity(16 * 1024).unwrap();
        let ptrs: Vec<_> = (0..order.len()).map(|_| heap.allocate(size, 8).unwrap()).collect();

        for index in order {
            heap.deallocate(ptrs[index]);
            let spans: Vec<_> = heap.free_blocks().collect();
            assert_coalesced(&spans);
        }

        let spans: Vec<_> = heap.free_blocks().collect();
        prop_assert_eq!(spans, vec![FreeSpan { offset: 0, size: 16 * 1024 }]);
        prop_assert_eq!(heap.memory_used(), 0);
    }

    /// Interleaved allocate/free keeps the heap partitioned and coalesced
    #[test]
    fn block_interleaved_operations_keep_invariants(ops in operations(300)) {
        let mut heap = BlockAllocator::with_capacity(4096).unwrap();
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(size, alignment) => {
                    if let Some(ptr) = heap.allocate(size, alignment) {
                        prop_assert_eq!(address(ptr) % usize::from(alignment), 0);
                        live.push((ptr, size));
                    }
                }
                Op::Free(index) => {
                    if !live.is_empty() {
                        let (ptr, _) = live.swap_remove(index.index(live.len()));
                        heap.deallocate(ptr);
                    }
                }
            }

            assert_coalesced(&heap.free_blocks().collect::<Vec<_>>());
            prop_assert_eq!(heap.free_bytes() + heap.memory_used(), heap.size());
            prop_assert_eq!(heap.allocation_count(), live.len());
            let mut spans: Vec<_> = live.iter().map(|(ptr, size)| (address(*ptr), *size)).collect();
            assert_disjoint(&mut spans);
        }

        for (ptr, _) in live {
            heap.deallocate(ptr);
        }
        prop_assert_eq!(
            heap.free_blocks().collect::<Vec<_>>(),
            vec![FreeSpan { offset: 0, size: 4096 }]
        );
    }

    /// Linear allocations are aligned, monotonic and disjoint
    #[test]
    fn linear_allocations_are_disjoint(batch in requests(128, 60)) {
        let mut linear = LinearAllocator::with_capacity(4096).unwrap();
        let mut spans = Vec::new();
        let mut last = 0;

        for (size, alignment) in batch {
            match linear.allocate(size, alignment) {
                Some(ptr) => {
                    prop_assert_eq!(address(ptr) % usize::from(alignment), 0);
                    prop_assert!(address(ptr) >= last);
                    last = address(ptr) + size;
                    spans.push((address(ptr), size));
                }
                None => {
                    prop_assert!(linear.remaining() < size + usize::from(alignment));
                }
            }
        }

        assert_disjoint(&mut spans);
        linear.clear();
        prop_assert_eq!(linear.remaining(), 4096);
    }

    /// N slots: N allocations succeed, N+1 fails, any-order frees refill
    #[test]
    fn pool_refills_lifo(order in permutation(1..64), shift in 3u32..7) {
        let instance_size = 1usize << shift;
        let capacity = order.len();
        let mut pool = PoolAllocator::with_capacity(instance_size, 8, capacity).unwrap();

        let slots: Vec<_> = (0..capacity).map(|_| pool.allocate(instance_size, 8).unwrap()).collect();
        prop_assert!(pool.allocate(instance_size, 8).is_none());

        let mut spans: Vec<_> = slots.iter().map(|ptr| (address(*ptr), instance_size)).collect();
        assert_disjoint(&mut spans);

        for &index in &order {
            pool.deallocate(slots[index]);
        }
        prop_assert_eq!(pool.free_slots(), capacity);

        let again: Vec<_> = (0..capacity).map(|_| pool.allocate(instance_size, 8).unwrap()).collect();
        let last_freed = order[order.len() - 1];
        prop_assert_eq!(again[0], slots[last_freed]);
        prop_assert!(pool.allocate(instance_size, 8).is_none());

        for ptr in again {
            pool.deallocate(ptr);
        }
    }

    /// Teardown with live allocations panics; after freeing it does not
    #[test]
    fn block_teardown_detects_leaks(region in 64usize..4096, fraction in 1usize..=4) {
        let size = region / (2 * fraction);

        let mut leaky = BlockAllocator::with_capacity(region).unwrap();
        prop_assert!(leaky.allocate(size, 8).is_some());
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || drop(leaky)));
        prop_assert!(outcome.is_err());

        let mut clean = BlockAllocator::with_capacity(region).unwrap();
        let ptr = clean.allocate(size, 8).unwrap();
        clean.deallocate(ptr);
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || drop(clean)));
        prop_assert!(outcome.is_ok());
    }
}
