//! # Allocation Diagnostics
//!
//! Counters describing what a [`MemoryManager`](crate::MemoryManager) has
//! reserved and handed out. A tracker is an explicit value shared through
//! `Arc`, so independent managers (and tests) never observe each other.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Live allocation counters.
///
/// Updated with relaxed atomics: values are statistics, not
/// synchronization.
#[derive(Debug, Default)]
pub struct AllocationTracker {
    arenas_reserved: AtomicUsize,
    arenas_released: AtomicUsize,
    bytes_reserved: AtomicUsize,
    peak_bytes_reserved: AtomicUsize,
    allocators_issued: AtomicUsize,
    requests_rejected: AtomicUsize,
}

/// Point-in-time copy of an [`AllocationTracker`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackerSnapshot {
    /// Arenas reserved from the host so far.
    pub arenas_reserved: usize,
    /// Arenas returned to the host so far.
    pub arenas_released: usize,
    /// Host bytes currently held in arenas.
    pub bytes_reserved: usize,
    /// Highest value `bytes_reserved` has reached.
    pub peak_bytes_reserved: usize,
    /// Strategy allocators handed out.
    pub allocators_issued: usize,
    /// Requests rejected for bad arguments or lack of memory.
    pub requests_rejected: usize,
}

impl TrackerSnapshot {
    /// Arenas still held.
    #[inline]
    #[must_use]
    pub const fn live_arenas(&self) -> usize {
        self.arenas_reserved - self.arenas_released
    }
}

impl AllocationTracker {
    /// Creates a tracker with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new arena of `bytes` bytes.
    pub fn record_arena_reserved(&self, bytes: usize) {
        self.arenas_reserved.fetch_add(1, Ordering::Relaxed);
        let now = self.bytes_reserved.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak_bytes_reserved.fetch_max(now, Ordering::Relaxed);
    }

    /// Records an arena of `bytes` bytes returned to the host.
    pub fn record_arena_released(&self, bytes: usize) {
        self.arenas_released.fetch_add(1, Ordering::Relaxed);
        self.bytes_reserved.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Records a strategy allocator handed to a caller.
    pub fn record_allocator_issued(&self) {
        self.allocators_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejected or failed request.
    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            arenas_reserved: self.arenas_reserved.load(Ordering::Relaxed),
            arenas_released: self.arenas_released.load(Ordering::Relaxed),
            bytes_reserved: self.bytes_reserved.load(Ordering::Relaxed),
            peak_bytes_reserved: self.peak_bytes_reserved.load(Ordering::Relaxed),
            allocators_issued: self.allocators_issued.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_survives_release() {
        let tracker = AllocationTracker::new();
        tracker.record_arena_reserved(4096);
        tracker.record_arena_reserved(1024);
        tracker.record_arena_released(4096);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.live_arenas(), 1);
        assert_eq!(snapshot.bytes_reserved, 1024);
        assert_eq!(snapshot.peak_bytes_reserved, 5120);
    }

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(AllocationTracker::new().snapshot(), TrackerSnapshot::default());
    }
}
