//! # Allocators
//!
//! Region-based allocation strategies sharing one contract.
//!
//! | Strategy          | Allocate    | Deallocate          | Use for                      |
//! |-------------------|-------------|---------------------|------------------------------|
//! | [`LinearAllocator`] | O(1) bump | bulk `clear()` only | per-frame scratch data       |
//! | [`BlockAllocator`]  | O(n) first fit | O(n), coalescing | general variable-size data |
//! | [`PoolAllocator`]   | O(1)      | O(1), LIFO          | many same-sized objects      |
//!
//! Every allocator owns exactly one [`Region`] for its whole life and counts
//! what it hands out. Dropping an allocator with live allocations is a fatal
//! leak.

pub mod align;
mod allocator;
mod block;
mod linear;
mod pool;
mod region;
pub mod typed;

pub use allocator::{
    share, Allocator, AllocatorCore, AllocatorKind, Backing, SharedAllocator, Strategy,
};
pub use block::{BlockAllocator, FreeSpan, HEADER_SIZE, MIN_REGION_SIZE};
pub use linear::LinearAllocator;
pub use pool::{PoolAllocator, PoolArgs, SLOT_LINK_SIZE};
pub use region::{HostRegion, Region};
