//! # KEYSTONE Memory
//!
//! Region-based memory management for engine subsystems:
//! - Linear, block (free-list) and pool allocators over fixed regions
//! - A manager that reserves host arenas and carves allocators out of them
//! - Fatal leak detection when an allocator or arena is torn down in use
//!
//! ## Architecture Rules
//!
//! 1. **Regions never move or grow** - an allocator's region is fixed at
//!    construction
//! 2. **Bookkeeping lives in the region** - free lists and headers are
//!    intrusive, addressed by offset
//! 3. **Misuse is fatal** - foreign pointers, double frees and leaks panic
//!
//! ## Example
//!
//! ```rust
//! use keystone_memory::{Allocator, LinearAllocator, MemoryConfig, MemoryManager};
//!
//! let mut manager = MemoryManager::new(MemoryConfig::default()).unwrap();
//! manager.initialize().unwrap();
//!
//! let frame = manager.get_allocator::<LinearAllocator>(64 * 1024, 16, ()).unwrap();
//! let scratch = frame.lock().allocate(256, 16).unwrap();
//! # let _ = scratch;
//! frame.lock().clear();
//! drop(frame);
//!
//! manager.deinitialize().unwrap();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod manager;
pub mod memory;

pub use config::MemoryConfig;
pub use diagnostics::{AllocationTracker, TrackerSnapshot};
pub use error::{MemoryError, MemoryResult};
pub use manager::{ArenaUsage, MemoryManager};
pub use memory::typed::{construct, construct_array, construct_default, destroy, destroy_array};
pub use memory::{
    share, Allocator, AllocatorCore, AllocatorKind, Backing, BlockAllocator, FreeSpan,
    HostRegion, LinearAllocator, PoolAllocator, PoolArgs, Region, SharedAllocator, Strategy,
};
