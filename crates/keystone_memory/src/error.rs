//! # Memory Error Types
//!
//! Recoverable failures of the memory subsystem.
//!
//! Contract violations (deallocating from a linear allocator, pool requests
//! with the wrong size, foreign pointers) are not represented here: they
//! panic, because the allocator state can no longer be trusted.

use thiserror::Error;

/// Errors that can occur while reserving or carving memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A zero-byte region or allocator was requested.
    #[error("requested size must be greater than zero")]
    ZeroSize,

    /// Alignment is zero or not a power of two.
    #[error("alignment {alignment} is not a non-zero power of two")]
    InvalidAlignment {
        /// The rejected alignment.
        alignment: usize,
    },

    /// The requested size is not a multiple of the requested alignment.
    #[error("size {size} is not a multiple of alignment {alignment}")]
    SizeNotAligned {
        /// The requested size in bytes.
        size: usize,
        /// The requested alignment.
        alignment: usize,
    },

    /// The region cannot hold the allocator's own bookkeeping.
    #[error("region of {size} bytes is too small, need at least {minimum}")]
    RegionTooSmall {
        /// The requested region size.
        size: usize,
        /// The smallest usable region size.
        minimum: usize,
    },

    /// Pool instances must be able to hold the free-slot link.
    #[error("pool instance size {instance_size} is smaller than the {minimum}-byte slot link")]
    InvalidInstanceSize {
        /// The rejected instance size.
        instance_size: usize,
        /// The size of one slot link.
        minimum: usize,
    },

    /// Pool instances must keep every slot aligned.
    #[error("pool instance size {instance_size} is not a multiple of alignment {alignment}")]
    InstanceNotAligned {
        /// The rejected instance size.
        instance_size: usize,
        /// The configured alignment.
        alignment: usize,
    },

    /// No free block or slot is large enough.
    #[error("out of memory: cannot allocate {requested} bytes aligned to {alignment}")]
    OutOfMemory {
        /// Requested size in bytes.
        requested: usize,
        /// Requested alignment.
        alignment: usize,
    },

    /// The host allocator refused to hand out a region.
    #[error("host allocation of {size} bytes aligned to {alignment} failed")]
    HostAllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment.
        alignment: usize,
    },

    /// The manager already owns the configured maximum number of arenas.
    #[error("arena limit of {limit} reached")]
    ArenaLimitReached {
        /// The configured maximum.
        limit: usize,
    },

    /// The manager has not been initialized yet.
    #[error("memory manager is not initialized")]
    NotInitialized,

    /// The manager was initialized twice.
    #[error("memory manager is already initialized")]
    AlreadyInitialized,

    /// An arena still has live allocations at teardown.
    #[error("arena {arena} leaked: {allocation_count} live allocations, {memory_used} bytes in use")]
    ArenaLeak {
        /// Identifier of the leaking arena.
        arena: usize,
        /// Bytes still in use.
        memory_used: usize,
        /// Allocations still live.
        allocation_count: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
