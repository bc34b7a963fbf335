//! # Memory Manager
//!
//! Owns the arenas that strategy allocators are carved from.
//!
//! ```text
//!   get_allocator::<PoolAllocator>(size, align, args)
//!        │
//!        ├─ validate size / alignment / strategy args
//!        ├─ carve `size` bytes from an existing arena ──┐
//!        │  or reserve a new host arena and carve it    │
//!        └─ PoolAllocator::assemble(Backing::Parent(arena), region)
//! ```
//!
//! Every arena is a parentless [`BlockAllocator`] over host memory. Each
//! strategy allocator holds a reference to its arena and returns its region
//! there when dropped, so arenas are empty again once every handle is gone.

use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::diagnostics::AllocationTracker;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::{
    share, Allocator, Backing, BlockAllocator, Region, SharedAllocator, Strategy, HEADER_SIZE,
};

/// Usage of one arena, as reported by [`MemoryManager::arena_usage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaUsage {
    /// Arena identifier, unique for the manager's lifetime.
    pub id: usize,
    /// Arena size in bytes.
    pub size: usize,
    /// Bytes carved out for strategy allocators, including headers.
    pub memory_used: usize,
    /// Strategy allocators currently carved from this arena.
    pub allocation_count: usize,
}

/// A host region and the block allocator that manages it.
#[derive(Debug)]
struct ArenaBinding {
    id: usize,
    region: Region,
    arena: SharedAllocator<BlockAllocator>,
}

impl ArenaBinding {
    fn usage(&self) -> ArenaUsage {
        let arena = self.arena.lock();
        ArenaUsage {
            id: self.id,
            size: self.region.len(),
            memory_used: arena.memory_used(),
            allocation_count: arena.allocation_count(),
        }
    }
}

/// Hands out strategy allocators backed by host arenas.
///
/// # Example
///
/// ```rust
/// use keystone_memory::{Allocator, MemoryConfig, MemoryManager, PoolAllocator, PoolArgs};
///
/// let mut manager = MemoryManager::new(MemoryConfig::default()).unwrap();
/// manager.initialize().unwrap();
///
/// let pool = manager
///     .get_allocator::<PoolAllocator>(4096, 16, PoolArgs::new(16, 16))
///     .unwrap();
/// let slot = pool.lock().allocate(16, 16).unwrap();
/// pool.lock().deallocate(slot);
/// drop(pool);
///
/// manager.deinitialize().unwrap();
/// ```
#[derive(Debug)]
pub struct MemoryManager {
    config: MemoryConfig,
    tracker: Arc<AllocationTracker>,
    arenas: Vec<ArenaBinding>,
    next_arena_id: usize,
    initialized: bool,
}

impl MemoryManager {
    /// Creates a manager with its own tracker.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if `config` is invalid.
    pub fn new(config: MemoryConfig) -> MemoryResult<Self> {
        Self::with_tracker(config, Arc::new(AllocationTracker::new()))
    }

    /// Creates a manager reporting to `tracker`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if `config` is invalid.
    pub fn with_tracker(config: MemoryConfig, tracker: Arc<AllocationTracker>) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tracker,
            arenas: Vec::new(),
            next_arena_id: 0,
            initialized: false,
        })
    }

    /// Prepares the manager to hand out allocators.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AlreadyInitialized`] on a second call.
    pub fn initialize(&mut self) -> MemoryResult<()> {
        if self.initialized {
            return Err(MemoryError::AlreadyInitialized);
        }
        self.initialized = true;
        tracing::debug!("memory manager initialized: {:?}", self.config);
        Ok(())
    }

    /// Returns true between [`initialize`](Self::initialize) and a
    /// successful [`deinitialize`](Self::deinitialize).
    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The active configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The tracker this manager reports to.
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &Arc<AllocationTracker> {
        &self.tracker
    }

    /// Number of arenas currently held.
    #[inline]
    #[must_use]
    pub fn arena_count(&self) -> usize {
        self.arenas.len()
    }

    /// Usage of every arena, in reservation order.
    #[must_use]
    pub fn arena_usage(&self) -> Vec<ArenaUsage> {
        self.arenas.iter().map(ArenaBinding::usage).collect()
    }

    /// Carves a `size`-byte region aligned to `alignment` out of an arena
    /// and builds an `S` allocator over it.
    ///
    /// Arguments are checked before any memory is touched: a failed request
    /// leaves every arena unchanged.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::NotInitialized`] before [`initialize`](Self::initialize)
    /// - [`MemoryError::ZeroSize`], [`MemoryError::InvalidAlignment`],
    ///   [`MemoryError::SizeNotAligned`] for bad arguments
    /// - any error from [`Strategy::validate`] for `args`
    /// - [`MemoryError::ArenaLimitReached`] or
    ///   [`MemoryError::HostAllocationFailed`] if no arena can serve the
    ///   request
    pub fn get_allocator<S: Strategy>(
        &mut self,
        size: usize,
        alignment: u8,
        args: S::Args,
    ) -> MemoryResult<SharedAllocator<S>> {
        match self.carve::<S>(size, alignment, &args) {
            Ok((backing, region)) => {
                let allocator = share(S::assemble(backing, region, args));
                self.tracker.record_allocator_issued();
                tracing::debug!(
                    "issued {} allocator of {} bytes aligned to {}",
                    allocator.lock().kind(),
                    size,
                    alignment
                );
                Ok(allocator)
            }
            Err(error) => {
                self.tracker.record_rejected();
                tracing::warn!("allocator request rejected: {}", error);
                Err(error)
            }
        }
    }

    fn carve<S: Strategy>(
        &mut self,
        size: usize,
        alignment: u8,
        args: &S::Args,
    ) -> MemoryResult<(Backing, Region)> {
        if !self.initialized {
            return Err(MemoryError::NotInitialized);
        }
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        if !alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment { alignment: usize::from(alignment) });
        }
        if size % usize::from(alignment) != 0 {
            return Err(MemoryError::SizeNotAligned { size, alignment: usize::from(alignment) });
        }
        S::validate(size, args)?;

        if self.config.reuse_arenas {
            for binding in &self.arenas {
                let parent: SharedAllocator<dyn Allocator> = binding.arena.clone();
                if let Ok(carved) = Backing::carve(&parent, size, alignment) {
                    tracing::trace!("reusing arena {} for {} bytes", binding.id, size);
                    return Ok(carved);
                }
            }
        }

        let parent: SharedAllocator<dyn Allocator> = self.reserve_arena(size, alignment)?;
        Backing::carve(&parent, size, alignment)
    }

    /// Reserves a host arena large enough for one `size`-byte request.
    fn reserve_arena(
        &mut self,
        size: usize,
        alignment: u8,
    ) -> MemoryResult<SharedAllocator<BlockAllocator>> {
        if let Some(limit) = self.config.max_arenas {
            if self.arenas.len() >= limit {
                return Err(MemoryError::ArenaLimitReached { limit });
            }
        }

        let too_large = MemoryError::OutOfMemory {
            requested: size,
            alignment: usize::from(alignment),
        };
        let required = size
            .checked_add(HEADER_SIZE + usize::from(alignment))
            .ok_or_else(|| too_large.clone())?
            .max(self.config.min_arena_size);
        let arena_size = required
            .checked_next_multiple_of(self.config.arena_alignment)
            .ok_or(too_large)?;

        let arena = BlockAllocator::with_capacity_aligned(arena_size, self.config.arena_alignment)?;
        let region = arena.region();
        let id = self.next_arena_id;
        self.next_arena_id += 1;

        let arena = share(arena);
        self.arenas.push(ArenaBinding { id, region, arena: Arc::clone(&arena) });
        self.tracker.record_arena_reserved(arena_size);
        tracing::debug!("reserved arena {} of {} bytes at {:p}", id, arena_size, region.base());

        Ok(arena)
    }

    /// Releases every arena back to the host.
    ///
    /// Calling this on a manager that is not initialized does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ArenaLeak`] for the first arena that still has
    /// allocators carved from it. Nothing is released in that case and the
    /// manager stays initialized.
    pub fn deinitialize(&mut self) -> MemoryResult<()> {
        if !self.initialized {
            return Ok(());
        }

        for usage in self.arena_usage() {
            if usage.memory_used != 0 || usage.allocation_count != 0 {
                tracing::error!(
                    "arena {} still holds {} allocators ({} bytes) at deinitialize",
                    usage.id,
                    usage.allocation_count,
                    usage.memory_used
                );
                return Err(MemoryError::ArenaLeak {
                    arena: usage.id,
                    memory_used: usage.memory_used,
                    allocation_count: usage.allocation_count,
                });
            }
        }

        for binding in self.arenas.drain(..) {
            tracing::debug!("releasing arena {} of {} bytes", binding.id, binding.region.len());
            self.tracker.record_arena_released(binding.region.len());
        }
        self.initialized = false;
        Ok(())
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        if let Err(error) = self.deinitialize() {
            if !std::thread::panicking() {
                panic!("memory leak: {error}");
            }
        }
    }
}
