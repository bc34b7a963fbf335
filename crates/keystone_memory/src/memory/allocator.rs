//! # Allocator Contract
//!
//! Every strategy owns one [`Region`], counts the bytes and allocations it
//! has handed out, and gives its region back when dropped: to the parent
//! allocator it was carved from, or to the host.
//!
//! ## Ownership
//!
//! ```text
//!   MemoryManager
//!     └── arena: SharedAllocator<BlockAllocator>      (Backing::Host)
//!           └── strategy: SharedAllocator<S>          (Backing::Parent)
//!                 └── individual allocations
//! ```
//!
//! A child keeps its parent alive through the `Arc` in [`Backing::Parent`],
//! so a parent region can never be reclaimed while a child still exists.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MemoryError, MemoryResult};
use crate::memory::region::{HostRegion, Region};

/// Reference-counted allocator handle.
///
/// Allocators do no locking of their own; the mutex is the caller-side
/// mutual exclusion required to share one allocator between owners.
pub type SharedAllocator<A> = Arc<Mutex<A>>;

/// Wraps an allocator into a [`SharedAllocator`].
#[must_use]
pub fn share<A: Allocator>(allocator: A) -> SharedAllocator<A> {
    Arc::new(Mutex::new(allocator))
}

/// Allocation strategy of an allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// Bump allocation, bulk reset only.
    Linear,
    /// First-fit free list with splitting and coalescing.
    Block,
    /// Fixed-size slots.
    Pool,
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocatorKind::Linear => write!(f, "linear"),
            AllocatorKind::Block => write!(f, "block"),
            AllocatorKind::Pool => write!(f, "pool"),
        }
    }
}

/// The capability every allocator implements.
///
/// `allocate` returns `None` when the allocator is exhausted. Invalid
/// arguments (zero size, non-power-of-two alignment) and pointers that were
/// not issued by this allocator are contract violations and panic.
pub trait Allocator: Send {
    /// Allocates `size` bytes aligned to `alignment`.
    fn allocate(&mut self, size: usize, alignment: u8) -> Option<NonNull<u8>>;

    /// Releases a pointer previously returned by [`Allocator::allocate`].
    fn deallocate(&mut self, ptr: NonNull<u8>);

    /// The strategy of this allocator.
    fn kind(&self) -> AllocatorKind;

    /// The region this allocator manages.
    fn region(&self) -> Region;

    /// Bytes currently in use, including headers and padding.
    fn memory_used(&self) -> usize;

    /// Number of live allocations.
    fn allocation_count(&self) -> usize;

    /// Returns true if the region was carved from a parent allocator.
    fn has_parent(&self) -> bool;

    /// Size of the managed region in bytes.
    fn size(&self) -> usize {
        self.region().len()
    }

    /// Base pointer of the managed region.
    fn data(&self) -> NonNull<u8> {
        self.region().base()
    }
}

/// Where an allocator's region came from, and where it goes back to.
pub enum Backing {
    /// Reserved directly from the host; released when dropped.
    Host(HostRegion),
    /// Carved from a parent allocator; deallocated there when dropped.
    Parent(SharedAllocator<dyn Allocator>),
}

impl Backing {
    /// Reserves a fresh host region of `size` bytes.
    ///
    /// # Errors
    ///
    /// See [`HostRegion::reserve`].
    pub fn host(size: usize, alignment: usize) -> MemoryResult<(Self, Region)> {
        let host = HostRegion::reserve(size, alignment)?;
        let region = host.region();
        Ok((Backing::Host(host), region))
    }

    /// Carves `size` bytes out of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfMemory`] if the parent has no room.
    pub fn carve(
        parent: &SharedAllocator<dyn Allocator>,
        size: usize,
        alignment: u8,
    ) -> MemoryResult<(Self, Region)> {
        let region = Region::allocate_from(&mut *parent.lock(), size, alignment).ok_or(
            MemoryError::OutOfMemory {
                requested: size,
                alignment: usize::from(alignment),
            },
        )?;
        Ok((Backing::Parent(Arc::clone(parent)), region))
    }
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Host(host) => f.debug_tuple("Host").field(host).finish(),
            Backing::Parent(_) => f.debug_tuple("Parent").finish_non_exhaustive(),
        }
    }
}

/// An allocator type that can be built over a region.
///
/// This is what [`MemoryManager::get_allocator`](crate::MemoryManager::get_allocator)
/// is generic over.
pub trait Strategy: Allocator + Sized + 'static {
    /// Strategy-specific construction arguments.
    type Args;

    /// Checks a request before any memory is reserved.
    ///
    /// # Errors
    ///
    /// Returns an error if a region of `size` bytes cannot host this
    /// strategy with `args`.
    fn validate(size: usize, args: &Self::Args) -> MemoryResult<()>;

    /// Builds the allocator over `region`.
    ///
    /// Callers must have passed [`Strategy::validate`] for the region size.
    fn assemble(backing: Backing, region: Region, args: Self::Args) -> Self;
}

/// State shared by every allocator: region, backing and usage counters.
///
/// Dropping a core with live allocations is a fatal leak.
#[derive(Debug)]
pub struct AllocatorCore {
    kind: AllocatorKind,
    backing: Option<Backing>,
    region: Region,
    memory_used: usize,
    allocation_count: usize,
}

impl AllocatorCore {
    /// Creates the core for a freshly built allocator.
    #[must_use]
    pub fn new(kind: AllocatorKind, backing: Backing, region: Region) -> Self {
        Self {
            kind,
            backing: Some(backing),
            region,
            memory_used: 0,
            allocation_count: 0,
        }
    }

    /// The managed region.
    #[inline]
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Bytes in use.
    #[inline]
    #[must_use]
    pub const fn memory_used(&self) -> usize {
        self.memory_used
    }

    /// Live allocations.
    #[inline]
    #[must_use]
    pub const fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Returns true if the region came from a parent allocator.
    #[inline]
    #[must_use]
    pub fn has_parent(&self) -> bool {
        matches!(self.backing, Some(Backing::Parent(_)))
    }

    #[inline]
    pub(crate) fn record_allocation(&mut self, bytes: usize) {
        self.memory_used += bytes;
        self.allocation_count += 1;
    }

    #[inline]
    pub(crate) fn record_release(&mut self, bytes: usize) {
        assert!(
            self.allocation_count > 0 && self.memory_used >= bytes,
            "{} allocator released more than it handed out",
            self.kind
        );
        self.memory_used -= bytes;
        self.allocation_count -= 1;
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.memory_used = 0;
        self.allocation_count = 0;
    }
}

impl Drop for AllocatorCore {
    fn drop(&mut self) {
        if self.allocation_count != 0 || self.memory_used != 0 {
            tracing::error!(
                "{} allocator dropped with {} live allocations ({} bytes in use)",
                self.kind,
                self.allocation_count,
                self.memory_used
            );
            // Live pointers still reference this region: never hand it back.
            if let Some(backing) = self.backing.take() {
                std::mem::forget(backing);
            }
            if !std::thread::panicking() {
                panic!(
                    "memory leak: {} allocator dropped with {} live allocations ({} bytes in use)",
                    self.kind, self.allocation_count, self.memory_used
                );
            }
            return;
        }

        if let Some(Backing::Parent(parent)) = self.backing.take() {
            parent.lock().deallocate(self.region.base());
        }
    }
}
