//! # Typed Allocation
//!
//! Construct and destroy values of a concrete type inside memory handed out
//! by any [`Allocator`].
//!
//! Arrays carry their length in a header stored immediately before the
//! first element. The header occupies whole elements so that the first
//! element keeps the alignment of `T`:
//!
//! ```text
//!   ┌──────────── header ───────────┬─────┬─────┬─────┐
//!   │ padding ...     │ len: usize  │ T 0 │ T 1 │ T 2 │
//!   └─────────────────┴─────────────┴─────┴─────┴─────┘
//!   ▲ allocation                    ▲ returned slice
//! ```

// SAFETY: Values are written into and dropped from allocator-issued memory.
#![allow(unsafe_code)]

use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};

use crate::memory::allocator::Allocator;

/// Width of the array length header in bytes.
const LENGTH_SIZE: usize = size_of::<usize>();

/// Alignment argument for `T`, or `None` if `T` cannot be placed.
fn placement<T>() -> Option<u8> {
    if size_of::<T>() == 0 {
        return None;
    }
    u8::try_from(align_of::<T>()).ok()
}

/// Number of `T` elements reserved ahead of an array for its length.
///
/// Always at least one, even when `T` is larger than the header.
///
/// ```rust
/// use keystone_memory::memory::typed::array_header_elements;
///
/// assert_eq!(array_header_elements::<u8>(), 8);
/// assert_eq!(array_header_elements::<u32>(), 2);
/// assert_eq!(array_header_elements::<[u64; 4]>(), 1);
/// ```
///
/// # Panics
///
/// Panics for zero-sized `T`.
#[must_use]
pub const fn array_header_elements<T>() -> usize {
    assert!(size_of::<T>() > 0, "zero-sized types have no array header");
    LENGTH_SIZE.div_ceil(size_of::<T>())
}

/// Moves `value` into memory allocated from `allocator`.
///
/// Returns `None` when the allocator is exhausted, `T` is zero-sized, or
/// `T` is aligned to more than 128 bytes.
pub fn construct<T, A>(allocator: &mut A, value: T) -> Option<NonNull<T>>
where
    A: Allocator + ?Sized,
{
    let alignment = placement::<T>()?;
    let ptr = allocator.allocate(size_of::<T>(), alignment)?.cast::<T>();
    // SAFETY: the allocator handed out `size_of::<T>()` bytes aligned for T.
    unsafe { ptr.as_ptr().write(value) };
    Some(ptr)
}

/// Allocates and default-initializes a `T`.
///
/// See [`construct`].
pub fn construct_default<T, A>(allocator: &mut A) -> Option<NonNull<T>>
where
    T: Default,
    A: Allocator + ?Sized,
{
    construct(allocator, T::default())
}

/// Drops the value at `ptr` and returns its memory to `allocator`.
///
/// # Safety
///
/// `ptr` must come from [`construct`] or [`construct_default`] on the same
/// allocator and must not be used afterwards.
pub unsafe fn destroy<T, A>(allocator: &mut A, ptr: NonNull<T>)
where
    A: Allocator + ?Sized,
{
    // SAFETY: the caller guarantees `ptr` holds a live T we own.
    unsafe { ptr::drop_in_place(ptr.as_ptr()) };
    allocator.deallocate(ptr.cast());
}

/// Allocates an array of `len` values, element `i` initialized to `init(i)`.
///
/// Returns `None` when the allocator is exhausted, `T` is zero-sized, or
/// `T` is aligned to more than 128 bytes.
///
/// ```rust
/// use keystone_memory::memory::typed::{construct_array, destroy_array};
/// use keystone_memory::BlockAllocator;
///
/// let mut heap = BlockAllocator::with_capacity(1024).unwrap();
/// let squares = construct_array(&mut heap, 4, |i| (i * i) as u32).unwrap();
/// assert_eq!(unsafe { squares.as_ref() }, &[0, 1, 4, 9]);
/// unsafe { destroy_array(&mut heap, squares) };
/// ```
pub fn construct_array<T, A, F>(allocator: &mut A, len: usize, mut init: F) -> Option<NonNull<[T]>>
where
    A: Allocator + ?Sized,
    F: FnMut(usize) -> T,
{
    let alignment = placement::<T>()?;
    let header = array_header_elements::<T>() * size_of::<T>();
    let total = len.checked_mul(size_of::<T>())?.checked_add(header)?;

    let block = allocator.allocate(total, alignment)?;
    // SAFETY: `header` bytes fit inside the `total` bytes just allocated.
    let first = unsafe { block.as_ptr().add(header) }.cast::<T>();

    // SAFETY: the length word is the last `LENGTH_SIZE` bytes of the header,
    // which may not be aligned for usize when T is small.
    unsafe { first.cast::<u8>().sub(LENGTH_SIZE).cast::<usize>().write_unaligned(len) };

    for index in 0..len {
        // SAFETY: element `index` lies inside the allocation and is aligned
        // because the header spans whole elements.
        unsafe { first.add(index).write(init(index)) };
    }

    NonNull::new(ptr::slice_from_raw_parts_mut(first, len))
}

/// Drops every element of `array` and returns its memory to `allocator`.
///
/// # Safety
///
/// `array` must come from [`construct_array`] on the same allocator and must
/// not be used afterwards.
///
/// # Panics
///
/// Panics if the stored length disagrees with the slice length.
pub unsafe fn destroy_array<T, A>(allocator: &mut A, array: NonNull<[T]>)
where
    A: Allocator + ?Sized,
{
    let first = array.cast::<T>().as_ptr();
    // SAFETY: `construct_array` wrote the length just before the first element.
    let len = unsafe { first.cast::<u8>().sub(LENGTH_SIZE).cast::<usize>().read_unaligned() };
    assert_eq!(len, array.len(), "array header does not match slice length");

    // SAFETY: all `len` elements were initialized by `construct_array`.
    unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(first, len)) };

    let header = array_header_elements::<T>() * size_of::<T>();
    // SAFETY: the allocation starts `header` bytes before the first element.
    let block = unsafe { first.cast::<u8>().sub(header) };
    if let Some(block) = NonNull::new(block) {
        allocator.deallocate(block);
    }
}
