//! # Alignment Arithmetic
//!
//! Pure address math used by every bound check in the allocators.
//! All alignments must be powers of two.

/// Rounds `address` up to the next multiple of `alignment`.
///
/// # Examples
///
/// ```rust
/// use keystone_memory::memory::align::align_forward;
///
/// assert_eq!(align_forward(13, 8), 16);
/// assert_eq!(align_forward(16, 8), 16);
/// ```
#[inline]
#[must_use]
pub const fn align_forward(address: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (address + alignment - 1) & !(alignment - 1)
}

/// Bytes to skip from `address` to reach `alignment`.
///
/// An address that is already aligned yields `0`.
#[inline]
#[must_use]
pub const fn align_adjustment(address: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    (alignment - (address & mask)) & mask
}

/// Like [`align_adjustment`], but leaves at least `header_size` bytes in
/// front of the aligned address.
///
/// When the plain adjustment is too small for the header it grows by whole
/// multiples of `alignment`, so the result stays aligned.
///
/// ```rust
/// use keystone_memory::memory::align::align_adjustment_with_header;
///
/// // 0x1004 needs 4 bytes to reach 8, which cannot fit a 16-byte header.
/// assert_eq!(align_adjustment_with_header(0x1004, 8, 16), 20);
/// ```
#[inline]
#[must_use]
pub const fn align_adjustment_with_header(
    address: usize,
    alignment: usize,
    header_size: usize,
) -> usize {
    let mut adjustment = align_adjustment(address, alignment);

    if adjustment < header_size {
        let needed = header_size - adjustment;
        adjustment += alignment * (needed / alignment);
        if needed % alignment > 0 {
            adjustment += alignment;
        }
    }

    adjustment
}
