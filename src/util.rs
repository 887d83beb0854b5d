//! Utility functions.

use core::mem::size_of;

/// Size of a heap word. Tags and free-list links are stored as words.
pub(crate) const WORD_SIZE: usize = size_of::<u64>();

/// Reads the word stored at `offset`.
///
/// # Panics
/// Panics if the word does not lie entirely within `heap`.
#[inline(always)]
pub(crate) fn read_word(heap: &[u8], offset: usize) -> u64 {
    let mut bytes = [0_u8; WORD_SIZE];
    bytes.copy_from_slice(&heap[offset..offset + WORD_SIZE]);
    u64::from_ne_bytes(bytes)
}

/// Writes `value` into the word at `offset`.
///
/// # Panics
/// Panics if the word does not lie entirely within `heap`.
#[inline(always)]
pub(crate) fn write_word(heap: &mut [u8], offset: usize, value: u64) {
    heap[offset..offset + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
}

/// Returns the smallest multiple of `align` that is greater or equal to `x`
/// or `None` if that value can not be contained in a `usize`.
///
/// `align` must be a power of two.
#[inline]
pub(crate) fn align_up(x: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two(), "alignment should be a power of two.");
    let mask = align - 1;
    x.checked_add(mask).map(|x| x & !mask)
}
