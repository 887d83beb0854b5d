//! Utility functions specific to the [`SegMalloc`](super::SegMalloc) allocator.

use super::{ALIGNMENT, BLOCK_MIN_SIZE, BLOCK_OVERHEAD};
use crate::util::align_up;

/// Returns the width of the block needed to serve a request of `size` bytes
/// or `None` if no such block can exist.
///
/// The width covers both tags, is a multiple of [`ALIGNMENT`]
/// and is never smaller than [`BLOCK_MIN_SIZE`].
#[inline]
pub fn block_width_for(size: usize) -> Option<usize> {
    let width = align_up(size.checked_add(BLOCK_OVERHEAD)?, ALIGNMENT)?;
    // Size of objects should not exceed isize::MAX.
    // https://doc.rust-lang.org/std/ptr/index.html#allocated-object
    match width.max(BLOCK_MIN_SIZE) {
        width if width as isize > 0 => Some(width),
        _ => None,
    }
}
