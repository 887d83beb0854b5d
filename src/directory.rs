//! The free-list directory: one [`Freelist`] per power-of-two size class.
//!
//! The directory is a single block at the very base of the heap, tagged
//! [`State::Reserved`] so that neither the search nor the coalescer can mistake it for
//! an ordinary block:
//!
//! ```text
//! 0        8        16                     8 + 8 * CLASS_COUNT
//! +--------+--------+--------+-- ... --+--------+--------+
//! |  tag   | slot 0 | slot 1 |         |slot 58 |  tag   |
//! +--------+--------+--------+-- ... --+--------+--------+
//! ```
//!
//! Slot `i` is the `next` link of the sentinel of class `i`. Sentinels are placed so that
//! the link lands on their slot, which makes them ordinary list anchors for
//! [`insert_after`](crate::freelist::insert_after) and [`remove`](crate::freelist::remove).

use crate::freelist::{Freelist, LINK_SIZE, NEXT_OFFSET};
use crate::tag::{read_tag, write_tags, State, Tag, TAG_SIZE};

use static_assertions::const_assert;

/// Lower bound of class 1. Class 0 holds every block narrower than this.
pub const CLASS_BASE: usize = 64;

/// Number of size classes, one per power of two a block width can reach.
pub const CLASS_COUNT: usize = u64::BITS as usize - 5;

/// Width of the reserved directory block.
pub const DIRECTORY_WIDTH: usize = TAG_SIZE + CLASS_COUNT * LINK_SIZE + TAG_SIZE;

const_assert!(CLASS_BASE.is_power_of_two());
// The sentinel of class 0 sits at the heap base.
const_assert!(TAG_SIZE == NEXT_OFFSET);

/// Returns the size class of a block `width` bytes wide.
///
/// Class 0 holds widths below [`CLASS_BASE`], class `i > 0` holds widths in
/// `[CLASS_BASE << (i - 1), CLASS_BASE << i)` and the last class is unbounded.
#[inline]
pub fn class_of(width: usize) -> usize {
    if width < CLASS_BASE {
        return 0;
    }
    let class = (width / CLASS_BASE).ilog2() as usize + 1;
    class.min(CLASS_COUNT - 1)
}

/// Returns the smallest width filed under `class`.
#[inline]
pub fn class_lower_bound(class: usize) -> usize {
    debug_assert!(class < CLASS_COUNT);
    match class {
        0 => 0,
        _ => CLASS_BASE << (class - 1),
    }
}

/// Returns the free list of `class`.
#[inline]
pub(crate) fn list(class: usize) -> Freelist {
    debug_assert!(class < CLASS_COUNT);
    Freelist::new(TAG_SIZE + class * LINK_SIZE - NEXT_OFFSET)
}

/// Lays out an empty directory over `heap[..DIRECTORY_WIDTH]`.
pub(crate) fn init(heap: &mut [u8]) {
    for class in 0..CLASS_COUNT {
        list(class).clear(heap);
    }
    write_tags(heap, 0, Tag::new(DIRECTORY_WIDTH, State::Reserved));
}

/// Files the free block at `block` under its size class, at the head of the list.
pub(crate) fn classify(heap: &mut [u8], block: usize) {
    let tag = read_tag(heap, block);
    debug_assert!(tag.is_free(), "Only free blocks belong in the directory.");
    list(class_of(tag.width())).push_front(heap, block);
}
