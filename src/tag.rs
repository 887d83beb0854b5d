//! Defines the [`Tag`] boundary tag and the block [`State`] it carries.

use core::fmt;
use core::mem::size_of;

use crate::util::{read_word, write_word};

pub const TAG_SIZE: usize = size_of::<Tag>();

/// Mask selecting the state bits of a tag word.
const STATE_MASK: u64 = 0b11;

/// The state of a block, kept in the two least significant bits of its tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum State {
    Free = 0b00,
    Allocated = 0b01,
    /// Permanently owned by the allocator, e.g. the free-list directory.
    Reserved = 0b10,
}

/// A boundary tag, stored as a single word at both ends of every block.
///
/// # Encoding
/// The block width (total bytes, including both tags) occupies all but the two
/// lowest bits of the word, the block [`State`] occupies the remaining two:
///
/// ```text
///  63                                  2 1 0
/// +-------------------------------------+---+
/// |               width                 | s |
/// +-------------------------------------+---+
/// ```
///
/// Widths are always multiples of the allocator alignment (8 bytes)
/// so the low bits of the width are zero and can be reused for the state.
/// The bit pattern `0b11` is never written; [`is_valid`](Tag::is_valid)
/// reports it.
#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(u64);

impl Tag {
    /// Creates a tag for a block of `width` bytes in `state`.
    #[inline(always)]
    pub fn new(width: usize, state: State) -> Tag {
        debug_assert_eq!(
            width as u64 & STATE_MASK,
            0,
            "width should leave the state bits clear."
        );
        Tag(width as u64 | state as u64)
    }

    /// Reinterprets a raw tag word.
    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Tag {
        Tag(raw)
    }

    /// Returns the raw tag word.
    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the total block width in bytes, state bits masked off.
    #[inline(always)]
    pub fn width(self) -> usize {
        (self.0 & !STATE_MASK) as usize
    }

    #[inline(always)]
    pub fn state(self) -> State {
        match self.0 & STATE_MASK {
            0b00 => State::Free,
            0b01 => State::Allocated,
            _ => State::Reserved,
        }
    }

    #[inline(always)]
    pub fn is_free(self) -> bool {
        self.0 & STATE_MASK == State::Free as u64
    }

    /// Returns whether the state bits hold one of the three defined states.
    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self.0 & STATE_MASK != STATE_MASK
    }

    /// Returns a copy of the tag with the same width and a different state.
    #[inline(always)]
    pub fn with_state(self, state: State) -> Tag {
        Tag((self.0 & !STATE_MASK) | state as u64)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("width", &self.width())
            .field("state", &self.state())
            .finish()
    }
}

/// Reads the header tag of the block starting at `block`.
#[inline(always)]
pub(crate) fn read_tag(heap: &[u8], block: usize) -> Tag {
    Tag::from_raw(read_word(heap, block))
}

/// Reads the footer tag that ends right before `offset`,
/// i.e. the footer of the block physically preceding `offset`.
#[inline(always)]
pub(crate) fn read_footer_before(heap: &[u8], offset: usize) -> Tag {
    Tag::from_raw(read_word(heap, offset - TAG_SIZE))
}

/// Writes `tag` as both header and footer of the block starting at `block`.
/// The footer position is derived from the width stored in `tag`.
#[inline(always)]
pub(crate) fn write_tags(heap: &mut [u8], block: usize, tag: Tag) {
    debug_assert!(tag.width() >= TAG_SIZE);
    write_word(heap, block, tag.raw());
    write_word(heap, block + tag.width() - TAG_SIZE, tag.raw());
}
