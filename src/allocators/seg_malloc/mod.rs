//! A single-threaded segregated-fit memory allocator.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Block widths and request adjustment
// Every block, free or not, is a multiple of `ALIGNMENT` wide and at least `BLOCK_MIN_SIZE`
// wide, so that a freed block always has room for both of its free-list links.
// Requests are turned into block widths by `util::block_width_for`.
//
// ## Transient states
// Within a single operation the heap may briefly hold two adjacent free blocks
// (the pair produced by `grow_for`) or a free block narrower than `BLOCK_MIN_SIZE`
// (a heap extension about to be merged). Both are resolved before the operation returns.

use self::util::block_width_for;
use crate::directory::{self, CLASS_COUNT, DIRECTORY_WIDTH};
use crate::error::{AllocError, GrowError};
use crate::freelist::{self, LINK_SIZE};
use crate::growers::Grower;
use crate::tag::{read_footer_before, read_tag, write_tags, State, Tag, TAG_SIZE};

use core::fmt::{self, Debug};

use static_assertions::const_assert;
use tracing::{debug, error, instrument, Level};

pub use self::check::{BlockInfo, Blocks};

mod check;
mod util;

/// Alignment of every block and payload.
pub const ALIGNMENT: usize = 8;

/// Width of the smallest block: two tags and two free-list links.
pub const BLOCK_MIN_SIZE: usize = 2 * (TAG_SIZE + LINK_SIZE);

/// Bytes of every block that are not payload.
pub(crate) const BLOCK_OVERHEAD: usize = 2 * TAG_SIZE;

// The two state bits of a tag must fall below the alignment.
const_assert!(ALIGNMENT >= 4);
const_assert!(ALIGNMENT.is_power_of_two());
const_assert!(BLOCK_MIN_SIZE % ALIGNMENT == 0);
const_assert!(TAG_SIZE % ALIGNMENT == 0);
const_assert!(DIRECTORY_WIDTH % ALIGNMENT == 0);
const_assert!(DIRECTORY_WIDTH >= BLOCK_MIN_SIZE);

/// A handle to an allocation: the offset of its payload from the heap base.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(usize);

impl Payload {
    #[inline(always)]
    fn of_block(block: usize) -> Payload {
        Payload(block + TAG_SIZE)
    }

    #[inline(always)]
    fn block(self) -> usize {
        self.0 - TAG_SIZE
    }

    /// Returns the offset of the payload from the heap base.
    #[inline(always)]
    pub fn offset(self) -> usize {
        self.0
    }
}

/// A single threaded memory allocator.
pub struct SegMalloc<G: Grower> {
    grower: G,
}

impl<G: Grower> Debug for SegMalloc<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegMalloc")
            .field("heap_size", &self.heap_size())
            .finish()
    }
}

impl<G: Grower> SegMalloc<G> {
    /// Creates an allocator on top of `grower`, placing the free-list directory
    /// at the base of its heap.
    ///
    /// The grower's heap is expected to be empty.
    /// Fails if the heap can not grow to hold the directory.
    #[instrument(level = "info", skip(grower), err(Debug, level = Level::ERROR))]
    pub fn with_grower(mut grower: G) -> Result<Self, AllocError> {
        let base = grower.grow(DIRECTORY_WIDTH)?;
        debug_assert_eq!(base, 0, "The directory should sit at the heap base.");
        directory::init(grower.heap_mut());
        debug!(width = DIRECTORY_WIDTH, "Directory initialized.");
        Ok(SegMalloc { grower })
    }

    /// Allocates a block with room for at least `size` bytes.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn allocate(&mut self, size: usize) -> Result<Payload, AllocError> {
        let width = block_width_for(size).ok_or(GrowError::Overflow { requested: size })?;
        debug!(width, "Request size adjusted.");

        let block = self.search(width)?;
        self.place(block, width);
        Ok(Payload::of_block(block))
    }

    /// Frees the block behind `payload`, merging it with its free neighbours.
    ///
    /// `payload` must come from [`allocate`](Self::allocate) or
    /// [`resize`](Self::resize) on this allocator and must not have been freed since.
    /// Otherwise the heap is left in an unspecified (but memory safe) state.
    #[instrument(level = "info")]
    pub fn free(&mut self, payload: Payload) {
        let block = payload.block();
        let heap = self.grower.heap_mut();
        let tag = read_tag(heap, block);
        debug_assert_eq!(
            tag.state(),
            State::Allocated,
            "Only allocated blocks can be freed."
        );

        write_tags(heap, block, tag.with_state(State::Free));
        self.coalesce(block);
    }

    /// Moves the allocation behind `payload` to a new block with room for `new_size` bytes.
    ///
    /// The first `min(usable_size(payload), new_size)` bytes are carried over.
    /// On failure the original allocation is left untouched.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn resize(&mut self, payload: Payload, new_size: usize) -> Result<Payload, AllocError> {
        let new_payload = self.allocate(new_size)?;
        let count = self.usable_size(payload).min(new_size);
        debug!(count, "Copying payload.");

        let from = payload.offset();
        self.grower
            .heap_mut()
            .copy_within(from..from + count, new_payload.offset());
        self.free(payload);
        Ok(new_payload)
    }

    /// Returns how many bytes the allocation behind `payload` can hold.
    #[inline]
    pub fn usable_size(&self, payload: Payload) -> usize {
        read_tag(self.grower.heap(), payload.block()).width() - BLOCK_OVERHEAD
    }

    /// Returns the bytes of the allocation behind `payload`.
    #[inline]
    pub fn payload(&self, payload: Payload) -> &[u8] {
        let len = self.usable_size(payload);
        &self.grower.heap()[payload.offset()..payload.offset() + len]
    }

    #[inline]
    pub fn payload_mut(&mut self, payload: Payload) -> &mut [u8] {
        let len = self.usable_size(payload);
        &mut self.grower.heap_mut()[payload.offset()..payload.offset() + len]
    }

    /// Returns the address of the allocation behind `payload`.
    /// It stays valid for as long as the allocator and its grower do.
    #[inline]
    pub fn as_ptr(&self, payload: Payload) -> *const u8 {
        self.grower.heap_lo().wrapping_add(payload.offset())
    }

    /// Returns the current size of the heap in bytes.
    #[inline]
    pub fn heap_size(&self) -> usize {
        self.grower.heap().len()
    }

    #[inline]
    pub fn grower(&self) -> &G {
        &self.grower
    }

    /// Consumes the allocator, returning its grower.
    #[inline]
    pub fn into_grower(self) -> G {
        self.grower
    }
}

impl<G: Grower> SegMalloc<G> {
    /// Finds a free block at least `width` bytes wide, growing the heap if none exists.
    /// The block stays in its free list.
    ///
    /// Classes are scanned from the class of `width` upwards and the first fitting
    /// block wins, even if a better fit sits further down the same list.
    #[instrument(level = "debug", ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    fn search(&mut self, width: usize) -> Result<usize, AllocError> {
        let heap = self.grower.heap();
        for class in directory::class_of(width)..CLASS_COUNT {
            let found = directory::list(class)
                .iter(heap)
                .find(|&block| read_tag(heap, block).width() >= width);
            if let Some(block) = found {
                debug!(block, class, "Found free block.");
                return Ok(block);
            }
        }

        debug!("Couldn't find a fitting free block, requesting heap growth.");
        self.grow_for(width)
    }

    /// Grows the heap so that a free block of at least `width` bytes exists and returns it.
    ///
    /// If the last block of the heap is free it gets extended just enough to fit.
    /// Otherwise two blocks of exactly `width` bytes are appended: the first is filed
    /// away for a later request of the same size, the second is returned.
    #[instrument(level = "debug", ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    fn grow_for(&mut self, width: usize) -> Result<usize, AllocError> {
        let last_tag = read_footer_before(self.grower.heap(), self.heap_size());

        if last_tag.is_free() {
            debug_assert!(
                last_tag.width() < width,
                "A fitting last block should have been found by the search."
            );
            let extension = width - last_tag.width();
            let start = self.grow(extension)?;
            write_tags(
                self.grower.heap_mut(),
                start,
                Tag::new(extension, State::Free),
            );
            debug!(extension, "Extending the free last block.");
            return Ok(self.coalesce(start));
        }

        let spare = self.grow(width)?;
        let heap = self.grower.heap_mut();
        write_tags(heap, spare, Tag::new(width, State::Free));
        directory::classify(heap, spare);
        debug!(spare, "Filed spare block.");

        let block = self.grow(width)?;
        let heap = self.grower.heap_mut();
        write_tags(heap, block, Tag::new(width, State::Free));
        directory::classify(heap, block);
        Ok(block)
    }

    /// Grows the heap by `size` bytes, returning the offset of the new bytes.
    #[inline]
    fn grow(&mut self, size: usize) -> Result<usize, AllocError> {
        match self.grower.grow(size) {
            Ok(start) => {
                debug!(size, start, "Heap growth successful.");
                Ok(start)
            }
            Err(err) => {
                error!(size, %err, "Growth failure.");
                Err(err.into())
            }
        }
    }

    /// Takes the free block at `block` out of its list and allocates its first `width` bytes.
    /// The rest is split off into a new free block, unless it would be too small to exist
    /// on its own, in which case the whole block is allocated.
    #[instrument(level = "debug")]
    fn place(&mut self, block: usize, width: usize) {
        let heap = self.grower.heap_mut();
        let tag = read_tag(heap, block);
        debug_assert!(tag.is_free(), "Block should be free.");
        debug_assert!(tag.width() >= width);

        freelist::remove(heap, block);

        let remainder = tag.width() - width;
        if remainder < BLOCK_MIN_SIZE {
            debug!(remainder, "No space for a split, allocating the whole block.");
            write_tags(heap, block, tag.with_state(State::Allocated));
            return;
        }

        write_tags(heap, block, Tag::new(width, State::Allocated));
        let tail = block + width;
        write_tags(heap, tail, Tag::new(remainder, State::Free));
        directory::classify(heap, tail);
        debug!(tail, remainder, "Split off a free block.");
    }

    /// Merges the free, unlisted block at `block` with its free neighbours
    /// and files the result in the directory. Returns the merged block.
    #[instrument(level = "debug", ret(level = Level::DEBUG))]
    fn coalesce(&mut self, block: usize) -> usize {
        let heap = self.grower.heap_mut();
        let mut tag = read_tag(heap, block);
        debug_assert!(tag.is_free());

        let next = block + tag.width();
        if next < heap.len() {
            let next_tag = read_tag(heap, next);
            if next_tag.is_free() {
                freelist::remove(heap, next);
                tag = Tag::new(tag.width() + next_tag.width(), State::Free);
                write_tags(heap, block, tag);
                debug!(next, ?next_tag, merged = ?tag, "Merging with successive free block.");
            }
        }

        // The directory precedes every block, so there always is a footer to read.
        let prev_tag = read_footer_before(heap, block);
        let merged = if prev_tag.is_free() {
            let prev = block - prev_tag.width();
            freelist::remove(heap, prev);
            tag = Tag::new(prev_tag.width() + tag.width(), State::Free);
            write_tags(heap, prev, tag);
            debug!(prev, ?prev_tag, merged = ?tag, "Merging with preceding free block.");
            prev
        } else {
            block
        };

        directory::classify(heap, merged);
        merged
    }
}

#[cfg(test)]
mod tests;
