//! Heap introspection and consistency checking for [`SegMalloc`].

use std::collections::{HashMap, HashSet};

use super::{SegMalloc, ALIGNMENT, BLOCK_MIN_SIZE};
use crate::directory::{self, CLASS_COUNT, DIRECTORY_WIDTH};
use crate::error::HeapError;
use crate::freelist;
use crate::growers::Grower;
use crate::tag::{read_tag, State, TAG_SIZE};
use crate::util::read_word;

/// A block as seen by a heap walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header from the heap base.
    pub offset: usize,
    /// Total width of the block, tags included.
    pub width: usize,
    pub state: State,
}

impl BlockInfo {
    fn read(heap: &[u8], offset: usize) -> BlockInfo {
        let tag = read_tag(heap, offset);
        BlockInfo {
            offset,
            width: tag.width(),
            state: tag.state(),
        }
    }
}

/// Iterator over the blocks of a heap in address order, directory first.
///
/// The walk follows header widths only; it stops early on a zero width
/// or a header that does not fit in the heap.
pub struct Blocks<'a> {
    heap: &'a [u8],
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.offset + TAG_SIZE > self.heap.len() {
            return None;
        }
        let block = BlockInfo::read(self.heap, self.offset);
        self.offset = match block.width {
            0 => self.heap.len(),
            width => self.offset.saturating_add(width),
        };
        Some(block)
    }
}

impl<G: Grower> SegMalloc<G> {
    /// Walks the heap block by block.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self.grower.heap(),
            offset: 0,
        }
    }

    /// Walks the free lists of the directory, smallest class first.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let heap = self.grower.heap();
        (0..CLASS_COUNT)
            .flat_map(move |class| directory::list(class).iter(heap))
            .map(move |block| BlockInfo::read(heap, block))
    }

    /// Verifies every structural invariant of the heap:
    ///
    /// * the directory is intact and the blocks after it tile the heap exactly,
    /// * every block has matching header and footer, a defined state, an aligned width
    ///   and is at least [`BLOCK_MIN_SIZE`] wide,
    /// * no two adjacent blocks are free,
    /// * every free block is listed exactly once, under its own size class,
    ///   and no other block is listed,
    /// * every `prev` link mirrors the `next` link pointing at it.
    pub fn check(&self) -> Result<(), HeapError> {
        let heap = self.grower.heap();
        let heap_size = heap.len();

        let directory_tag = read_tag(heap, 0);
        if directory_tag.width() != DIRECTORY_WIDTH
            || directory_tag.state() != State::Reserved
            || read_word(heap, DIRECTORY_WIDTH - TAG_SIZE) != directory_tag.raw()
        {
            return Err(HeapError::Directory(directory_tag));
        }

        // Physical walk, collecting free blocks with their widths.
        let mut free: HashMap<usize, usize> = HashMap::new();
        let mut offset = DIRECTORY_WIDTH;
        let mut prev_free: Option<usize> = None;
        while offset < heap_size {
            if offset + TAG_SIZE > heap_size {
                return Err(HeapError::Overrun {
                    offset,
                    width: TAG_SIZE,
                    heap_size,
                });
            }
            let header = read_tag(heap, offset);
            let width = header.width();
            if width < BLOCK_MIN_SIZE {
                return Err(HeapError::Undersized { offset, width });
            }
            if width % ALIGNMENT != 0 {
                return Err(HeapError::Misaligned { offset, width });
            }
            if width > heap_size - offset {
                return Err(HeapError::Overrun {
                    offset,
                    width,
                    heap_size,
                });
            }
            let footer = read_tag(heap, offset + width - TAG_SIZE);
            if footer != header {
                return Err(HeapError::TagMismatch {
                    offset,
                    header,
                    footer,
                });
            }
            if !header.is_valid() {
                return Err(HeapError::InvalidState { offset });
            }

            match header.state() {
                State::Reserved => return Err(HeapError::StrayReserved { offset }),
                State::Free => {
                    if let Some(first) = prev_free {
                        return Err(HeapError::AdjacentFree {
                            first,
                            second: offset,
                        });
                    }
                    free.insert(offset, width);
                    prev_free = Some(offset);
                }
                State::Allocated => prev_free = None,
            }
            offset += width;
        }

        // Directory walk. Links are only followed once the node is known to be
        // a free block seen for the first time, which also ends cyclic lists.
        let mut listed: HashSet<usize> = HashSet::with_capacity(free.len());
        for class in 0..CLASS_COUNT {
            let list = directory::list(class);
            let mut expected_prev = list.sentinel();
            let mut node = list.head(heap);
            while let Some(block) = node {
                let Some(&width) = free.get(&block) else {
                    return Err(HeapError::ListedNotFree {
                        class,
                        offset: block,
                    });
                };
                if !listed.insert(block) {
                    return Err(HeapError::ListedTwice { offset: block });
                }
                if directory::class_of(width) != class {
                    return Err(HeapError::WrongClass {
                        offset: block,
                        width,
                        class,
                    });
                }
                let found = freelist::prev(heap, block);
                if found != expected_prev {
                    return Err(HeapError::BrokenLink {
                        offset: block,
                        expected: expected_prev,
                        found,
                    });
                }
                expected_prev = block;
                node = freelist::next(heap, block);
            }
        }

        if let Some(&offset) = free.keys().filter(|&&b| !listed.contains(&b)).min() {
            return Err(HeapError::Unlisted { offset });
        }
        Ok(())
    }
}
