//! Error types.

use thiserror::Error;

use crate::tag::Tag;

/// Failure of a [`Grower`](crate::growers::Grower) to extend its heap.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GrowError {
    #[error("growth of {requested} bytes exceeds the remaining {available} bytes")]
    Exhausted { requested: usize, available: usize },
    #[error("growth of {requested} bytes overflows the address space")]
    Overflow { requested: usize },
    #[error("heap reservation failed with errno {0}")]
    Os(i32),
}

/// Failure of an allocator operation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] GrowError),
}

/// A violated heap invariant, as reported by
/// [`SegMalloc::check`](crate::SegMalloc::check).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    #[error("the directory at the heap base is damaged: {0:?}")]
    Directory(Tag),
    #[error("block at {offset} has header {header:?} but footer {footer:?}")]
    TagMismatch { offset: usize, header: Tag, footer: Tag },
    #[error("block at {offset} has undefined state bits")]
    InvalidState { offset: usize },
    #[error("block at {offset} is reserved")]
    StrayReserved { offset: usize },
    #[error("block at {offset} has width {width}, below the minimum block size")]
    Undersized { offset: usize, width: usize },
    #[error("block at {offset} has unaligned width {width}")]
    Misaligned { offset: usize, width: usize },
    #[error("block at {offset} with width {width} runs past the heap end at {heap_size}")]
    Overrun {
        offset: usize,
        width: usize,
        heap_size: usize,
    },
    #[error("free blocks at {first} and {second} are adjacent")]
    AdjacentFree { first: usize, second: usize },
    #[error("free block at {offset} is not in any free list")]
    Unlisted { offset: usize },
    #[error("class {class} lists {offset}, which is not a free block")]
    ListedNotFree { class: usize, offset: usize },
    #[error("free block at {offset} is listed more than once")]
    ListedTwice { offset: usize },
    #[error("free block at {offset} of width {width} is filed under class {class}")]
    WrongClass {
        offset: usize,
        width: usize,
        class: usize,
    },
    #[error("free block at {offset} links back to {found} instead of {expected}")]
    BrokenLink {
        offset: usize,
        expected: usize,
        found: usize,
    },
}
