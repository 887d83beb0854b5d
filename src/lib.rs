//! A segregated-fit memory allocator written in Rust.
//!
//! The allocator manages a single contiguous heap that only ever grows at its high end.
//! It keeps freed memory in a directory of free lists, one per power-of-two size class,
//! and merges neighbouring free blocks as soon as they appear.
//!
//! # Usage
//! ```
//! use seg_malloc::SegMalloc;
//! use seg_malloc::growers::ArenaGrower;
//!
//! let mut allocator = SegMalloc::with_grower(ArenaGrower::new(64 * 1024)).unwrap();
//!
//! let p = allocator.allocate(64).unwrap();
//! allocator.payload_mut(p)[..5].copy_from_slice(b"hello");
//!
//! let p = allocator.resize(p, 256).unwrap();
//! assert_eq!(&allocator.payload(p)[..5], b"hello");
//! allocator.free(p);
//! ```
//!
//! # Mode of operation
//! - When an allocation is requested the size is padded for the block tags and rounded up
//!   to the alignment, then the free lists are searched starting from the size class of the
//!   request. The search is greedy: the first block that is wide enough wins. Whatever the
//!   allocation does not need is split off into a new free block.
//! - If no block fits, the heap is grown through the allocator's [grower](#growers). When the
//!   last block of the heap is free it is simply extended; otherwise the heap grows by two
//!   blocks of the requested width, one of which is kept for the next request of that size.
//! - On deallocation the block is merged with its free neighbours on both sides and the
//!   result is filed under its size class.
//!
//! Below is a list of the abstractions used by the allocator for operating on the heap:
//!
//! ## Blocks
//! The heap is divided into blocks laid out back to back. Each block starts and ends with a
//! [tag](#tags) and is either free, allocated or reserved. The payload of an allocated block
//! is what callers get to use; a free block instead stores its free-list links there.
//! All blocks are 8-byte aligned and their widths are multiples of 8.
//!
//! ## Tags
//! A tag is one word holding the block width with the block state packed into its two low
//! bits. It is duplicated as header and footer so that both physical neighbours of a block
//! can be found in constant time, which is what makes immediate coalescing cheap.
//!
//! ## Directory
//! The directory is a reserved block at the base of the heap holding one sentinel per
//! size class. Class 0 holds blocks narrower than 64 bytes and class `i` holds widths in
//! `[64 << (i - 1), 64 << i)`. Each sentinel anchors a doubly-linked list of free blocks.
//!
//! ## Growers
//! A grower is the allocator's backing buffer. [`SegMalloc`] is generic over its grower,
//! so anything that implements [`Grower`] (anything that acts as a contiguous buffer which
//! can grow in place) can serve as its heap. Two growers are provided:
//! [`ArenaGrower`] over a fixed owned buffer and [`MmapGrower`] over a reserved range
//! of address space.
//!
//! # Addressing
//! Blocks, links and [`Payload`] handles are offsets from the heap base rather than raw
//! pointers. The allocator therefore never aliases heap memory behind the borrow checker's
//! back; the payload bytes are reached through [`SegMalloc::payload`] and
//! [`SegMalloc::payload_mut`], or as an address through [`SegMalloc::as_ptr`].
//!
//! # Threads
//! The allocator is single-threaded: every operation takes `&mut self`.
//! Callers sharing one between threads have to provide their own synchronization.
//!
//! [`Grower`]: growers::Grower
//! [`ArenaGrower`]: growers::ArenaGrower
//! [`MmapGrower`]: growers::MmapGrower
//! [`Payload`]: allocators::seg_malloc::Payload

pub use crate::allocators::seg_malloc::{BlockInfo, Payload};
pub use crate::allocators::SegMalloc;
pub use crate::error::{AllocError, GrowError, HeapError};
pub use crate::tag::{State, Tag};

pub mod allocators;
pub mod directory;
mod error;
mod freelist;
pub mod growers;
pub mod tag;
mod util;
