//! Defines the [`Freelist`] struct and the doubly-linked list primitives it is built on.
//!
//! Free lists live inside the heap itself. A node is identified by its offset from the
//! heap base; the `next` link of a node is the word right after its header tag and the
//! `prev` link is the word after that:
//!
//! ```text
//! node + 0                 node + NEXT_OFFSET     node + PREV_OFFSET
//! +------------------------+----------------------+----------------------+---
//! |          tag           |         next         |         prev         | ...
//! +------------------------+----------------------+----------------------+---
//! ```
//!
//! Sentinel nodes only own a `next` link. A stored link of [`NIL`] terminates the list,
//! which is unambiguous since offset 0 is the directory header and never a free block.

use core::mem::size_of;

use crate::tag::TAG_SIZE;
use crate::util::{read_word, write_word};

pub const LINK_SIZE: usize = size_of::<u64>();

pub(crate) const NEXT_OFFSET: usize = TAG_SIZE;
pub(crate) const PREV_OFFSET: usize = TAG_SIZE + LINK_SIZE;

pub(crate) const NIL: u64 = 0;

/// Returns the node following `node` or `None` if `node` is the last one.
#[inline(always)]
pub(crate) fn next(heap: &[u8], node: usize) -> Option<usize> {
    match read_word(heap, node + NEXT_OFFSET) {
        NIL => None,
        next => Some(next as usize),
    }
}

/// Returns the node preceding `node`, either a block or a sentinel.
#[inline(always)]
pub(crate) fn prev(heap: &[u8], node: usize) -> usize {
    read_word(heap, node + PREV_OFFSET) as usize
}

#[inline(always)]
fn set_next(heap: &mut [u8], node: usize, next: Option<usize>) {
    write_word(heap, node + NEXT_OFFSET, next.map_or(NIL, |n| n as u64));
}

#[inline(always)]
fn set_prev(heap: &mut [u8], node: usize, prev: usize) {
    write_word(heap, node + PREV_OFFSET, prev as u64);
}

/// Links `block` into a list right after `anchor`.
/// This operation has a time complexity of *O*(1).
///
/// `anchor` may be a sentinel or any block currently in a list,
/// `block` must not be in any list.
pub(crate) fn insert_after(heap: &mut [u8], anchor: usize, block: usize) {
    debug_assert_ne!(anchor, block);
    let after = next(heap, anchor);
    set_prev(heap, block, anchor);
    set_next(heap, block, after);
    if let Some(after) = after {
        set_prev(heap, after, block);
    }
    set_next(heap, anchor, Some(block));
}

/// Unlinks `block` from the list it is in.
/// This operation has a time complexity of *O*(1).
///
/// `block` must currently be part of a list, so that its `prev` link is valid.
pub(crate) fn remove(heap: &mut [u8], block: usize) {
    let before = prev(heap, block);
    let after = next(heap, block);
    set_next(heap, before, after);
    if let Some(after) = after {
        set_prev(heap, after, before);
    }
}

/// A free list anchored at a sentinel node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Freelist {
    sentinel: usize,
}

impl Freelist {
    /// Creates a handle to the list anchored at `sentinel`.
    #[inline]
    pub const fn new(sentinel: usize) -> Self {
        Freelist { sentinel }
    }

    #[inline]
    pub fn sentinel(&self) -> usize {
        self.sentinel
    }

    /// Detaches every node from the list.
    #[inline]
    pub fn clear(&self, heap: &mut [u8]) {
        set_next(heap, self.sentinel, None);
    }

    /// Returns the first node of the list or `None` if the list is empty.
    #[inline]
    pub fn head(&self, heap: &[u8]) -> Option<usize> {
        next(heap, self.sentinel)
    }

    /// Adds `block` to the front of the list.
    #[inline]
    pub fn push_front(&self, heap: &mut [u8], block: usize) {
        insert_after(heap, self.sentinel, block);
    }

    /// Iterates over the nodes of the list, head first.
    #[inline]
    pub fn iter<'a>(&self, heap: &'a [u8]) -> Iter<'a> {
        Iter {
            heap,
            node: self.head(heap),
        }
    }
}

pub(crate) struct Iter<'a> {
    heap: &'a [u8],
    node: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let node = self.node?;
        self.node = next(self.heap, node);
        Some(node)
    }
}
