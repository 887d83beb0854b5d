//! [`Grower`] trait and structures that implement it.
//!
//! The [`Grower`] trait allows users to easily change the heap region
//! on which allocators in [`seg_malloc::allocators`](crate::allocators) operate.

use core::fmt;
use core::mem::size_of;
use core::ptr::{null_mut, NonNull};
use core::slice;

use tracing::{debug, error};

use crate::error::GrowError;

/// A trait for types that act as if they were a contiguous growable buffer.
///
/// The buffer is exposed as a byte slice, offset 0 being the heap base.
/// Implementors must keep the base 8-byte aligned, must preserve the contents of
/// the buffer across growths and must never relocate it, so that offsets handed
/// out by an allocator keep referring to the same bytes.
pub trait Grower {
    /// Grows the underlying buffer by exactly `size` bytes.
    /// Returns the old size of the buffer, i.e. the offset of the first new byte,
    /// or an error if the growth failed, in which case the buffer is unchanged.
    fn grow(&mut self, size: usize) -> Result<usize, GrowError>;

    /// The current heap, `[heap_lo, heap_hi]`.
    fn heap(&self) -> &[u8];

    fn heap_mut(&mut self) -> &mut [u8];

    /// Address of the first byte of the heap.
    fn heap_lo(&self) -> *const u8 {
        self.heap().as_ptr()
    }

    /// Address of the last valid byte of the heap.
    fn heap_hi(&self) -> *const u8 {
        self.heap_lo()
            .wrapping_add(self.heap().len())
            .wrapping_sub(1)
    }
}

impl<T: Grower + ?Sized> Grower for &mut T {
    fn grow(&mut self, size: usize) -> Result<usize, GrowError> {
        (**self).grow(size)
    }

    fn heap(&self) -> &[u8] {
        (**self).heap()
    }

    fn heap_mut(&mut self) -> &mut [u8] {
        (**self).heap_mut()
    }
}

/// Computes the new heap size for a growth of `size` bytes
/// within a region of `capacity` bytes.
fn checked_growth(len: usize, capacity: usize, size: usize) -> Result<usize, GrowError> {
    let new_len = len
        .checked_add(size)
        .ok_or(GrowError::Overflow { requested: size })?;
    if new_len > capacity {
        return Err(GrowError::Exhausted {
            requested: size,
            available: capacity - len,
        });
    }
    Ok(new_len)
}

/// A grower over a fixed-capacity buffer it owns.
///
/// The buffer is allocated once, up front, so growths never move it.
pub struct ArenaGrower {
    buf: Box<[u64]>,
    len: usize,
    capacity: usize,
}

impl ArenaGrower {
    /// Creates an empty arena that can grow up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let words = capacity.div_ceil(size_of::<u64>());
        ArenaGrower {
            buf: vec![0_u64; words].into_boxed_slice(),
            len: 0,
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for ArenaGrower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaGrower")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Grower for ArenaGrower {
    fn grow(&mut self, size: usize) -> Result<usize, GrowError> {
        let old_len = self.len;
        self.len = checked_growth(old_len, self.capacity, size)?;
        Ok(old_len)
    }

    fn heap(&self) -> &[u8] {
        // SAFETY: `len <= capacity <= 8 * buf.len()` and `u8` has no alignment
        // requirement, so the first `len` bytes of `buf` form a valid byte slice.
        unsafe { slice::from_raw_parts(self.buf.as_ptr().cast(), self.len) }
    }

    fn heap_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `heap`; the mutable borrow of `self` makes the slice unique.
        unsafe { slice::from_raw_parts_mut(self.buf.as_mut_ptr().cast(), self.len) }
    }
}

/// A grower that reserves a range of address space with [`libc::mmap`]
/// and hands it out as the heap grows.
///
/// The reservation is made with `MAP_NORESERVE`, so pages only get backed by memory
/// once they are touched. The mapping is released when the grower is dropped.
#[derive(Debug)]
pub struct MmapGrower {
    base: NonNull<u8>,
    len: usize,
    reserved: usize,
}

impl MmapGrower {
    /// Reserves `reserved` bytes of address space for the heap.
    pub fn new(reserved: usize) -> Result<Self, GrowError> {
        if reserved == 0 {
            return Ok(MmapGrower {
                base: NonNull::<u64>::dangling().cast(),
                len: 0,
                reserved,
            });
        }
        // SAFETY: an anonymous private mapping at a kernel-chosen address
        // does not alias any existing memory.
        let ptr = unsafe {
            libc::mmap(
                null_mut(),
                reserved,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or_default();
            error!(reserved, errno, "Couldn't reserve heap.");
            return Err(GrowError::Os(errno));
        }
        debug!(?ptr, reserved, "Reserved heap.");
        let base = NonNull::new(ptr.cast::<u8>()).ok_or(GrowError::Os(libc::ENOMEM))?;
        Ok(MmapGrower {
            base,
            len: 0,
            reserved,
        })
    }

    #[inline]
    pub fn reserved(&self) -> usize {
        self.reserved
    }
}

impl Grower for MmapGrower {
    fn grow(&mut self, size: usize) -> Result<usize, GrowError> {
        let old_len = self.len;
        self.len = checked_growth(old_len, self.reserved, size)?;
        Ok(old_len)
    }

    fn heap(&self) -> &[u8] {
        // SAFETY: the first `len` bytes of the mapping are readable and writable
        // for as long as `self` lives. Mappings are page aligned.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    fn heap_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `heap`; the mutable borrow of `self` makes the slice unique.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl Drop for MmapGrower {
    fn drop(&mut self) {
        if self.reserved == 0 {
            return;
        }
        // SAFETY: `base` and `reserved` describe the mapping created in `new`.
        if unsafe { libc::munmap(self.base.as_ptr().cast(), self.reserved) } != 0 {
            error!(base = ?self.base, "Couldn't release heap reservation.");
        }
    }
}
