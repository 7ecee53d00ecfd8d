//! The allocator surface shared by [`crate::BumpArena`] and [`crate::Recycler`],
//! plus the typed helpers built on top of it.

use core::mem;
use core::ptr::NonNull;

use crate::WORD;

/// Errors surfaced by this crate's allocator types.
///
/// Out-of-memory from the underlying global allocator is *not* one of these
/// variants: like the teacher's `Arena::try_init`, it aborts via
/// `handle_alloc_error` rather than returning a value, since there is no
/// useful recovery available once the host allocator itself has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// `new::<T>` was called with a `T` whose alignment exceeds this crate's
    /// word-sized alignment ceiling.
    OverAligned { required: usize, max: usize },
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AllocError::OverAligned { required, max } => write!(
                f,
                "type requires alignment {required}, which exceeds the arena's alignment ceiling of {max}"
            ),
        }
    }
}

impl core::error::Error for AllocError {}

/// The operations an ART tree (or any other caller) needs from an allocator
/// backed by this crate's arena.
///
/// Implemented by both [`crate::BumpArena`] (bare bump allocation) and
/// [`crate::Recycler`] (bump allocation plus per-size-class free lists).
pub trait RawAllocator {
    /// Allocate `size` bytes, rounded up to word alignment. Uninitialized
    /// unless the implementation documents otherwise (recycled blocks are
    /// zeroed; fresh bump-allocated blocks are not).
    fn alloc(&self, size: usize) -> NonNull<u8>;

    /// Return `size` bytes previously obtained from `alloc(size)` (or a size
    /// that rounds up the same way). A no-op for sizes smaller than a machine
    /// word, and for the bare bump arena (which never reclaims before reset).
    fn release(&self, ptr: NonNull<u8>, size: usize);

    /// Ensure the next `alloc(size)` call will not need to grow the arena.
    fn reserve(&self, size: usize);

    /// Discard all allocations made since the last reset (or since
    /// construction). Any pointer obtained from `alloc` before this call
    /// becomes invalid.
    fn reset(&mut self);

    /// Keep `handle` alive for as long as this allocator has not been reset.
    fn keep_alive<T: 'static>(&self, handle: T);

    /// The number of bytes this allocator would actually deliver for a
    /// request of `n` bytes (next power of two, floor of 16).
    fn suggest_size(&self, n: usize) -> usize {
        suggest_size(n)
    }
}

/// The size an arena in this crate would actually deliver for a request of
/// `n` bytes: the next power of two, floored at 16.
pub fn suggest_size(n: usize) -> usize {
    crate::pow2_at_least(n, crate::MIN_LOG)
}

/// Allocate space for `value` and move it in.
///
/// Fails if `T`'s alignment exceeds the arena's word-sized alignment ceiling;
/// every allocation this crate hands out is word-aligned, so a type with a
/// larger natural alignment cannot be placed safely.
pub fn new<A: RawAllocator, T>(alloc: &A, value: T) -> Result<NonNull<T>, AllocError> {
    let layout = core::alloc::Layout::new::<T>();
    if layout.align() > WORD {
        return Err(AllocError::OverAligned { required: layout.align(), max: WORD });
    }
    let raw = alloc.alloc(layout.size());
    let typed = raw.cast::<T>();
    // SAFETY: `raw` is a fresh, uniquely-owned, appropriately sized and
    // aligned allocation; writing `value` into it does not read or drop
    // any prior value.
    unsafe {
        typed.as_ptr().write(value);
    }
    Ok(typed)
}

/// Release the allocation backing `ptr`, which must have come from
/// [`new`] with the same `T`.
///
/// # Safety
///
/// `ptr` must not be dereferenced again after this call.
pub fn free<A: RawAllocator, T>(alloc: &A, ptr: NonNull<T>) {
    let size = mem::size_of::<T>();
    alloc.release(ptr.cast::<u8>(), size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BumpArena;

    #[test]
    fn new_and_free_round_trip() {
        let arena = BumpArena::new();
        let ptr = new(&arena, 0x1234_5678u32).expect("alignment fits");
        // SAFETY: just written by `new`.
        assert_eq!(unsafe { *ptr.as_ptr() }, 0x1234_5678);
        free(&arena, ptr);
    }

    #[repr(align(32))]
    struct OverAligned(u8);

    #[test]
    fn new_rejects_over_aligned_types() {
        let arena = BumpArena::new();
        let err = new(&arena, OverAligned(0)).unwrap_err();
        assert_eq!(err, AllocError::OverAligned { required: 32, max: WORD });
    }

    #[test]
    fn suggest_size_rounds_up_to_power_of_two_floor_16() {
        assert_eq!(suggest_size(0), 16);
        assert_eq!(suggest_size(1), 16);
        assert_eq!(suggest_size(16), 16);
        assert_eq!(suggest_size(17), 32);
        assert_eq!(suggest_size(1024), 1024);
        assert_eq!(suggest_size(1025), 2048);
    }
}
