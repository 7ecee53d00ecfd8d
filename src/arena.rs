//! The bump arena: chunked growth, alignment discipline, reset semantics, and
//! the keep-alive list.

use core::any::Any;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use rust_alloc::boxed::Box;
use rust_alloc::collections::BTreeMap;
use rust_alloc::vec::Vec;

use crate::alloc_traits::RawAllocator;
use crate::chunk::Chunk;
use crate::{MIN_LOG, WORD, pow2_log_at_least, round_up};

/// A bump-pointer allocator that grows by obtaining power-of-two chunks from
/// the global allocator.
///
/// `alloc` never fails (aside from aborting on true OOM, matching the host
/// allocator's own failure semantics); `release` is a no-op, since a bare
/// bump arena only reclaims memory wholesale via [`reset`](Self::reset).
pub struct BumpArena {
    /// Address of the next free byte in the active block.
    next: Cell<*mut u8>,
    /// Address one past the end of the active block.
    end: Cell<*mut u8>,
    /// Capacity of the active block; always a power of two (or 0 if the
    /// arena has never allocated).
    cap: Cell<usize>,
    /// Every block obtained so far, keyed by its log2 size. At most one block
    /// per log, per the chunk provider's contract.
    blocks: RefCell<BTreeMap<u32, Chunk>>,
    /// Opaque handles this arena keeps alive until `reset`.
    keep_alive: RefCell<Vec<Box<dyn Any>>>,
    /// Floor for the log of any chunk this arena obtains; raised by
    /// `with_initial_capacity`.
    min_log: Cell<u32>,
    /// Whether an allocation has succeeded since the last reset (or since
    /// construction).
    allocated_since_reset: Cell<bool>,
}

impl core::fmt::Debug for BumpArena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BumpArena")
            .field("cap", &self.cap.get())
            .field("remaining", &self.remaining())
            .field("block_count", &self.blocks.borrow().len())
            .field("keep_alive_count", &self.keep_alive.borrow().len())
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

impl Default for BumpArena {
    fn default() -> Self {
        Self::new()
    }
}

impl BumpArena {
    pub fn new() -> Self {
        Self {
            next: Cell::new(core::ptr::null_mut()),
            end: Cell::new(core::ptr::null_mut()),
            cap: Cell::new(0),
            blocks: RefCell::new(BTreeMap::new()),
            keep_alive: RefCell::new(Vec::new()),
            min_log: Cell::new(MIN_LOG),
            allocated_since_reset: Cell::new(false),
        }
    }

    /// Ensure the first (and every subsequent) chunk this arena obtains is at
    /// least `initial_capacity` bytes, mirroring the teacher's
    /// `ArenaAllocator::with_arena_size` builder.
    pub fn with_initial_capacity(self, initial_capacity: usize) -> Self {
        self.min_log.set(pow2_log_at_least(initial_capacity, MIN_LOG));
        self
    }

    /// True iff no allocation has succeeded since the last reset (or ever).
    pub fn is_empty(&self) -> bool {
        !self.allocated_since_reset.get()
    }

    #[inline]
    fn remaining(&self) -> usize {
        (self.end.get() as usize).wrapping_sub(self.next.get() as usize)
    }

    /// Obtain (or reuse) a block large enough for an `n`-byte request and
    /// make it the active block.
    fn grow(&self, n: usize) {
        let cap = self.cap.get();
        let want = core::cmp::max(n, cap.saturating_mul(2));
        let log = pow2_log_at_least(want, self.min_log.get());

        let mut blocks = self.blocks.borrow_mut();
        if !blocks.contains_key(&log) {
            blocks.insert(log, Chunk::obtain(log));
        }
        let chunk = blocks.get(&log).expect("just inserted or already present");
        chunk.set_owner_tag(self as *const Self as *const ());

        let body = chunk.body();
        self.next.set(body.as_ptr());
        // SAFETY: `chunk.size()` bytes starting at `body` are this chunk's
        // allocation.
        self.end.set(unsafe { body.as_ptr().add(chunk.size()) });
        self.cap.set(chunk.size());
    }

    /// Address of the next free byte (used by the recycler for salvage).
    pub(crate) fn next_ptr(&self) -> *mut u8 {
        self.next.get()
    }

    /// Address one past the end of the active block.
    pub(crate) fn end_ptr(&self) -> *mut u8 {
        self.end.get()
    }

    /// Advance `next` directly (used by the recycler after salvaging
    /// trailing capacity into free lists).
    pub(crate) fn set_next_ptr(&self, next: *mut u8) {
        self.next.set(next);
    }

    /// True if a request of `size` bytes (already word-rounded) would force
    /// a `grow` call.
    pub(crate) fn would_grow(&self, size: usize) -> bool {
        self.next.get().is_null() || size > self.remaining()
    }
}

impl RawAllocator for BumpArena {
    fn alloc(&self, size: usize) -> NonNull<u8> {
        let rounded = round_up(size, WORD);
        if rounded == 0 {
            // SAFETY: WORD is a nonzero power of two, valid as a dangling
            // well-aligned address for a zero-sized request.
            return unsafe { NonNull::new_unchecked(WORD as *mut u8) };
        }
        loop {
            let next = self.next.get();
            if !next.is_null() && rounded <= self.remaining() {
                // SAFETY: `rounded <= remaining()` guarantees `next + rounded`
                // stays within the active block.
                self.next.set(unsafe { next.add(rounded) });
                self.allocated_since_reset.set(true);
                // SAFETY: `next` is non-null (checked above).
                return unsafe { NonNull::new_unchecked(next) };
            }
            self.grow(rounded);
        }
    }

    fn release(&self, _ptr: NonNull<u8>, _size: usize) {
        // Bump arenas never reclaim individual allocations.
    }

    fn reserve(&self, size: usize) {
        let rounded = round_up(size, WORD);
        if rounded > 0 && self.would_grow(rounded) {
            self.grow(rounded);
        }
    }

    fn reset(&mut self) {
        self.keep_alive.get_mut().clear();
        self.allocated_since_reset.set(false);

        let blocks = self.blocks.get_mut();
        let Some(&max_log) = blocks.keys().max() else {
            return;
        };
        let retained = blocks.remove(&max_log).expect("max_log is a known key");
        blocks.clear();
        retained.zero();

        let body = retained.body();
        self.next.set(body.as_ptr());
        // SAFETY: `retained.size()` bytes starting at `body` belong to this chunk.
        self.end.set(unsafe { body.as_ptr().add(retained.size()) });
        self.cap.set(retained.size());

        blocks.insert(max_log, retained);
    }

    fn keep_alive<T: 'static>(&self, handle: T) {
        self.keep_alive.borrow_mut().push(Box::new(handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_arena_is_empty() {
        let arena = BumpArena::new();
        assert!(arena.is_empty());
    }

    #[test]
    fn alloc_marks_arena_non_empty() {
        let arena = BumpArena::new();
        let _ = arena.alloc(8);
        assert!(!arena.is_empty());
    }

    #[test]
    fn every_pointer_is_word_aligned() {
        let arena = BumpArena::new();
        for size in [1usize, 3, 7, 8, 9, 63, 64, 65, 4096, 4097] {
            let ptr = arena.alloc(size);
            assert_eq!(
                ptr.as_ptr() as usize % WORD,
                0,
                "alloc({size}) returned a misaligned pointer"
            );
        }
    }

    #[test]
    fn alloc_delivers_at_least_the_rounded_up_size() {
        let arena = BumpArena::new();
        let a = arena.alloc(10);
        let b = arena.alloc(10);
        // The two 10-byte (-> 16-byte rounded) allocations must not overlap.
        let gap = (b.as_ptr() as usize).abs_diff(a.as_ptr() as usize);
        assert!(gap >= round_up(10, WORD));
    }

    #[test]
    fn grows_when_request_exceeds_active_block() {
        let arena = BumpArena::new().with_initial_capacity(16);
        let first = arena.alloc(8);
        let big = arena.alloc(1 << 20);
        assert_ne!(first.as_ptr(), big.as_ptr());
        assert!(arena.blocks.borrow().len() >= 2);
    }

    #[test]
    fn reset_retains_the_largest_block_and_reuses_its_bytes() {
        let arena = BumpArena::new().with_initial_capacity(16);
        let mut arena = arena;
        let first = arena.alloc(8).as_ptr();
        let _ = arena.alloc(4096); // forces growth to a much larger block
        arena.reset();
        let after_reset = arena.alloc(8).as_ptr();
        // The retained block is the largest one obtained, so the very first
        // post-reset allocation should land inside it, not at `first`'s
        // original (now-discarded) small block.
        assert_ne!(first, after_reset);
        assert!(!arena.is_empty());
    }

    #[test]
    fn reset_zeros_the_retained_block() {
        let mut arena = BumpArena::new();
        let p = arena.alloc(64);
        // SAFETY: freshly allocated 64 bytes.
        unsafe { core::ptr::write_bytes(p.as_ptr(), 0xAB, 64) };
        arena.reset();
        let q = arena.alloc(64);
        // SAFETY: freshly (re)allocated 64 bytes from the zeroed retained block.
        let bytes = unsafe { core::slice::from_raw_parts(q.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn keep_alive_handles_are_dropped_on_reset() {
        use core::cell::RefCell;
        use rust_alloc::rc::Rc;

        let arena = BumpArena::new();
        let flag = Rc::new(RefCell::new(false));
        struct DropFlag(Rc<RefCell<bool>>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                *self.0.borrow_mut() = true;
            }
        }
        arena.keep_alive(DropFlag(flag.clone()));
        assert!(!*flag.borrow());
        let mut arena = arena;
        arena.reset();
        assert!(*flag.borrow());
    }

    #[test]
    fn reserve_then_alloc_does_not_grow_again() {
        let arena = BumpArena::new().with_initial_capacity(16);
        arena.reserve(256);
        let blocks_after_reserve = arena.blocks.borrow().len();
        let _ = arena.alloc(256);
        assert_eq!(arena.blocks.borrow().len(), blocks_after_reserve);
    }
}
