//! The recycling layer: per-size-class free lists on top of [`BumpArena`],
//! plus trailing-capacity salvage when growth is unavoidable.

use core::cell::RefCell;
use core::ptr::NonNull;

use crate::alloc_traits::RawAllocator;
use crate::arena::BumpArena;
use crate::{WORD, pow2_log_at_least, round_up};

/// Number of free-list heads. A class never exceeds `usize::BITS`, so 64
/// entries comfortably cover every class this crate can ever compute.
const CLASS_COUNT: usize = 64;

/// The size class (log2 of the rounded-up block size) for a request of
/// `size` bytes: round up to `WORD`, then to the next power of two, floored
/// at `log2(WORD)`.
#[inline]
fn size_class(size: usize) -> u32 {
    pow2_log_at_least(size, WORD.trailing_zeros())
}

/// Largest power of two `<= r`, as a log2 value.
#[inline]
fn floor_log2(r: usize) -> u32 {
    usize::BITS - 1 - r.leading_zeros()
}

/// Wraps a [`BumpArena`] with up to 64 singly-linked free lists, one per
/// size class. A released block's first machine word stores the next
/// pointer in its class's list; the list head is null when empty.
pub struct Recycler {
    arena: BumpArena,
    free_lists: RefCell<[*mut u8; CLASS_COUNT]>,
}

impl core::fmt::Debug for Recycler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let lists = self.free_lists.borrow();
        let populated = lists.iter().filter(|p| !p.is_null()).count();
        f.debug_struct("Recycler")
            .field("arena", &self.arena)
            .field("populated_classes", &populated)
            .finish()
    }
}

impl Default for Recycler {
    fn default() -> Self {
        Self::new()
    }
}

impl Recycler {
    pub fn new() -> Self {
        Self {
            arena: BumpArena::new(),
            free_lists: RefCell::new([core::ptr::null_mut(); CLASS_COUNT]),
        }
    }

    /// Mirrors `BumpArena::with_initial_capacity`.
    pub fn with_initial_capacity(self, initial_capacity: usize) -> Self {
        Self { arena: self.arena.with_initial_capacity(initial_capacity), ..self }
    }

    /// True iff the underlying arena has made no allocation since the last
    /// reset. The recycler's own free lists are not consulted, matching the
    /// arena's own definition of "empty".
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Pop the head of free list `k`, zero the block, and return it.
    /// Caller must have already checked the list is non-empty.
    fn pop(&self, k: u32) -> NonNull<u8> {
        let mut lists = self.free_lists.borrow_mut();
        let head = lists[k as usize];
        debug_assert!(!head.is_null(), "pop called on an empty free list");
        // SAFETY: `head` is a previously released block whose first word was
        // written by `release` to hold the next link.
        let next = unsafe { *(head as *const *mut u8) };
        lists[k as usize] = next;
        drop(lists);

        let size = 1usize << k;
        // SAFETY: `head` owns `size` bytes, previously allocated at this class.
        unsafe { core::ptr::write_bytes(head, 0, size) };
        // SAFETY: `head` came from a non-null list entry.
        unsafe { NonNull::new_unchecked(head) }
    }

    /// Split the active block's unused trailing capacity into power-of-two
    /// fragments and push each onto its matching free list.
    fn salvage(&self) {
        let mut next = self.arena.next_ptr();
        if next.is_null() {
            return;
        }
        let end = self.arena.end_ptr();
        let mut r = (end as usize).wrapping_sub(next as usize);
        let floor_log = WORD.trailing_zeros();

        let mut lists = self.free_lists.borrow_mut();
        while r >= WORD {
            let k = floor_log2(r).max(floor_log);
            let size = 1usize << k;
            let link = lists[k as usize];
            // SAFETY: `next..next+size` lies within the active block's
            // unused trailing capacity.
            unsafe { (next as *mut *mut u8).write(link) };
            lists[k as usize] = next;
            // SAFETY: `size <= r`, so `next + size` stays within the block.
            next = unsafe { next.add(size) };
            r -= size;
        }
        drop(lists);
        self.arena.set_next_ptr(next);
    }

    fn alloc_class(&self, k: u32) -> NonNull<u8> {
        let has_free = !self.free_lists.borrow()[k as usize].is_null();
        if has_free {
            return self.pop(k);
        }
        let size = 1usize << k;
        if self.arena.would_grow(size) {
            self.salvage();
        }
        self.arena.alloc(size)
    }
}

impl RawAllocator for Recycler {
    fn alloc(&self, size: usize) -> NonNull<u8> {
        let rounded = round_up(size, WORD);
        if rounded == 0 {
            return self.arena.alloc(size);
        }
        self.alloc_class(size_class(rounded))
    }

    fn release(&self, ptr: NonNull<u8>, size: usize) {
        if size < WORD {
            return;
        }
        let k = size_class(size);
        let mut lists = self.free_lists.borrow_mut();
        let head = lists[k as usize];
        // SAFETY: `ptr` owns at least `WORD` bytes (size >= WORD, checked above).
        unsafe { (ptr.as_ptr() as *mut *mut u8).write(head) };
        lists[k as usize] = ptr.as_ptr();
    }

    fn reserve(&self, size: usize) {
        self.arena.reserve(size);
    }

    fn reset(&mut self) {
        *self.free_lists.get_mut() = [core::ptr::null_mut(); CLASS_COUNT];
        self.arena.reset();
    }

    fn keep_alive<T: 'static>(&self, handle: T) {
        self.arena.keep_alive(handle);
    }
}
