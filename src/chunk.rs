//! Chunk provider: produces power-of-two-sized raw memory blocks for the arena.
//!
//! Each chunk reserves one trailing machine word after its body. The body is
//! what gets handed out to callers; the trailing word exists purely so a host
//! embedding this crate alongside a scanning collector has somewhere to park
//! an owner back-pointer, per the design this crate was distilled from. Since
//! `Chunk` is owned outright by the arena's block table and freed on `Drop`,
//! nothing in this crate reads the tag back.

use core::ptr::NonNull;
use rust_alloc::alloc::{Layout, alloc, dealloc, handle_alloc_error};

use crate::WORD;

pub(crate) struct Chunk {
    /// Start of the allocation: `size` usable bytes followed by one trailing
    /// machine word.
    buffer: NonNull<u8>,
    layout: Layout,
    /// Usable body size in bytes; always `1 << log`.
    size: usize,
    log: u32,
}

// SAFETY: `Chunk` owns a unique heap allocation and is only ever accessed
// through `&BumpArena`/`&mut BumpArena`, never shared across threads.
unsafe impl Send for Chunk {}

impl core::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chunk")
            .field("log", &self.log)
            .field("size", &self.size)
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl Chunk {
    /// Obtain `1 << log` usable bytes, pointer-aligned, plus a trailing
    /// machine word reserved for an owner back-pointer.
    pub(crate) fn obtain(log: u32) -> Chunk {
        let size = 1usize << log;
        let total = size.checked_add(WORD).expect("chunk size overflow");
        let layout =
            Layout::from_size_align(total, WORD).expect("chunk layout is always valid");

        // SAFETY: `layout` has non-zero size (at least WORD bytes).
        let buffer = unsafe {
            let ptr = alloc(layout);
            match NonNull::new(ptr) {
                Some(nn) => nn,
                None => handle_alloc_error(layout),
            }
        };

        // Seed the trailing back-pointer slot so it is never read uninitialized.
        // SAFETY: `size` is within the allocation (total = size + WORD).
        unsafe {
            (buffer.as_ptr().add(size) as *mut usize).write(0);
        }

        Chunk { buffer, layout, size, log }
    }

    /// Record an owner tag in the trailing word. Never read back by this
    /// crate; see the module docs.
    pub(crate) fn set_owner_tag(&self, owner: *const ()) {
        // SAFETY: the trailing word is part of this chunk's allocation.
        unsafe {
            (self.buffer.as_ptr().add(self.size) as *mut usize).write(owner as usize);
        }
    }

    #[inline]
    pub(crate) fn body(&self) -> NonNull<u8> {
        self.buffer
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn log(&self) -> u32 {
        self.log
    }

    /// Zero the entire body. Used when a retained block is reused after `reset`.
    pub(crate) fn zero(&self) {
        // SAFETY: `size` bytes starting at `buffer` are part of this allocation.
        unsafe {
            core::ptr::write_bytes(self.buffer.as_ptr(), 0, self.size);
        }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: `buffer`/`layout` are exactly as returned by `alloc`.
        unsafe { dealloc(self.buffer.as_ptr(), self.layout) };
    }
}
