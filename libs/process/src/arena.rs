//! The per-process arena: a contiguous region owned by one process, freed as
//! a whole on destruction. Plugs in behind the [`Arena`] trait so a future
//! caller can swap in a different allocation strategy without touching the
//! process record itself; the bundled [`BumpArena`] is a byte-granular bump
//! allocator, the same offset-and-region bookkeeping the kernel's physical
//! frame allocator uses, just over a heap buffer instead of physical RAM.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;
use std::sync::Mutex;

/// Snapshot of an arena's utilization.
#[derive(Debug, Clone, Copy)]
pub struct ArenaStats {
    pub capacity: usize,
    pub used: usize,
}

/// The arena plug-in interface. The process layer only ever calls `create`
/// (via `new`), `destroy` (via `Drop`), and `contains`; the rest is exposed
/// for user code running inside the process.
pub trait Arena: Send + Sync {
    /// Allocates `size` bytes at the arena's natural alignment.
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;
    /// Allocates `size` bytes aligned to `align` (must be a power of two).
    fn alloc_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>>;
    /// Returns an allocation to the arena. A no-op for bump-style arenas;
    /// space is only reclaimed in bulk by `reset` or by dropping the arena.
    fn free(&self, ptr: NonNull<u8>, size: usize);
    /// Resets the bump offset to zero. Existing allocations become dangling;
    /// callers must not touch them afterward.
    fn reset(&self);
    /// Whether `ptr` falls inside this arena's backing region.
    fn contains(&self, ptr: NonNull<u8>) -> bool;
    /// Capacity/usage snapshot.
    fn stats(&self) -> ArenaStats;
}

struct Inner {
    base: NonNull<u8>,
    layout: Layout,
    offset: usize,
}

// Safety: `base` is a heap allocation owned exclusively by this `Inner` and
// never aliased outside of it.
unsafe impl Send for Inner {}

/// A single contiguous heap buffer with a bump pointer. `shared` only
/// affects whether the arena is reachable from multiple processes
/// concurrently; this implementation is always safe to share (all mutation
/// goes through its own mutex), so the flag is accepted for interface parity
/// with the plug-in contract and otherwise has no effect.
pub struct BumpArena {
    inner: Mutex<Inner>,
    capacity: usize,
    #[allow(dead_code, reason = "kept for API parity with arena_create(size, shared)")]
    shared: bool,
}

impl BumpArena {
    /// Allocates a `capacity`-byte backing buffer. Panics if `capacity` is
    /// zero or the allocator cannot satisfy the request (matches the
    /// documented fallibility of the rest of this crate's allocation paths,
    /// which treat process setup as infallible at arena scope).
    #[must_use]
    pub fn new(capacity: usize, shared: bool) -> Self {
        let layout = Layout::from_size_align(capacity.max(1), align_of::<usize>())
            .expect("arena capacity overflows an allocation layout");
        // Safety: `layout` has non-zero size.
        let base = unsafe { alloc(layout) };
        let base = NonNull::new(base).expect("failed to allocate process arena");
        BumpArena {
            inner: Mutex::new(Inner {
                base,
                layout,
                offset: 0,
            }),
            capacity,
            shared,
        }
    }
}

impl Arena for BumpArena {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.alloc_aligned(size, align_of::<usize>())
    }

    fn alloc_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());
        let mut inner = self.inner.lock().unwrap();
        let base_addr = inner.base.as_ptr() as usize;
        let aligned = (base_addr + inner.offset).next_multiple_of(align) - base_addr;
        let end = aligned.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        inner.offset = end;
        // Safety: `aligned` is within the backing allocation by the check above.
        Some(unsafe { util::non_null(inner.base.as_ptr().add(aligned)) })
    }

    fn free(&self, _ptr: NonNull<u8>, _size: usize) {
        // Bump arenas reclaim only in bulk; see `reset`.
    }

    fn reset(&self) {
        self.inner.lock().unwrap().offset = 0;
    }

    fn contains(&self, ptr: NonNull<u8>) -> bool {
        let inner = self.inner.lock().unwrap();
        let start = inner.base.as_ptr() as usize;
        let end = start + self.capacity;
        let addr = ptr.as_ptr() as usize;
        (start..end).contains(&addr)
    }

    fn stats(&self) -> ArenaStats {
        let inner = self.inner.lock().unwrap();
        ArenaStats {
            capacity: self.capacity,
            used: inner.offset,
        }
    }
}

impl Drop for BumpArena {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap();
        // Safety: `base`/`layout` were produced together by `new` and never
        // freed elsewhere.
        unsafe { dealloc(inner.base.as_ptr(), inner.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocates_sequentially_within_capacity() {
        let arena = BumpArena::new(64, false);
        let a = arena.alloc(16).unwrap();
        let b = arena.alloc(16).unwrap();
        assert_ne!(a, b);
        assert_eq!(arena.stats().used, 32);
    }

    #[test]
    fn bump_refuses_allocation_past_capacity() {
        let arena = BumpArena::new(16, false);
        assert!(arena.alloc(8).is_some());
        assert!(arena.alloc(16).is_none());
    }

    #[test]
    fn reset_reclaims_the_whole_arena() {
        let arena = BumpArena::new(16, false);
        arena.alloc(16).unwrap();
        assert!(arena.alloc(1).is_none());
        arena.reset();
        assert!(arena.alloc(16).is_some());
    }

    #[test]
    fn contains_reports_pointers_inside_the_backing_region() {
        let arena = BumpArena::new(16, false);
        let ptr = arena.alloc(8).unwrap();
        assert!(arena.contains(ptr));
        let other = Box::new(0_u8);
        assert!(!arena.contains(NonNull::from(other.as_ref())));
    }
}
