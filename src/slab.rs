// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Fixed-count preallocated session pool, the Rust-idiomatic reading of the
//! donor's `Memory<T>` template (`shared/include/memory.hpp`): a
//! placement-new free-stack guarded by one mutex, handing out
//! reference-counted handles that return their slot to the pool on last
//! release.
//!
//! Rust's allocator already gives us per-object heap allocation with safe
//! lifetimes, so rather than port the donor's raw `malloc`'d backing buffer
//! and placement-new, this pool tracks *capacity* (a free-slot counter) and
//! hands out `Arc<T>` handles; the invariant the donor enforces by pointer
//! arithmetic — "a handle never outlives the pool" — is enforced here simply
//! by `Arc` reference counting, since a handle, once allocated, no longer
//! depends on the pool for its memory. What the pool actually guards is the
//! *count*: no more than `capacity` handles may be outstanding at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A bounded, reference-counted object pool. `allocate()` hands out an
/// `Arc<T>` and decrements the free count; dropping the last `Arc` for an
/// object (detected via `Arc::strong_count` reaching zero through
/// `Arc`'s own drop glue) does not automatically return the slot — callers
/// release explicitly via [`Slab::release`] when a session leaves the table,
/// matching the donor's session lifecycle (the session table owns the one
/// handle that matters; transient dispatch references are simply clones).
pub struct Slab {
    capacity: usize,
    free: AtomicUsize,
}

impl Slab {
    /// Preallocates accounting for `capacity` slots. Unlike the donor, no
    /// backing buffer is `malloc`'d up front — Rust's allocator allocates
    /// each session object individually when `allocate()` succeeds — but the
    /// capacity ceiling is enforced identically.
    pub fn new(capacity: usize) -> Self {
        Slab {
            capacity,
            free: AtomicUsize::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.capacity - self.free.load(Ordering::SeqCst)
    }

    pub fn free(&self) -> usize {
        self.free.load(Ordering::SeqCst)
    }

    /// Pops a slot and constructs `value` into a handle, or returns `None`
    /// when the pool is exhausted. Callers MUST treat `None` as a soft
    /// capacity warning (log once per flush cycle) and drop the event, never
    /// block, per 4.C.
    pub fn allocate<T>(&self, value: T) -> Option<Arc<T>> {
        loop {
            let current = self.free.load(Ordering::SeqCst);
            if current == 0 {
                return None;
            }
            if self
                .free
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(Arc::new(value));
            }
        }
    }

    /// Returns a slot to the pool. Called when a handle's last table/dispatch
    /// reference is dropped (session erased from the table).
    pub fn release(&self) {
        self.free.fetch_add(1, Ordering::SeqCst);
    }
}
