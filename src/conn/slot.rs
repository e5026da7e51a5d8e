//! Atomically-guarded single-connection ownership cell.
//!
//! The slot is the only mutable shared resource in the connection core.
//! A one-byte CAS guard serializes access to the payload, so admit and
//! release never interleave partial effects and the hardware constraint
//! of at most one live connection is enforced at a single point.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const FULL: u8 = 2;

/// Holds the orchestrator's one reference to a live link, or nothing.
pub struct ConnectionSlot<H> {
    guard: AtomicU8,
    handle: UnsafeCell<Option<H>>,
}

// The guard byte serializes all access to `handle`.
unsafe impl<H: Send> Sync for ConnectionSlot<H> {}

impl<H> ConnectionSlot<H> {
    pub const fn new() -> Self {
        Self {
            guard: AtomicU8::new(EMPTY),
            handle: UnsafeCell::new(None),
        }
    }

    /// Store `handle` if the slot is empty.  Returns whether admission
    /// succeeded; on failure the handle is dropped, releasing the caller's
    /// reference.  An occupied slot here means the stack produced more
    /// concurrent connections than the configuration allows.
    pub fn try_admit(&self, handle: H) -> bool {
        if self
            .guard
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        unsafe { *self.handle.get() = Some(handle) };
        self.guard.store(FULL, Ordering::Release);
        true
    }

    /// Clear the slot and return the stored handle, or `None` if it is
    /// empty (or momentarily guarded by a racing operation - callers that
    /// must not miss a handle re-check, see the disconnect path).
    pub fn take(&self) -> Option<H> {
        if self
            .guard
            .compare_exchange(FULL, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        let handle = unsafe { (*self.handle.get()).take() };
        self.guard.store(EMPTY, Ordering::Release);
        handle
    }

    /// Run `f` with a borrow of the stored handle, without releasing it.
    pub fn with<R>(&self, f: impl FnOnce(Option<&H>) -> R) -> R {
        if self
            .guard
            .compare_exchange(FULL, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return f(None);
        }
        let result = f(unsafe { (*self.handle.get()).as_ref() });
        self.guard.store(FULL, Ordering::Release);
        result
    }

    pub fn is_occupied(&self) -> bool {
        self.guard.load(Ordering::Acquire) == FULL
    }
}
