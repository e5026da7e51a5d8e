//! Passkey request hand-off between stack context and application context.
//!
//! The stack asks for a passkey (or a yes/no) from one of its own
//! callback contexts, but reading user input there can stall the stack.
//! The coordinator therefore only records the request; the stack callback
//! returns immediately, and the application services the request from its
//! own context via `ConnLoop::service_pairing`.
//!
//! One request can be pending at a time, which matches the protocol: a
//! single pairing procedure asks for at most one credential at once.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::config;

const NONE: u8 = 0;
const ENTRY: u8 = 1;
const CONFIRM: u8 = 2;

/// A credential the stack is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingRequest {
    /// Type in the 6-digit passkey shown by the peer.
    Entry,
    /// Answer whether this passkey matches the peer's display.
    Confirm(u32),
}

/// How a single passkey transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PasskeyOutcome {
    /// Credential submitted to the stack.
    Accepted,
    /// User answered "no" to a confirm request.
    Rejected,
    /// Entry out of range or aborted; pairing cancelled through the stack.
    Cancelled,
}

/// Single-request mailbox, written from stack context, drained from the
/// application context.
pub struct PairingCoordinator {
    kind: AtomicU8,
    value: AtomicU32,
}

impl PairingCoordinator {
    pub const fn new() -> Self {
        Self {
            kind: AtomicU8::new(NONE),
            value: AtomicU32::new(0),
        }
    }

    /// Record an entry request.  Returns false if a request is already
    /// pending, which indicates a stack defect.
    pub fn post_entry(&self) -> bool {
        self.kind
            .compare_exchange(NONE, ENTRY, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Record a confirm request for `passkey`.
    pub fn post_confirm(&self, passkey: u32) -> bool {
        self.value.store(passkey, Ordering::Relaxed);
        self.kind
            .compare_exchange(NONE, CONFIRM, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Drain the pending request, if any.
    pub fn take(&self) -> Option<PairingRequest> {
        match self.kind.swap(NONE, Ordering::AcqRel) {
            ENTRY => Some(PairingRequest::Entry),
            CONFIRM => Some(PairingRequest::Confirm(self.value.load(Ordering::Relaxed))),
            _ => None,
        }
    }

    /// Drop any pending request (stack cancelled the procedure).
    pub fn clear(&self) {
        self.kind.store(NONE, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.kind.load(Ordering::Acquire) != NONE
    }
}

/// Validate an entry response.  Passkeys live in `[0, 999999]`; anything
/// else, including the negative abort sentinel, means cancellation.
pub fn validate_entry(value: i32) -> Option<u32> {
    if value < 0 || value as u32 > config::PASSKEY_MAX {
        None
    } else {
        Some(value as u32)
    }
}
